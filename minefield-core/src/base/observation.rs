//! Observation of the board and the set of legal actions.
use crate::error::MinefieldError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Number of planes stacked in an [`Observation`].
pub const N_PLANES: usize = 3;

/// Value of a cell in the board plane that has not been revealed yet.
pub const UNREVEALED: f32 = 0.0;

/// Stacked 3-plane view of a square board.
///
/// The planes are, in order, the board mask, the mine mask and the numbers.
/// Data is stored row-major with shape `[3, side, side]`. An observation is
/// immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ObservationData")]
pub struct Observation {
    side: usize,
    data: Vec<f32>,
}

/// Serialized form of [`Observation`], checked before it is accepted.
#[derive(Deserialize)]
struct ObservationData {
    side: usize,
    data: Vec<f32>,
}

impl TryFrom<ObservationData> for Observation {
    type Error = MinefieldError;

    fn try_from(value: ObservationData) -> Result<Self, Self::Error> {
        let ObservationData { side, data } = value;
        if side == 0 || data.len() != N_PLANES * side * side {
            return Err(MinefieldError::Protocol(format!(
                "observation of side {} holds {} values",
                side,
                data.len()
            )));
        }
        Ok(Self { side, data })
    }
}

impl Observation {
    /// Builds an observation from three flattened planes.
    ///
    /// Fails if any plane does not hold exactly `side * side` cells.
    pub fn from_planes(side: usize, board: &[f32], mines: &[f32], numbers: &[f32]) -> Result<Self> {
        let n = side * side;
        if side == 0 {
            return Err(MinefieldError::Protocol("board side must be positive".to_string()).into());
        }
        for (name, plane) in [("board", board), ("mines", mines), ("numbers", numbers)].iter() {
            if plane.len() != n {
                return Err(MinefieldError::Protocol(format!(
                    "plane '{}' has {} cells, expected {} ({}x{})",
                    name,
                    plane.len(),
                    n,
                    side,
                    side
                ))
                .into());
            }
        }

        let mut data = Vec::with_capacity(N_PLANES * n);
        data.extend_from_slice(board);
        data.extend_from_slice(mines);
        data.extend_from_slice(numbers);
        Ok(Self { side, data })
    }

    /// Observation with all planes set to zero, i.e., a fully unrevealed board.
    pub fn empty(side: usize) -> Self {
        Self {
            side,
            data: vec![0f32; N_PLANES * side * side],
        }
    }

    /// Linear dimension of the board.
    pub fn side(&self) -> usize {
        self.side
    }

    /// Number of cells, which is also the number of candidate actions.
    pub fn action_dim(&self) -> usize {
        self.side * self.side
    }

    /// Shape of the stacked planes.
    pub fn shape(&self) -> [usize; 3] {
        [N_PLANES, self.side, self.side]
    }

    /// The board-mask plane.
    pub fn board(&self) -> &[f32] {
        &self.data[..self.action_dim()]
    }

    /// The mine-mask plane.
    pub fn mines(&self) -> &[f32] {
        let n = self.action_dim();
        &self.data[n..2 * n]
    }

    /// The numbers plane.
    pub fn numbers(&self) -> &[f32] {
        let n = self.action_dim();
        &self.data[2 * n..]
    }

    /// All planes, row-major.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Legal actions derived from the board plane.
    ///
    /// A cell is legal iff its board value is [`UNREVEALED`].
    pub fn valid_action_mask(&self) -> ActionMask {
        ActionMask(self.board().iter().map(|&v| v == UNREVEALED).collect())
    }
}

/// Legality flag per cell index.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionMask(Vec<bool>);

impl ActionMask {
    /// Wraps per-cell legality flags.
    pub fn new(flags: Vec<bool>) -> Self {
        Self(flags)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if the mask covers no cell.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if action `ix` is legal.
    pub fn is_legal(&self, ix: usize) -> bool {
        self.0.get(ix).copied().unwrap_or(false)
    }

    /// Indices of legal actions in ascending order.
    pub fn legal_actions(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &legal)| if legal { Some(i) } else { None })
            .collect()
    }

    /// Number of legal actions.
    pub fn count_legal(&self) -> usize {
        self.0.iter().filter(|&&legal| legal).count()
    }

    /// Per-cell flags.
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

/// A transition `(o_t, a_t, r_t, o_t+1, terminal)` stored in the replay buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Observation before the action.
    pub obs: Observation,

    /// Cell index of the action.
    pub act: usize,

    /// Reward of the action.
    pub reward: f32,

    /// Observation after the action.
    pub next_obs: Observation,

    /// Whether the episode terminated with this action.
    pub is_terminated: bool,
}

impl Transition {
    /// Constructs a transition, checking that the action addresses a cell.
    pub fn new(
        obs: Observation,
        act: usize,
        reward: f32,
        next_obs: Observation,
        is_terminated: bool,
    ) -> Result<Self> {
        if act >= obs.action_dim() {
            return Err(MinefieldError::Protocol(format!(
                "action {} out of range [0, {})",
                act,
                obs.action_dim()
            ))
            .into());
        }
        Ok(Self {
            obs,
            act,
            reward,
            next_obs,
            is_terminated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_action_mask_2x2() -> Result<()> {
        let obs = Observation::from_planes(2, &[0., 1., 0., 1.], &[0.; 4], &[0.; 4])?;
        let mask = obs.valid_action_mask();
        assert_eq!(mask.legal_actions(), vec![0, 2]);
        assert!(mask.is_legal(0));
        assert!(!mask.is_legal(1));
        assert!(!mask.is_legal(4));
        assert_eq!(mask.count_legal(), 2);
        Ok(())
    }

    #[test]
    fn test_planes_keep_order() -> Result<()> {
        let obs = Observation::from_planes(
            2,
            &[0., 1., 2., 3.],
            &[4., 5., 6., 7.],
            &[8., 9., 10., 11.],
        )?;
        assert_eq!(obs.shape(), [3, 2, 2]);
        assert_eq!(obs.board(), &[0., 1., 2., 3.]);
        assert_eq!(obs.mines(), &[4., 5., 6., 7.]);
        assert_eq!(obs.numbers(), &[8., 9., 10., 11.]);
        Ok(())
    }

    #[test]
    fn test_wrong_plane_length_is_protocol_error() {
        let err = Observation::from_planes(2, &[0.; 4], &[0.; 3], &[0.; 4]).unwrap_err();
        match err.downcast_ref::<MinefieldError>() {
            Some(MinefieldError::Protocol(_)) => {}
            e => panic!("unexpected error: {:?}", e),
        }
    }

    #[derive(Serialize)]
    struct RawObservation {
        side: usize,
        data: Vec<f32>,
    }

    #[test]
    fn test_decoding_checks_plane_length() -> Result<()> {
        let obs = Observation::empty(2);
        let bytes = bincode::serialize(&obs)?;
        assert_eq!(bincode::deserialize::<Observation>(&bytes)?, obs);

        let short = bincode::serialize(&RawObservation {
            side: 2,
            data: vec![0.; 3],
        })?;
        assert!(bincode::deserialize::<Observation>(&short).is_err());

        let no_side = bincode::serialize(&RawObservation {
            side: 0,
            data: vec![],
        })?;
        assert!(bincode::deserialize::<Observation>(&no_side).is_err());
        Ok(())
    }

    #[test]
    fn test_transition_rejects_out_of_range_action() {
        let obs = Observation::empty(2);
        assert!(Transition::new(obs.clone(), 3, 0., obs.clone(), false).is_ok());
        assert!(Transition::new(obs.clone(), 4, 0., obs, false).is_err());
    }
}
