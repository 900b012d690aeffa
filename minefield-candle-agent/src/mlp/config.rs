use crate::util::OutDim;
use minefield_core::N_PLANES;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Mlp`](super::Mlp).
pub struct MlpConfig {
    pub(super) in_dim: usize,
    pub(super) units: Vec<usize>,
    pub(super) out_dim: usize,
    pub(super) activation_out: bool,
}

impl Default for MlpConfig {
    /// The network for a 15x15 board: 675 inputs, hidden layers of 512 and
    /// 256 units, 225 outputs.
    fn default() -> Self {
        Self::for_board(15)
    }
}

impl MlpConfig {
    /// Creates configuration of MLP.
    ///
    /// * `activation_out` - If `true`, activation function is added in the final layer.
    pub fn new(in_dim: usize, units: Vec<usize>, out_dim: usize, activation_out: bool) -> Self {
        Self {
            in_dim,
            units,
            out_dim,
            activation_out,
        }
    }

    /// Network taking the stacked planes of a `side` x `side` board and
    /// returning one value per cell.
    pub fn for_board(side: usize) -> Self {
        let n = side * side;
        Self::new(N_PLANES * n, vec![512, 256], n, false)
    }

    /// Sets the hidden layers.
    pub fn units(mut self, units: Vec<usize>) -> Self {
        self.units = units;
        self
    }

    /// Input dimension.
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }
}

impl OutDim for MlpConfig {
    fn get_out_dim(&self) -> usize {
        self.out_dim
    }

    fn set_out_dim(&mut self, out_dim: usize) {
        self.out_dim = out_dim;
    }
}
