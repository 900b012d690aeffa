//! Prioritized replay buffer.
use super::{sum_tree::SumTree, ReplayBufferConfig, TransitionBatch};
use crate::{error::MinefieldError, ExperienceBufferBase, ReplayBufferBase, Transition};
use anyhow::Result;
use log::{debug, trace};
use rand::{rngs::StdRng, Rng, SeedableRng};
use segment_tree::{ops::MaxIgnoreNaN, SegmentPoint};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Priority assigned to the first transition pushed into an empty buffer.
const INITIAL_PRIORITY: f32 = 1.0;

/// Content of the buffer written by [`ReplayBufferBase::save`].
#[derive(Serialize, Deserialize)]
struct Snapshot {
    capacity: usize,
    cursor: usize,
    priorities: Vec<f32>,
    transitions: Vec<Transition>,
}

/// A fixed-capacity circular store of [`Transition`]s with
/// priority-proportional sampling.
///
/// Slot `i` is drawn with probability $P(i)=p_i^\alpha/\sum_k p_k^\alpha$ over
/// the populated slots, and its importance weight is
/// $w_i=\left(N\cdot P(i)\right)^{-\beta}$ normalized by the largest weight in
/// the batch. Raw priorities are kept for every slot, so the tail of the array
/// is zero until the buffer wraps for the first time.
///
/// ```ignore
/// let config = ReplayBufferConfig::default().capacity(4);
/// let mut buffer = PrioritizedReplayBuffer::build(&config);
/// buffer.push(transition)?;
/// let batch = buffer.batch(1, 0.4)?;
/// buffer.update_priority(&batch.ix_sample, &[0.5]);
/// ```
pub struct PrioritizedReplayBuffer {
    /// Maximum number of transitions that can be stored.
    capacity: usize,

    /// Exponent of prioritization.
    alpha: f32,

    /// Slot overwritten by the next push.
    i: usize,

    /// Stored transitions, in slot order.
    transitions: Vec<Transition>,

    /// Raw priority of every slot.
    priorities: Vec<f32>,

    /// Sampling mass `priority^alpha` of every slot.
    sum_tree: SumTree,

    /// Running maximum of raw priorities.
    max_tree: SegmentPoint<f32, MaxIgnoreNaN>,

    /// Random number generator for sampling.
    rng: StdRng,
}

impl PrioritizedReplayBuffer {
    /// Maximum number of transitions the buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot that the next push overwrites.
    pub fn cursor(&self) -> usize {
        self.i
    }

    /// Raw priorities of all slots, including unused ones.
    pub fn priorities(&self) -> &[f32] {
        &self.priorities
    }

    /// Transition stored in slot `ix`.
    pub fn get(&self, ix: usize) -> Option<&Transition> {
        self.transitions.get(ix)
    }

    /// Probability of drawing slot `ix` in a single draw.
    pub fn probability(&self, ix: usize) -> f32 {
        let total = self.sum_tree.total();
        if ix >= self.transitions.len() || total <= 0.0 {
            return 0.0;
        }
        (self.sum_tree.value(ix) / total) as f32
    }

    /// The priority given to a newly pushed transition.
    pub fn max_priority(&self) -> f32 {
        if self.transitions.is_empty() {
            INITIAL_PRIORITY
        } else {
            self.max_tree.query(0, self.transitions.len())
        }
    }

    /// Sum of the rewards of all stored transitions.
    pub fn sum_rewards(&self) -> f32 {
        self.transitions.iter().map(|tr| tr.reward).sum()
    }

    /// Number of stored transitions that ended an episode.
    pub fn num_terminated_flags(&self) -> usize {
        self.transitions.iter().filter(|tr| tr.is_terminated).count()
    }

    fn set_priority(&mut self, ix: usize, p: f32) {
        let p = p.max(0.0);
        self.priorities[ix] = p;
        self.max_tree.modify(ix, p);
        self.sum_tree.set(ix, (p as f64).powf(self.alpha as f64));
    }

    fn sample_ixs(&mut self, size: usize) -> Vec<usize> {
        let n = self.transitions.len();
        let total = self.sum_tree.total();
        if total <= 0.0 {
            return (0..size).map(|_| self.rng.gen_range(0..n)).collect();
        }

        (0..size)
            .map(|_| {
                // (0, total]; slots with zero mass are never selected
                let s = total * (1.0 - self.rng.gen::<f64>());
                self.sum_tree.get(s).min(n - 1)
            })
            .collect()
    }

    fn weights(&self, ixs: &[usize], beta: f32) -> Vec<f32> {
        let n = self.transitions.len() as f32;
        let ws = ixs
            .iter()
            .map(|&ix| match self.probability(ix) {
                p if p > 0.0 => (n * p).powf(-beta),
                _ => 1.0,
            })
            .collect::<Vec<_>>();
        let w_max = ws.iter().fold(0f32, |m, &w| m.max(w));
        if w_max > 0.0 && w_max.is_finite() {
            ws.iter().map(|w| w / w_max).collect()
        } else {
            vec![1.0; ixs.len()]
        }
    }

    fn restore(&mut self, snapshot: Snapshot) -> Result<()> {
        let Snapshot {
            capacity,
            cursor,
            priorities,
            transitions,
        } = snapshot;

        if capacity != self.capacity {
            return Err(MinefieldError::CheckpointLoad(format!(
                "replay buffer snapshot has capacity {}, configured {}",
                capacity, self.capacity
            ))
            .into());
        }
        let consistent = priorities.len() == capacity
            && transitions.len() <= capacity
            && cursor < capacity
            && (transitions.len() == capacity || cursor == transitions.len());
        if !consistent {
            return Err(MinefieldError::CheckpointLoad(format!(
                "inconsistent replay buffer snapshot: cursor {}, {} priorities, {} transitions",
                cursor,
                priorities.len(),
                transitions.len()
            ))
            .into());
        }

        validate_transitions(&transitions)?;

        self.sum_tree.clear();
        self.max_tree = SegmentPoint::build(vec![0f32; capacity], MaxIgnoreNaN);
        self.priorities = priorities;
        // Unpopulated slots carry no sampling mass, whatever alpha is.
        for ix in 0..transitions.len() {
            let p = self.priorities[ix];
            self.set_priority(ix, p);
        }
        self.transitions = transitions;
        self.i = cursor;
        Ok(())
    }
}

/// Checks that restored transitions could have been built by [`Transition::new`]
/// and that they all come from boards of the same size.
fn validate_transitions(transitions: &[Transition]) -> Result<()> {
    let side = match transitions.first() {
        Some(tr) => tr.obs.side(),
        None => return Ok(()),
    };
    for (ix, tr) in transitions.iter().enumerate() {
        let invalid = |reason: String| -> anyhow::Error {
            MinefieldError::CheckpointLoad(format!(
                "replay buffer snapshot, transition {}: {}",
                ix, reason
            ))
            .into()
        };
        if tr.obs.side() != side || tr.next_obs.side() != side {
            return Err(invalid(format!(
                "board sides {} and {}, expected {}",
                tr.obs.side(),
                tr.next_obs.side(),
                side
            )));
        }
        if tr.act >= tr.obs.action_dim() {
            return Err(invalid(format!(
                "action {} out of range [0, {})",
                tr.act,
                tr.obs.action_dim()
            )));
        }
    }
    Ok(())
}

impl ExperienceBufferBase for PrioritizedReplayBuffer {
    type Item = Transition;

    fn push(&mut self, tr: Self::Item) -> Result<()> {
        let p = self.max_priority();
        if self.transitions.len() < self.capacity {
            self.transitions.push(tr);
        } else {
            self.transitions[self.i] = tr;
        }
        self.set_priority(self.i, p);
        self.i = (self.i + 1) % self.capacity;
        Ok(())
    }

    fn len(&self) -> usize {
        self.transitions.len()
    }
}

impl ReplayBufferBase for PrioritizedReplayBuffer {
    type Config = ReplayBufferConfig;
    type Batch = TransitionBatch;

    fn build(config: &Self::Config) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            capacity,
            alpha: config.per_config.alpha,
            i: 0,
            transitions: Vec::with_capacity(capacity.min(1 << 16)),
            priorities: vec![0f32; capacity],
            sum_tree: SumTree::new(capacity),
            max_tree: SegmentPoint::build(vec![0f32; capacity], MaxIgnoreNaN),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Draws `size` slots with replacement.
    fn batch(&mut self, size: usize, beta: f32) -> Result<Self::Batch> {
        let available = self.transitions.len();
        if size > available || available == 0 {
            return Err(MinefieldError::InsufficientSamples {
                requested: size,
                available,
            }
            .into());
        }

        let ixs = self.sample_ixs(size);
        let weight = self.weights(&ixs, beta);
        trace!("Sampled slots {:?}", ixs);

        let mut batch = TransitionBatch {
            obs: Vec::with_capacity(size),
            act: Vec::with_capacity(size),
            next_obs: Vec::with_capacity(size),
            reward: Vec::with_capacity(size),
            is_terminated: Vec::with_capacity(size),
            weight,
            ix_sample: ixs,
        };
        for &ix in batch.ix_sample.iter() {
            let tr = &self.transitions[ix];
            batch.obs.push(tr.obs.clone());
            batch.act.push(tr.act);
            batch.next_obs.push(tr.next_obs.clone());
            batch.reward.push(tr.reward);
            batch.is_terminated.push(tr.is_terminated);
        }
        Ok(batch)
    }

    fn update_priority(&mut self, ixs: &[usize], priorities: &[f32]) {
        for (&ix, &p) in ixs.iter().zip(priorities.iter()) {
            if ix < self.transitions.len() {
                self.set_priority(ix, p);
            }
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            capacity: self.capacity,
            cursor: self.i,
            priorities: self.priorities.clone(),
            transitions: self.transitions.clone(),
        };

        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            bincode::serialize_into(&mut writer, &snapshot)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        debug!(
            "Saved {} transitions of the replay buffer to {:?}",
            self.transitions.len(),
            path
        );
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }

        let reader = BufReader::new(File::open(path)?);
        let snapshot: Snapshot = bincode::deserialize_from(reader).map_err(|e| {
            MinefieldError::CheckpointLoad(format!("replay buffer snapshot {:?}: {}", path, e))
        })?;
        self.restore(snapshot)?;
        debug!(
            "Loaded {} transitions of the replay buffer from {:?}",
            self.transitions.len(),
            path
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{replay_buffer::PerConfig, Observation};
    use tempdir::TempDir;

    fn transition(reward: f32) -> Transition {
        let obs = Observation::empty(2);
        Transition::new(obs.clone(), 0, reward, obs, false).unwrap()
    }

    fn buffer(capacity: usize, alpha: f32) -> PrioritizedReplayBuffer {
        let config = ReplayBufferConfig::default()
            .capacity(capacity)
            .per_config(PerConfig::default().alpha(alpha));
        PrioritizedReplayBuffer::build(&config)
    }

    #[test]
    fn test_push_uses_running_max_priority() -> Result<()> {
        let mut buffer = buffer(4, 0.6);
        buffer.push(transition(0.))?;
        assert_eq!(buffer.priorities(), &[1.0, 0.0, 0.0, 0.0]);

        buffer.update_priority(&[0], &[3.0]);
        buffer.push(transition(1.))?;
        assert_eq!(buffer.priorities(), &[3.0, 3.0, 0.0, 0.0]);

        // Slots beyond the population are ignored.
        buffer.update_priority(&[3], &[10.0]);
        assert_eq!(buffer.max_priority(), 3.0);
        Ok(())
    }

    #[test]
    fn test_never_samples_unpopulated_slots() -> Result<()> {
        let mut buffer = buffer(8, 0.6);
        for r in 0..3 {
            buffer.push(transition(r as f32))?;
        }
        let batch = buffer.batch(256, 0.4)?;
        assert!(batch.ix_sample.iter().all(|&ix| ix < 3));
        assert_eq!(buffer.probability(5), 0.0);
        Ok(())
    }

    #[test]
    fn test_insufficient_samples() -> Result<()> {
        let mut buffer = buffer(8, 0.6);
        buffer.push(transition(0.))?;
        let err = buffer.batch(2, 0.4).unwrap_err();
        match err.downcast_ref::<MinefieldError>() {
            Some(MinefieldError::InsufficientSamples {
                requested: 2,
                available: 1,
            }) => {}
            e => panic!("unexpected error: {:?}", e),
        }
        Ok(())
    }

    #[test]
    fn test_load_rejects_capacity_mismatch() -> Result<()> {
        let dir = TempDir::new("replay_buffer")?;
        let path = dir.path().join("replay_buffer.bin");
        let mut small = buffer(4, 0.6);
        small.push(transition(0.))?;
        small.save(&path)?;

        let mut large = buffer(8, 0.6);
        let err = large.load(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MinefieldError>(),
            Some(MinefieldError::CheckpointLoad(_))
        ));
        assert_eq!(large.len(), 0);
        Ok(())
    }

    fn assert_checkpoint_load_error(err: anyhow::Error) {
        assert!(
            matches!(
                err.downcast_ref::<MinefieldError>(),
                Some(MinefieldError::CheckpointLoad(_))
            ),
            "unexpected error: {:?}",
            err
        );
    }

    #[test]
    fn test_load_rejects_out_of_range_action() -> Result<()> {
        let dir = TempDir::new("replay_buffer")?;
        let path = dir.path().join("replay_buffer.bin");
        let mut tr = transition(1.0);
        tr.act = 99;
        let snapshot = Snapshot {
            capacity: 4,
            cursor: 1,
            priorities: vec![1.0, 0.0, 0.0, 0.0],
            transitions: vec![tr],
        };
        fs::write(&path, bincode::serialize(&snapshot)?)?;

        let mut buffer = buffer(4, 0.6);
        assert_checkpoint_load_error(buffer.load(&path).unwrap_err());
        assert_eq!(buffer.len(), 0);
        Ok(())
    }

    #[test]
    fn test_load_rejects_mixed_board_sizes() -> Result<()> {
        let dir = TempDir::new("replay_buffer")?;
        let path = dir.path().join("replay_buffer.bin");
        let large = Observation::empty(3);
        let snapshot = Snapshot {
            capacity: 4,
            cursor: 2,
            priorities: vec![1.0, 1.0, 0.0, 0.0],
            transitions: vec![
                transition(0.0),
                Transition::new(large.clone(), 5, 0.0, large, false)?,
            ],
        };
        fs::write(&path, bincode::serialize(&snapshot)?)?;

        let mut buffer = buffer(4, 0.6);
        assert_checkpoint_load_error(buffer.load(&path).unwrap_err());
        Ok(())
    }

    #[derive(Serialize)]
    struct RawObservation {
        side: usize,
        data: Vec<f32>,
    }

    #[derive(Serialize)]
    struct RawTransition {
        obs: RawObservation,
        act: usize,
        reward: f32,
        next_obs: RawObservation,
        is_terminated: bool,
    }

    #[derive(Serialize)]
    struct RawSnapshot {
        capacity: usize,
        cursor: usize,
        priorities: Vec<f32>,
        transitions: Vec<RawTransition>,
    }

    #[test]
    fn test_load_rejects_truncated_planes() -> Result<()> {
        let dir = TempDir::new("replay_buffer")?;
        let path = dir.path().join("replay_buffer.bin");
        let raw = |n: usize| RawObservation {
            side: 2,
            data: vec![0.0; n],
        };
        let snapshot = RawSnapshot {
            capacity: 4,
            cursor: 1,
            priorities: vec![1.0, 0.0, 0.0, 0.0],
            transitions: vec![RawTransition {
                obs: raw(3),
                act: 0,
                reward: 0.0,
                next_obs: raw(12),
                is_terminated: false,
            }],
        };
        fs::write(&path, bincode::serialize(&snapshot)?)?;

        let mut buffer = buffer(4, 0.6);
        assert_checkpoint_load_error(buffer.load(&path).unwrap_err());
        assert_eq!(buffer.len(), 0);
        Ok(())
    }
}
