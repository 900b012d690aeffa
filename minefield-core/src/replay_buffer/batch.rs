//! Batch of transitions sampled from the replay buffer.
use crate::Observation;

/// A batch of transitions together with their importance weights and the slots
/// they were drawn from.
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    /// Observations.
    pub obs: Vec<Observation>,

    /// Actions.
    pub act: Vec<usize>,

    /// Next observations.
    pub next_obs: Vec<Observation>,

    /// Rewards.
    pub reward: Vec<f32>,

    /// Termination flags.
    pub is_terminated: Vec<bool>,

    /// Importance sampling weights; the largest is 1.
    pub weight: Vec<f32>,

    /// Slots of the sampled transitions, used to update priorities.
    pub ix_sample: Vec<usize>,
}

impl TransitionBatch {
    /// Number of transitions in the batch.
    pub fn len(&self) -> usize {
        self.act.len()
    }

    /// `true` if the batch holds no transition.
    pub fn is_empty(&self) -> bool {
        self.act.is_empty()
    }

    /// Unpacks the batch into its components.
    #[allow(clippy::type_complexity)]
    pub fn unpack(
        self,
    ) -> (
        Vec<Observation>,
        Vec<usize>,
        Vec<Observation>,
        Vec<f32>,
        Vec<bool>,
        Vec<f32>,
        Vec<usize>,
    ) {
        (
            self.obs,
            self.act,
            self.next_obs,
            self.reward,
            self.is_terminated,
            self.weight,
            self.ix_sample,
        )
    }
}
