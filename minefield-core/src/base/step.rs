//! Environment step.
use super::Observation;

/// Outcome of an action applied to the environment: `(o_t+1, r_t, done)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    /// Observation after the action.
    pub obs: Observation,

    /// Reward of the action.
    pub reward: f32,

    /// Flag denoting if the episode is over.
    pub is_done: bool,
}

impl Step {
    /// Constructs a [`Step`] object.
    pub fn new(obs: Observation, reward: f32, is_done: bool) -> Self {
        Step {
            obs,
            reward,
            is_done,
        }
    }

    #[inline]
    /// Terminated.
    pub fn is_done(&self) -> bool {
        self.is_done
    }
}
