//! Policy.
use super::{ActionMask, Observation};
use anyhow::Result;

/// A policy on the board.
///
/// Policy is a mapping from an observation to an action.
pub trait Policy {
    /// Returns the legal action with the highest value.
    ///
    /// Actions for which `mask` is `false` must never be returned.
    fn best_action(&mut self, obs: &Observation, mask: &ActionMask) -> Result<usize>;
}
