//! Environment.
use super::{ActionMask, Observation, Step};
use anyhow::Result;

/// A two-player board game environment.
///
/// The agent and an expert oracle take turns on the same board. Each call is
/// synchronous: it returns once the environment has produced the result of the
/// request, or fails.
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Builds an environment.
    fn build(config: &Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Starts a new game and returns its initial observation.
    fn reset(&mut self) -> Result<Observation>;

    /// Applies action `act` to the board.
    ///
    /// `penalize_forbidden` asks the environment to assign a negative reward to
    /// moves it considers forbidden. `is_agent_move` tells the environment which
    /// player made the move.
    fn step(&mut self, act: usize, penalize_forbidden: bool, is_agent_move: bool) -> Result<Step>;

    /// Asks the expert oracle for its action in the current position.
    fn expert_action(&mut self) -> Result<usize>;

    /// Legal actions in the current position.
    fn valid_action_mask(&self) -> Result<ActionMask>;

    /// Releases resources held by the environment.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
