//! Agent.
use super::{Policy, ReplayBufferBase, Transition};
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// Represents a trainable policy.
///
/// The agent owns the value-function approximators and the optimizer. The
/// schedule of when each method is called belongs to the
/// [`Trainer`](crate::Trainer).
pub trait Agent<R: ReplayBufferBase>: Policy {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Performs a supervised update on a single expert transition.
    fn pretrain_step(&mut self, tr: &Transition) -> Result<Record>;

    /// Performs an optimization step with a batch sampled from `buffer`.
    ///
    /// `beta` is the exponent of importance sampling weights. Returns `None` if
    /// the buffer does not hold enough transitions for a batch.
    fn opt_with_record(&mut self, buffer: &mut R, beta: f32) -> Result<Option<Record>>;

    /// Regularizes the policy toward its distillation reference.
    ///
    /// Returns `None` if the buffer does not hold enough transitions for a batch.
    fn distill(&mut self, buffer: &mut R) -> Result<Option<Record>>;

    /// Copies the current policy parameters into the distillation reference.
    fn refresh_distill_reference(&mut self) -> Result<()>;

    /// Save the parameters of the agent in the given directory.
    ///
    /// This includes every network and the optimizer state.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Load the parameters of the agent from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;

    /// Save only the parameters of the policy network to a file.
    fn save_policy(&self, path: &Path) -> Result<()>;
}
