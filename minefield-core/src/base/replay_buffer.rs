//! Replay buffer interface.
use anyhow::Result;
use std::path::Path;

/// Interface for buffers that store experiences from environments.
pub trait ExperienceBufferBase {
    /// The type of items stored in the buffer.
    type Item;

    /// Pushes a new experience into the buffer.
    fn push(&mut self, tr: Self::Item) -> Result<()>;

    /// Returns the current number of experiences in the buffer.
    fn len(&self) -> usize;

    /// Returns `true` if the buffer holds no experience.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interface for replay buffers that generate batches for training.
pub trait ReplayBufferBase: ExperienceBufferBase {
    /// Configuration parameters for the replay buffer.
    type Config: Clone;

    /// The type of batch generated for training.
    type Batch;

    /// Builds a new replay buffer from the given configuration.
    fn build(config: &Self::Config) -> Self;

    /// Samples a batch of `size` experiences.
    ///
    /// `beta` is the exponent of importance sampling weights.
    fn batch(&mut self, size: usize, beta: f32) -> Result<Self::Batch>;

    /// Overwrites priorities of the experiences at `ixs`.
    fn update_priority(&mut self, ixs: &[usize], priorities: &[f32]);

    /// Writes the whole content of the buffer to `path`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Restores the buffer from `path`.
    ///
    /// Returns `false`, leaving the buffer untouched, if nothing was saved there.
    fn load(&mut self, path: &Path) -> Result<bool>;
}
