//! Prioritized experience replay.
//!
//! * [`PrioritizedReplayBuffer`] - fixed-capacity circular store of
//!   [`Transition`](crate::Transition)s with priority-proportional sampling.
//! * [`TransitionBatch`] - a sampled batch with importance weights.
//! * [`IwScheduler`] - annealing of the importance weight exponent.
mod base;
mod batch;
mod config;
mod iw_scheduler;
mod sum_tree;
pub use base::PrioritizedReplayBuffer;
pub use batch::TransitionBatch;
pub use config::{PerConfig, ReplayBufferConfig};
pub use iw_scheduler::IwScheduler;
