#![warn(missing_docs)]
//! Core components for training an agent on a two-player board game.
//!
//! * [`Env`], [`Agent`] and [`Policy`] - interfaces of the game and the learner
//! * [`Observation`], [`ActionMask`] and [`Transition`] - data exchanged between them
//! * [`replay_buffer`] - prioritized experience replay
//! * [`Trainer`] - the training loop with expert pretraining, distillation
//!   and checkpointing
//! * [`record`] - key-value records of training progress
pub mod dummy;
pub mod error;
pub mod record;
pub mod replay_buffer;

mod base;
pub use base::{
    ActionMask, Agent, Env, ExperienceBufferBase, Observation, Policy, ReplayBufferBase, Step,
    Transition, N_PLANES, UNREVEALED,
};

mod trainer;
pub use trainer::{
    CheckpointStore, EpisodeStats, EpsilonGreedy, Trainer, TrainerConfig, TrainingSession, Turn,
    FINAL_POLICY_FILE,
};
