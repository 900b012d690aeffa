//! Trains a DQN agent on a minefield game served by a remote SignalR hub.
//!
//! The workspace consists of the following crates:
//!
//! * `minefield-core` provides the traits of the game and the learner, the
//!   prioritized replay buffer, and the [`Trainer`] with expert pretraining,
//!   distillation and checkpointing.
//! * `minefield-remote-env` is the game server client.
//! * `minefield-candle-agent` includes the DQN agent based on
//!   [candle](https://crates.io/crates/candle-core).
//! * `minefield-tensorboard` writes training records to TFRecord.
//! * `minefield` (this crate) ties them together in a command line tool.
mod config;
pub use config::TrainConfig;

use anyhow::Result;
use minefield_candle_agent::{dqn::Dqn, mlp::Mlp};
use minefield_core::{
    record::Recorder, replay_buffer::PrioritizedReplayBuffer, Trainer, TrainingSession,
};
use minefield_remote_env::RemoteEnv;

/// Trainer of the agent against the remote game server.
pub type MinefieldTrainer = Trainer<RemoteEnv, PrioritizedReplayBuffer>;

/// The DQN agent with an MLP approximator.
pub type MinefieldAgent = Dqn<Mlp>;

/// Trains an agent from scratch or from the last checkpoint in the model directory.
pub fn train(config: &TrainConfig, recorder: &mut dyn Recorder) -> Result<TrainingSession> {
    config.validate()?;
    let mut agent = MinefieldAgent::build(config.agent.clone())?;
    let mut trainer = MinefieldTrainer::build(
        config.trainer.clone(),
        config.env.clone(),
        config.replay_buffer.clone(),
    );
    trainer.train(&mut agent, recorder)
}
