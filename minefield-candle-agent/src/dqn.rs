//! DQN agent.
mod base;
mod config;
mod model;
pub use base::Dqn;
pub use config::DqnConfig;
pub use model::{QNetwork, QNetworkConfig};
