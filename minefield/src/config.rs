//! Configuration of a training run.
use anyhow::{anyhow, Result};
use minefield_candle_agent::{
    dqn::{DqnConfig, QNetworkConfig},
    mlp::MlpConfig,
    opt::OptimizerConfig,
    util::OutDim,
    Device,
};
use minefield_core::{replay_buffer::ReplayBufferConfig, TrainerConfig, N_PLANES};
use minefield_remote_env::RemoteEnvConfig;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Every setting of a training run, stored in a single YAML file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TrainConfig {
    /// Schedule of the training loop.
    pub trainer: TrainerConfig,

    /// Prioritized replay buffer.
    pub replay_buffer: ReplayBufferConfig,

    /// DQN agent.
    pub agent: DqnConfig<MlpConfig>,

    /// Game server.
    pub env: RemoteEnvConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let env = RemoteEnvConfig::default();
        Self {
            trainer: TrainerConfig::default(),
            replay_buffer: ReplayBufferConfig::default(),
            agent: Self::agent_config(env.board_side),
            env,
        }
    }
}

impl TrainConfig {
    /// Agent for a `side` x `side` board.
    pub fn agent_config(side: usize) -> DqnConfig<MlpConfig> {
        let model_config = QNetworkConfig::default()
            .q_config(MlpConfig::for_board(side))
            .opt_config(OptimizerConfig::Adam { lr: 1e-3 });
        DqnConfig::default()
            .model_config(model_config)
            .device(Device::Cpu)
    }

    /// Checks that the network fits the board of the game server.
    pub fn validate(&self) -> Result<()> {
        let side = self.env.board_side;
        let q_config = self
            .agent
            .get_model_config()
            .get_q_config()
            .ok_or_else(|| anyhow!("agent.model_config.q_config is not set"))?;
        let n = side * side;
        if q_config.in_dim() != N_PLANES * n || q_config.get_out_dim() != n {
            return Err(anyhow!(
                "Network {} -> {} does not fit a {}x{} board ({} -> {})",
                q_config.in_dim(),
                q_config.get_out_dim(),
                side,
                side,
                N_PLANES * n,
                n
            ));
        }
        Ok(())
    }

    /// Constructs [`TrainConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
