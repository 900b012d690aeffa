//! Configuration of DQN agent.
use super::QNetworkConfig;
use crate::{util::OutDim, Device};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Constructs [`Dqn`](super::Dqn).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct DqnConfig<Q>
where
    Q: OutDim,
{
    pub(super) model_config: QNetworkConfig<Q>,
    pub(super) batch_size: usize,
    pub(super) discount_factor: f64,
    pub(super) tau: f64,
    pub(super) n_distill_passes: usize,
    pub(super) distill_beta: f32,
    pub(super) priority_eps: f32,
    pub device: Option<Device>,
}

impl<Q> Default for DqnConfig<Q>
where
    Q: OutDim,
{
    /// Batches of 128, discount factor 0.99 and soft update coefficient 0.01.
    fn default() -> Self {
        Self {
            model_config: Default::default(),
            batch_size: 128,
            discount_factor: 0.99,
            tau: 0.01,
            n_distill_passes: 10,
            distill_beta: 0.4,
            priority_eps: 1e-5,
            device: None,
        }
    }
}

impl<Q> DqnConfig<Q>
where
    Q: OutDim + Serialize + for<'de> Deserialize<'de>,
{
    /// Batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.discount_factor = v;
        self
    }

    /// Soft update coefficient.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// Number of optimization passes in a distillation round.
    pub fn n_distill_passes(mut self, v: usize) -> Self {
        self.n_distill_passes = v;
        self
    }

    /// Exponent of importance weights of batches sampled for distillation.
    pub fn distill_beta(mut self, v: f32) -> Self {
        self.distill_beta = v;
        self
    }

    /// Constant added to absolute TD errors to obtain priorities.
    pub fn priority_eps(mut self, v: f32) -> Self {
        self.priority_eps = v;
        self
    }

    /// Sets the configuration of the model.
    pub fn model_config(mut self, model_config: QNetworkConfig<Q>) -> Self {
        self.model_config = model_config;
        self
    }

    /// Configuration of the model.
    pub fn get_model_config(&self) -> &QNetworkConfig<Q> {
        &self.model_config
    }

    /// Device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Constructs [`DqnConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`DqnConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mlp::MlpConfig, opt::OptimizerConfig};
    use tempdir::TempDir;

    #[test]
    fn test_serde_dqn_config() -> Result<()> {
        let config = DqnConfig::default()
            .model_config(
                QNetworkConfig::default()
                    .q_config(MlpConfig::for_board(5))
                    .opt_config(OptimizerConfig::Adam { lr: 5e-4 }),
            )
            .batch_size(32)
            .device(Device::Cpu);

        let dir = TempDir::new("dqn_config")?;
        let path = dir.path().join("dqn_config.yaml");
        config.save(&path)?;
        let config_ = DqnConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }

    #[test]
    fn test_defaults() {
        let config = DqnConfig::<MlpConfig>::default();
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.discount_factor, 0.99);
        assert_eq!(config.tau, 0.01);
        assert_eq!(config.n_distill_passes, 10);
        assert_eq!(config.priority_eps, 1e-5);
    }
}
