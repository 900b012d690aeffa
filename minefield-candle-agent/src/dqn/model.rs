use crate::{
    model::SubModel1,
    opt::{Optimizer, OptimizerConfig},
    util::{hard_copy, track, OutDim},
};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`QNetwork`].
pub struct QNetworkConfig<Q>
where
    Q: OutDim,
{
    pub(super) q_config: Option<Q>,
    pub(super) opt_config: OptimizerConfig,
}

impl<Q> Default for QNetworkConfig<Q>
where
    Q: OutDim,
{
    fn default() -> Self {
        Self {
            q_config: None,
            opt_config: OptimizerConfig::default(),
        }
    }
}

impl<Q> QNetworkConfig<Q>
where
    Q: DeserializeOwned + Serialize + OutDim,
{
    /// Sets configurations for action-value function.
    pub fn q_config(mut self, v: Q) -> Self {
        self.q_config = Some(v);
        self
    }

    /// Sets output dimension of the model.
    pub fn out_dim(mut self, v: usize) -> Self {
        if let Some(q_config) = &mut self.q_config {
            q_config.set_out_dim(v);
        }
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Configuration of the action-value function.
    pub fn get_q_config(&self) -> Option<&Q> {
        self.q_config.as_ref()
    }

    /// Optimizer configuration.
    pub fn get_opt_config(&self) -> &OptimizerConfig {
        &self.opt_config
    }

    /// Constructs [`QNetworkConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`QNetworkConfig`] to as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// One instance of the action-value function with its own parameters.
///
/// The agent holds three of them: the policy network trained by gradient
/// descent, and the target and distillation reference networks, which only
/// receive parameters copied from the policy network.
pub struct QNetwork<Q>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    device: Device,
    varmap: VarMap,
    out_dim: usize,
    q: Q,
    q_config: Q::Config,
}

impl<Q> QNetwork<Q>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    /// Constructs [`QNetwork`] with freshly initialized parameters.
    pub fn build(q_config: Q::Config, device: Device) -> Result<Self> {
        let out_dim = q_config.get_out_dim();
        let varmap = VarMap::new();
        let q = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            Q::build(vb, q_config.clone())?
        };

        Ok(Self {
            device,
            varmap,
            out_dim,
            q,
            q_config,
        })
    }

    /// Constructs [`QNetwork`] from [`QNetworkConfig`].
    pub fn from_config(config: &QNetworkConfig<Q::Config>, device: Device) -> Result<Self> {
        let q_config = config.q_config.clone().context("q_config is not set.")?;
        Self::build(q_config, device)
    }

    /// Returns a network with the same architecture and a copy of the
    /// parameters of this one.
    pub fn duplicate(&self) -> Result<Self> {
        let dup = Self::build(self.q_config.clone(), self.device.clone())?;
        dup.hard_copy_from(self)?;
        Ok(dup)
    }

    /// Outputs the action-values given a batch of observations.
    pub fn forward(&self, obs: &Tensor) -> Result<Tensor> {
        self.q.forward(obs)
    }

    /// Number of actions.
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Variables of the network.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Constructs an optimizer of the parameters of this network.
    pub fn build_optimizer(&self, opt_config: &OptimizerConfig) -> Result<Optimizer> {
        opt_config.build(&self.varmap)
    }

    /// `self ← tau * src + (1 - tau) * self`.
    pub fn soft_update_from(&self, src: &Self, tau: f64) -> Result<()> {
        track(&self.varmap, &src.varmap, tau)
    }

    /// Overwrites the parameters with those of `src`.
    pub fn hard_copy_from(&self, src: &Self) -> Result<()> {
        hard_copy(&self.varmap, &src.varmap)
    }

    /// Saves the parameters as safetensors.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save qnetwork to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads the parameters from safetensors.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load qnetwork from {:?}", path.as_ref());
        Ok(())
    }
}
