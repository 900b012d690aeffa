//! Optimizers.
//!
//! The moments and the step counter are kept as named tensors so that the
//! optimizer can be checkpointed together with the network parameters.
use anyhow::{anyhow, Context, Result};
use candle_core::{backprop::GradStore, DType, Device, Tensor, Var};
use candle_nn::{ParamsAdamW, VarMap};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};

const STEP_KEY: &str = "__step";

/// Configuration of optimizer for training neural networks in an RL agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        #[serde(default = "default_beta1")]
        beta1: f64,
        #[serde(default = "default_beta2")]
        beta2: f64,
        #[serde(default = "default_eps")]
        eps: f64,
        #[serde(default = "default_weight_decay")]
        weight_decay: f64,
    },

    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
    },
}

fn default_beta1() -> f64 {
    ParamsAdamW::default().beta1
}

fn default_beta2() -> f64 {
    ParamsAdamW::default().beta2
}

fn default_eps() -> f64 {
    ParamsAdamW::default().eps
}

fn default_weight_decay() -> f64 {
    ParamsAdamW::default().weight_decay
}

impl OptimizerConfig {
    /// Constructs an optimizer of the variables in `varmap`.
    pub fn build(&self, varmap: &VarMap) -> Result<Optimizer> {
        let params = match self {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => ParamsAdamW {
                lr: *lr,
                beta1: *beta1,
                beta2: *beta2,
                eps: *eps,
                weight_decay: *weight_decay,
            },
            OptimizerConfig::Adam { lr } => ParamsAdamW {
                lr: *lr,
                weight_decay: 0.0,
                ..ParamsAdamW::default()
            },
        };
        Optimizer::new(varmap, params)
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::AdamW {
                lr: _,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
            Self::Adam { lr: _ } => Self::Adam { lr },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam { lr: 1e-3 }
    }
}

struct VarAdam {
    name: String,
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

/// Adam with decoupled weight decay over the variables of a [`VarMap`].
///
/// With `weight_decay = 0` this is plain Adam.
pub struct Optimizer {
    vars: Vec<VarAdam>,
    step_t: usize,
    params: ParamsAdamW,
}

impl Optimizer {
    /// Creates an optimizer of all variables in `varmap`.
    pub fn new(varmap: &VarMap, params: ParamsAdamW) -> Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("VarMap lock poisoned"))?;
        let mut vars = data
            .iter()
            .filter(|(_, var)| var.dtype().is_float())
            .map(|(name, var)| {
                let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let second_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarAdam {
                    name: name.clone(),
                    var: var.clone(),
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        vars.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    /// Number of steps taken so far.
    pub fn step_count(&self) -> usize {
        self.step_t
    }

    /// Learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    /// Applies one update given gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let lr = self.params.lr;
        let lambda = self.params.weight_decay;
        let lr_lambda = lr * lambda;
        let beta1 = self.params.beta1;
        let beta2 = self.params.beta2;
        let scale_m = 1f64 / (1f64 - beta1.powi(self.step_t as i32));
        let scale_v = 1f64 / (1f64 - beta2.powi(self.step_t as i32));

        for var in self.vars.iter() {
            let theta = &var.var;
            let m = &var.first_moment;
            let v = &var.second_moment;
            if let Some(g) = grads.get(theta) {
                let next_m = ((m.as_tensor() * beta1)? + (g * (1.0 - beta1))?)?;
                let next_v = ((v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
                let m_hat = (&next_m * scale_m)?;
                let v_hat = (&next_v * scale_v)?;
                let next_theta = (theta.as_tensor() * (1f64 - lr_lambda))?;
                let adjusted_grad = (m_hat / (v_hat.sqrt()? + self.params.eps)?)?;
                let next_theta = (next_theta - (adjusted_grad * lr)?)?;
                m.set(&next_m)?;
                v.set(&next_v)?;
                theta.set(&next_theta)?;
            }
        }

        Ok(())
    }

    /// Applies a backward step pass.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Saves the moments and the step counter as safetensors.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let mut tensors = HashMap::new();
        for var in self.vars.iter() {
            tensors.insert(format!("m.{}", var.name), var.first_moment.as_tensor().clone());
            tensors.insert(format!("v.{}", var.name), var.second_moment.as_tensor().clone());
        }
        tensors.insert(
            STEP_KEY.to_string(),
            Tensor::new(&[self.step_t as i64], &Device::Cpu)?,
        );
        candle_core::safetensors::save(&tensors, path.as_ref())?;
        debug!("Saved optimizer state to {:?}", path.as_ref());
        Ok(())
    }

    /// Restores the moments and the step counter.
    ///
    /// Fails if the file lacks the state of any variable.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let tensors = candle_core::safetensors::load(path.as_ref(), &Device::Cpu)?;
        let step = tensors
            .get(STEP_KEY)
            .context("Optimizer state has no step counter")?
            .to_dtype(DType::I64)?
            .to_vec1::<i64>()?;
        let step = step.first().copied().unwrap_or(0).max(0) as usize;

        for var in self.vars.iter() {
            for (prefix, moment) in [("m", &var.first_moment), ("v", &var.second_moment)].iter() {
                let key = format!("{}.{}", prefix, var.name);
                let t = tensors
                    .get(&key)
                    .with_context(|| format!("Optimizer state has no entry {}", key))?;
                moment.set(&t.to_device(moment.device())?.to_dtype(moment.dtype())?)?;
            }
        }
        self.step_t = step;
        debug!("Loaded optimizer state from {:?}", path.as_ref());
        Ok(())
    }
}
