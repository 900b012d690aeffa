//! DQN agent implemented with [candle](https://crates.io/crates/candle-core).
//!
//! * [`mlp::Mlp`] - the approximator mapping stacked board planes to one value per cell
//! * [`dqn::QNetwork`] - parameters of one approximator instance
//! * [`dqn::Dqn`] - the agent holding the policy, target and distillation networks
//! * [`opt::Optimizer`] - Adam/AdamW whose state can be saved and restored
pub mod dqn;
pub mod mlp;
pub mod model;
pub mod opt;
pub mod util;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The main GPU device.
    Cuda(usize),
}

impl Device {
    /// Opens the device.
    pub fn build(self) -> Result<candle_core::Device> {
        match self {
            Self::Cpu => Ok(candle_core::Device::Cpu),
            Self::Cuda(n) => Ok(candle_core::Device::new_cuda(n)?),
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}
