//! Scheduling the exponent of importance weight for PER.
use serde::{Deserialize, Serialize};

/// Scheduler of the exponent of importance weight for PER.
///
/// $\beta$ grows linearly with the episode index from `beta_0` and stays at
/// `beta_final` from episode `n_episodes_final` on.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct IwScheduler {
    /// Initial value of $\beta$.
    pub beta_0: f32,

    /// Final value of $\beta$.
    pub beta_final: f32,

    /// Episode when beta reaches its final value.
    pub n_episodes_final: usize,
}

impl Default for IwScheduler {
    fn default() -> Self {
        Self {
            beta_0: 0.4,
            beta_final: 1.0,
            n_episodes_final: 6000,
        }
    }
}

impl IwScheduler {
    /// Creates a scheduler.
    pub fn new(beta_0: f32, beta_final: f32, n_episodes_final: usize) -> Self {
        Self {
            beta_0,
            beta_final,
            n_episodes_final,
        }
    }

    /// Gets the exponent of importance sampling weight at the given episode.
    pub fn beta(&self, episode: usize) -> f32 {
        if episode >= self.n_episodes_final {
            self.beta_final
        } else {
            let d = self.beta_final - self.beta_0;
            self.beta_0 + d * (episode as f32 / self.n_episodes_final as f32)
        }
    }
}
