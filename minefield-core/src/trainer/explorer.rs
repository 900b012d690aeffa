//! Epsilon-greedy exploration.
use crate::{error::MinefieldError, ActionMask, Observation, Policy};
use anyhow::Result;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

/// Schedule of the exploration rate and the epsilon-greedy action selection.
///
/// Epsilon stays at `eps_start` until `warmup_episodes` and then decays by
/// the factor `decay` per episode down to `eps_final`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct EpsilonGreedy {
    /// Initial exploration rate.
    pub eps_start: f32,

    /// Lower bound of the exploration rate.
    pub eps_final: f32,

    /// Multiplicative decay per episode.
    pub decay: f32,

    /// Episodes with a fixed exploration rate.
    pub warmup_episodes: usize,
}

impl Default for EpsilonGreedy {
    fn default() -> Self {
        Self {
            eps_start: 0.5,
            eps_final: 0.05,
            decay: 0.9999963,
            warmup_episodes: 100_000,
        }
    }
}

impl EpsilonGreedy {
    /// Sets the initial exploration rate.
    pub fn eps_start(mut self, v: f32) -> Self {
        self.eps_start = v;
        self
    }

    /// Sets the lower bound of the exploration rate.
    pub fn eps_final(mut self, v: f32) -> Self {
        self.eps_final = v;
        self
    }

    /// Sets the decay factor.
    pub fn decay(mut self, v: f32) -> Self {
        self.decay = v;
        self
    }

    /// Sets the number of episodes with a fixed exploration rate.
    pub fn warmup_episodes(mut self, v: usize) -> Self {
        self.warmup_episodes = v;
        self
    }

    /// Exploration rate after finishing `episode`.
    pub fn update(&self, epsilon: f32, episode: usize) -> f32 {
        if episode > self.warmup_episodes {
            (epsilon * self.decay).max(self.eps_final)
        } else {
            epsilon
        }
    }

    /// Chooses a uniformly random legal action with probability `epsilon`,
    /// otherwise the best legal action of `policy`.
    pub fn action<P: Policy, G: Rng>(
        &self,
        policy: &mut P,
        obs: &Observation,
        mask: &ActionMask,
        epsilon: f32,
        rng: &mut G,
    ) -> Result<usize> {
        if rng.gen::<f32>() < epsilon {
            match mask.legal_actions().choose(rng) {
                Some(&act) => Ok(act),
                None => Err(MinefieldError::NoLegalAction.into()),
            }
        } else {
            policy.best_action(obs, mask)
        }
    }
}
