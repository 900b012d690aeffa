//! Configuration of [`Trainer`](super::Trainer).
use super::EpsilonGreedy;
use crate::replay_buffer::IwScheduler;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Trainer`](super::Trainer).
///
/// Intervals are counted in episodes; an interval of 0 disables the event.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct TrainerConfig {
    /// Training stops before this episode index.
    pub max_episodes: usize,

    /// Number of expert-only episodes run before training from scratch.
    pub pretrain_episodes: usize,

    /// Forbidden agent moves are penalized from this episode on.
    pub penalize_forbidden_after: usize,

    /// Interval of policy distillation.
    pub distill_interval: usize,

    /// Interval of copying the policy into the distillation reference.
    pub distill_refresh_interval: usize,

    /// Interval of saving checkpoints.
    pub save_interval: usize,

    /// Number of episodes in a row that may be aborted by the environment
    /// before the error is returned.
    pub max_consecutive_env_failures: usize,

    /// Directory of checkpoints and the final policy.
    pub model_dir: String,

    /// Seed of the exploration.
    pub seed: u64,

    /// Exploration schedule.
    pub explorer: EpsilonGreedy,

    /// Schedule of the importance weight exponent.
    pub iw_scheduler: IwScheduler,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_episodes: 500_000,
            pretrain_episodes: 20_000,
            penalize_forbidden_after: 500,
            distill_interval: 2000,
            distill_refresh_interval: 2000,
            save_interval: 100,
            max_consecutive_env_failures: 5,
            model_dir: "model".to_string(),
            seed: 42,
            explorer: EpsilonGreedy::default(),
            iw_scheduler: IwScheduler::default(),
        }
    }
}

impl TrainerConfig {
    /// Sets the number of episodes.
    pub fn max_episodes(mut self, v: usize) -> Self {
        self.max_episodes = v;
        self
    }

    /// Sets the number of pretraining episodes.
    pub fn pretrain_episodes(mut self, v: usize) -> Self {
        self.pretrain_episodes = v;
        self
    }

    /// Sets the episode from which forbidden moves are penalized.
    pub fn penalize_forbidden_after(mut self, v: usize) -> Self {
        self.penalize_forbidden_after = v;
        self
    }

    /// Sets the interval of policy distillation.
    pub fn distill_interval(mut self, v: usize) -> Self {
        self.distill_interval = v;
        self
    }

    /// Sets the interval of refreshing the distillation reference.
    pub fn distill_refresh_interval(mut self, v: usize) -> Self {
        self.distill_refresh_interval = v;
        self
    }

    /// Sets the interval of saving checkpoints.
    pub fn save_interval(mut self, v: usize) -> Self {
        self.save_interval = v;
        self
    }

    /// Sets the number of consecutive aborted episodes tolerated.
    pub fn max_consecutive_env_failures(mut self, v: usize) -> Self {
        self.max_consecutive_env_failures = v;
        self
    }

    /// Sets the directory where checkpoints and the final policy are saved.
    pub fn model_dir<T: Into<String>>(mut self, model_dir: T) -> Self {
        self.model_dir = model_dir.into();
        self
    }

    /// Sets the seed of the exploration.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the exploration schedule.
    pub fn explorer(mut self, explorer: EpsilonGreedy) -> Self {
        self.explorer = explorer;
        self
    }

    /// Sets the schedule of the importance weight exponent.
    pub fn iw_scheduler(mut self, iw_scheduler: IwScheduler) -> Self {
        self.iw_scheduler = iw_scheduler;
        self
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
