//! Scripted environment and agent used in tests.
use crate::{
    error::MinefieldError, record::Record, ActionMask, Agent, Env, Observation, Policy,
    ReplayBufferBase, Step, Transition,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::BufReader,
    path::Path,
    time::Duration,
};

/// Configuration of [`ScriptedEnv`].
#[derive(Clone, Debug)]
pub struct ScriptedEnvConfig {
    /// Linear dimension of the board.
    pub side: usize,

    /// Reward of each turn of an episode; the episode ends after the last one.
    pub rewards: Vec<f32>,

    /// Indices of [`Env::step`] calls, counted over the lifetime of the
    /// environment, that fail with [`MinefieldError::RemoteTimeout`].
    pub failing_steps: Vec<usize>,
}

impl ScriptedEnvConfig {
    /// Episodes of `rewards.len()` turns on a `side` x `side` board.
    pub fn new(side: usize, rewards: Vec<f32>) -> Self {
        Self {
            side,
            rewards,
            failing_steps: vec![],
        }
    }

    /// Sets the step calls that time out.
    pub fn failing_steps(mut self, v: Vec<usize>) -> Self {
        self.failing_steps = v;
        self
    }
}

/// A deterministic environment replaying the same episode.
///
/// Every move reveals one more cell from the top-left corner, so turn `t`
/// of an episode observes `t` revealed cells. The expert always picks the
/// first unrevealed cell.
pub struct ScriptedEnv {
    config: ScriptedEnvConfig,
    obs: Option<Observation>,
    turn: usize,
    n_steps: usize,
    n_resets: usize,
    moves: Vec<(usize, bool, bool)>,
}

impl ScriptedEnv {
    fn observation(&self, n_revealed: usize) -> Observation {
        let n = self.config.side * self.config.side;
        let board = (0..n)
            .map(|i| if i < n_revealed { 1.0 } else { 0.0 })
            .collect::<Vec<_>>();
        let zeros = vec![0f32; n];
        // planes have the right length by construction
        Observation::from_planes(self.config.side, &board, &zeros, &zeros)
            .unwrap_or_else(|_| Observation::empty(self.config.side))
    }

    /// Every `(action, penalize_forbidden, is_agent_move)` passed to [`Env::step`].
    pub fn moves(&self) -> &[(usize, bool, bool)] {
        &self.moves
    }

    /// Number of calls to [`Env::reset`].
    pub fn n_resets(&self) -> usize {
        self.n_resets
    }
}

impl Env for ScriptedEnv {
    type Config = ScriptedEnvConfig;

    fn build(config: &Self::Config) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            obs: None,
            turn: 0,
            n_steps: 0,
            n_resets: 0,
            moves: vec![],
        })
    }

    fn reset(&mut self) -> Result<Observation> {
        self.n_resets += 1;
        self.turn = 0;
        let obs = self.observation(0);
        self.obs = Some(obs.clone());
        Ok(obs)
    }

    fn step(&mut self, act: usize, penalize_forbidden: bool, is_agent_move: bool) -> Result<Step> {
        let ix = self.n_steps;
        self.n_steps += 1;
        if self.config.failing_steps.contains(&ix) {
            return Err(MinefieldError::RemoteTimeout {
                request: "StepGame".to_string(),
                waited: Duration::from_millis(0),
            }
            .into());
        }

        self.moves.push((act, penalize_forbidden, is_agent_move));
        let reward = self.config.rewards.get(self.turn).copied().unwrap_or(0.0);
        self.turn += 1;
        let obs = self.observation(self.turn);
        self.obs = Some(obs.clone());
        let is_done = self.turn >= self.config.rewards.len();
        Ok(Step::new(obs, reward, is_done))
    }

    fn expert_action(&mut self) -> Result<usize> {
        Ok(self.turn)
    }

    fn valid_action_mask(&self) -> Result<ActionMask> {
        match &self.obs {
            Some(obs) => Ok(obs.valid_action_mask()),
            None => Err(MinefieldError::Protocol("no observation received yet".into()).into()),
        }
    }
}

/// Counters of the calls made to [`DummyAgent`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DummyAgentStats {
    /// Calls to [`Agent::pretrain_step`].
    pub n_pretrain_steps: usize,

    /// Optimization steps that sampled a batch.
    pub n_opts: usize,

    /// Calls to [`Agent::distill`] that sampled a batch.
    pub n_distills: usize,

    /// Calls to [`Agent::refresh_distill_reference`].
    pub n_refreshes: usize,
}

/// An agent that plays the first legal cell and counts its updates.
pub struct DummyAgent {
    batch_size: usize,
    is_train: bool,

    /// Counters, persisted by [`Agent::save_params`].
    pub stats: DummyAgentStats,

    /// Terminal flags of the transitions given to [`Agent::pretrain_step`].
    pub pretrain_terminals: Vec<bool>,
}

impl DummyAgent {
    /// Agent sampling batches of `batch_size`.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            is_train: false,
            stats: DummyAgentStats::default(),
            pretrain_terminals: vec![],
        }
    }
}

impl Policy for DummyAgent {
    fn best_action(&mut self, _obs: &Observation, mask: &ActionMask) -> Result<usize> {
        mask.legal_actions()
            .first()
            .copied()
            .ok_or_else(|| MinefieldError::NoLegalAction.into())
    }
}

impl<R: ReplayBufferBase> Agent<R> for DummyAgent {
    fn train(&mut self) {
        self.is_train = true;
    }

    fn eval(&mut self) {
        self.is_train = false;
    }

    fn is_train(&self) -> bool {
        self.is_train
    }

    fn pretrain_step(&mut self, tr: &Transition) -> Result<Record> {
        self.stats.n_pretrain_steps += 1;
        self.pretrain_terminals.push(tr.is_terminated);
        Ok(Record::from_scalar("loss_pretrain", 0.0))
    }

    fn opt_with_record(&mut self, buffer: &mut R, beta: f32) -> Result<Option<Record>> {
        if buffer.len() < self.batch_size {
            return Ok(None);
        }
        buffer.batch(self.batch_size, beta)?;
        self.stats.n_opts += 1;
        Ok(Some(Record::from_scalar("loss_critic", 1.0)))
    }

    fn distill(&mut self, buffer: &mut R) -> Result<Option<Record>> {
        if buffer.len() < self.batch_size {
            return Ok(None);
        }
        buffer.batch(self.batch_size, 0.4)?;
        self.stats.n_distills += 1;
        Ok(Some(Record::from_scalar("loss_distill", 0.0)))
    }

    fn refresh_distill_reference(&mut self) -> Result<()> {
        self.stats.n_refreshes += 1;
        Ok(())
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        let file = File::create(path.join("dummy_agent.yaml"))?;
        serde_yaml::to_writer(file, &self.stats)?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path.join("dummy_agent.yaml"))?;
        self.stats = serde_yaml::from_reader(BufReader::new(file))?;
        Ok(())
    }

    fn save_policy(&self, path: &Path) -> Result<()> {
        fs::write(path, b"dummy")?;
        Ok(())
    }
}
