//! Train [`Agent`].
mod checkpoint;
mod config;
mod explorer;
use crate::{
    error::MinefieldError,
    record::{Record, RecordValue, Recorder},
    replay_buffer::IwScheduler,
    Agent, Env, ExperienceBufferBase, ReplayBufferBase, Transition,
};
use anyhow::Result;
use chrono::Local;
pub use checkpoint::{CheckpointStore, TrainingSession};
pub use config::TrainerConfig;
pub use explorer::EpsilonGreedy;
use log::{debug, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use std::{fs, path::Path};

/// File name of the policy parameters written at the end of training.
pub const FINAL_POLICY_FILE: &str = "policy_final.safetensors";

/// The player making the next move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    /// The expert oracle.
    Expert,

    /// The agent being trained.
    Agent,
}

impl Turn {
    /// The other player.
    pub fn next(self) -> Self {
        match self {
            Self::Expert => Self::Agent,
            Self::Agent => Self::Expert,
        }
    }
}

/// Summary of one training episode.
#[derive(Clone, Debug, PartialEq)]
pub struct EpisodeStats {
    /// Sum of the rewards of the agent's moves.
    pub reward: f32,

    /// Number of moves of both players.
    pub n_turns: usize,

    /// Number of optimization steps.
    pub n_opts: usize,

    /// Mean critic loss over the optimization steps, if any ran.
    pub loss_critic: Option<f32>,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the training loop and related objects.
///
/// # Training loop
///
/// 1. Restore the agent, the replay buffer and the [`TrainingSession`] from the
///    checkpoint in `model_dir`, if any.
/// 2. When starting from scratch, run `pretrain_episodes` expert-only episodes
///    ([`Trainer::pretrain`]).
/// 3. For each episode from the session's next episode up to `max_episodes`:
///     1. Run the episode ([`Trainer::run_episode`]). The expert moves on even
///        turns and the agent on odd turns; after every agent move the
///        transition is pushed to the buffer and the agent does an
///        optimization step.
///     2. If `episode > 0` and `episode % distill_interval == 0`, distill the
///        policy toward its reference.
///     3. If `episode % distill_refresh_interval == 0`, copy the policy into
///        the distillation reference.
///     4. Update epsilon with [`EpsilonGreedy::update`] and append the
///        episode reward to the session.
///     5. If `episode % save_interval == 0`, write a checkpoint.
/// 4. Save the policy to `model_dir/policy_final.safetensors`.
///
/// An episode aborted by a transient environment error is run again with the
/// same index, up to `max_consecutive_env_failures` times in a row.
///
/// # Episode
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Expert: reset
///     Expert --> Agent: step(expert action)
///     Agent --> Expert: step(epsilon-greedy action), push, optimize
///     Expert --> [*]: done
///     Agent --> [*]: done
/// ```
pub struct Trainer<E, R>
where
    E: Env,
    R: ReplayBufferBase + ExperienceBufferBase<Item = Transition>,
{
    /// Configuration of the environment for training.
    env_config: E::Config,

    /// Configuration of the replay buffer.
    replay_buffer_config: R::Config,

    /// Where to save checkpoints and the trained model.
    model_dir: String,

    max_episodes: usize,
    pretrain_episodes: usize,
    penalize_forbidden_after: usize,
    distill_interval: usize,
    distill_refresh_interval: usize,
    save_interval: usize,
    max_consecutive_env_failures: usize,
    explorer: EpsilonGreedy,
    iw_scheduler: IwScheduler,

    /// Random number generator of the exploration.
    rng: StdRng,
}

fn is_due(episode: usize, interval: usize) -> bool {
    interval > 0 && episode % interval == 0
}

/// Progress line of an episode, taken from its record.
fn progress_message(record: &Record) -> String {
    let scalar = |k: &str| record.get_scalar(k).unwrap_or(f32::NAN);
    format!(
        "Episode {}, Total Reward: {:.2}, Epsilon: {:.3}",
        scalar("episode"),
        scalar("reward"),
        scalar("epsilon")
    )
}

impl<E, R> Trainer<E, R>
where
    E: Env,
    R: ReplayBufferBase + ExperienceBufferBase<Item = Transition>,
{
    /// Constructs a trainer.
    pub fn build(
        config: TrainerConfig,
        env_config: E::Config,
        replay_buffer_config: R::Config,
    ) -> Self {
        Self {
            env_config,
            replay_buffer_config,
            model_dir: config.model_dir,
            max_episodes: config.max_episodes,
            pretrain_episodes: config.pretrain_episodes,
            penalize_forbidden_after: config.penalize_forbidden_after,
            distill_interval: config.distill_interval,
            distill_refresh_interval: config.distill_refresh_interval,
            save_interval: config.save_interval,
            max_consecutive_env_failures: config.max_consecutive_env_failures,
            explorer: config.explorer,
            iw_scheduler: config.iw_scheduler,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Runs one episode where the expert makes every move.
    ///
    /// The agent is trained on every transition, and transitions of odd turns
    /// are pushed to the buffer.
    pub fn pretrain_episode<A>(&self, env: &mut E, agent: &mut A, buffer: &mut R) -> Result<usize>
    where
        A: Agent<R>,
    {
        let mut obs = env.reset()?;
        let mut turn = 0;
        loop {
            let act = env.expert_action()?;
            let step = env.step(act, false, false)?;
            let is_done = step.is_done;
            let tr = Transition::new(obs, act, step.reward, step.obs, is_done)?;
            if turn % 2 == 1 {
                buffer.push(tr.clone())?;
            }
            agent.pretrain_step(&tr)?;
            obs = tr.next_obs;
            turn += 1;

            if is_done {
                return Ok(turn);
            }
        }
    }

    /// Runs `pretrain_episodes` expert-only episodes.
    pub fn pretrain<A>(&mut self, env: &mut E, agent: &mut A, buffer: &mut R) -> Result<()>
    where
        A: Agent<R>,
    {
        info!("Starts pretraining with {} expert episodes", self.pretrain_episodes);
        let mut episode = 0;
        let mut failures = 0;
        while episode < self.pretrain_episodes {
            match self.pretrain_episode(env, agent, buffer) {
                Ok(_) => {
                    failures = 0;
                    if episode % 10 == 0 {
                        info!("Pretrain episode {} done", episode);
                    }
                    episode += 1;
                }
                Err(e) => self.on_episode_failure(e, episode, &mut failures)?,
            }
        }
        info!("Finished pretraining, {} transitions in the buffer", buffer.len());
        Ok(())
    }

    /// Runs one training episode.
    pub fn run_episode<A>(
        &mut self,
        env: &mut E,
        agent: &mut A,
        buffer: &mut R,
        episode: usize,
        epsilon: f32,
    ) -> Result<EpisodeStats>
    where
        A: Agent<R>,
    {
        let penalize_forbidden = episode >= self.penalize_forbidden_after;
        let beta = self.iw_scheduler.beta(episode);
        let mut obs = env.reset()?;
        let mut turn = Turn::Expert;
        let mut stats = EpisodeStats {
            reward: 0.0,
            n_turns: 0,
            n_opts: 0,
            loss_critic: None,
        };
        let mut loss_sum = 0f32;

        loop {
            let is_done = match turn {
                Turn::Expert => {
                    let act = env.expert_action()?;
                    let step = env.step(act, false, false)?;
                    obs = step.obs;
                    step.is_done
                }
                Turn::Agent => {
                    let mask = env.valid_action_mask()?;
                    let act = self
                        .explorer
                        .action(agent, &obs, &mask, epsilon, &mut self.rng)?;
                    let step = env.step(act, penalize_forbidden, true)?;
                    let is_done = step.is_done;
                    stats.reward += step.reward;
                    let tr = Transition::new(obs, act, step.reward, step.obs, is_done)?;
                    obs = tr.next_obs.clone();
                    buffer.push(tr)?;

                    if let Some(record) = agent.opt_with_record(buffer, beta)? {
                        stats.n_opts += 1;
                        if let Ok(loss) = record.get_scalar("loss_critic") {
                            loss_sum += loss;
                        }
                    }
                    is_done
                }
            };
            stats.n_turns += 1;
            if is_done {
                break;
            }
            turn = turn.next();
        }

        if stats.n_opts > 0 {
            stats.loss_critic = Some(loss_sum / stats.n_opts as f32);
        }
        Ok(stats)
    }

    /// Counts a failed episode; returns the error if it is not transient or
    /// too many episodes failed in a row.
    fn on_episode_failure(
        &self,
        err: anyhow::Error,
        episode: usize,
        failures: &mut usize,
    ) -> Result<()> {
        if !MinefieldError::is_transient_error(&err) || *failures >= self.max_consecutive_env_failures
        {
            return Err(err);
        }
        *failures += 1;
        warn!(
            "Episode {} aborted ({}/{}): {:#}; restarting it",
            episode, failures, self.max_consecutive_env_failures, err
        );
        Ok(())
    }

    fn episode_record(
        &self,
        episode: usize,
        stats: &EpisodeStats,
        epsilon: f32,
        buffer_len: usize,
    ) -> Record {
        let mut record = Record::from_slice(&[
            ("episode", RecordValue::Scalar(episode as f32)),
            ("reward", RecordValue::Scalar(stats.reward)),
            ("epsilon", RecordValue::Scalar(epsilon)),
            ("beta", RecordValue::Scalar(self.iw_scheduler.beta(episode))),
            ("n_opts", RecordValue::Scalar(stats.n_opts as f32)),
            ("buffer_len", RecordValue::Scalar(buffer_len as f32)),
        ]);
        if let Some(loss) = stats.loss_critic {
            record.insert("loss_critic", RecordValue::Scalar(loss));
        }
        record.insert("datetime", RecordValue::DateTime(Local::now()));
        record
    }

    /// Runs the training loop with the given environment and buffer.
    ///
    /// Returns the session after the last episode.
    pub fn run<A>(
        &mut self,
        env: &mut E,
        agent: &mut A,
        buffer: &mut R,
        recorder: &mut dyn Recorder,
    ) -> Result<TrainingSession>
    where
        A: Agent<R>,
    {
        fs::create_dir_all(&self.model_dir)?;
        let store = CheckpointStore::new(&self.model_dir);
        let mut session = match store.load(agent, buffer)? {
            Some(session) => session,
            None => {
                info!("No checkpoint in {:?}, starting from scratch", self.model_dir);
                TrainingSession::new(self.explorer.eps_start)
            }
        };

        agent.train();
        if session.is_fresh() && self.pretrain_episodes > 0 {
            self.pretrain(env, agent, buffer)?;
        }

        let mut failures = 0;
        let mut episode = session.next_episode;
        while episode < self.max_episodes {
            let epsilon = session.epsilon;
            let stats = match self.run_episode(env, agent, buffer, episode, epsilon) {
                Ok(stats) => stats,
                Err(e) => {
                    self.on_episode_failure(e, episode, &mut failures)?;
                    continue;
                }
            };
            failures = 0;
            let mut record = self.episode_record(episode, &stats, epsilon, buffer.len());

            if episode > 0 && is_due(episode, self.distill_interval) {
                info!("Episode {}: performing policy distillation", episode);
                if let Some(r) = agent.distill(buffer)? {
                    record.merge_inplace(r);
                }
            }
            if is_due(episode, self.distill_refresh_interval) {
                agent.refresh_distill_reference()?;
                debug!("Episode {}: refreshed the distillation reference", episode);
            }

            session.epsilon = self.explorer.update(session.epsilon, episode);
            session.rewards.push(stats.reward);
            session.next_episode = episode + 1;
            info!("{}", progress_message(&record));
            recorder.write(record);

            if is_due(episode, self.save_interval) {
                let path = store.save(&session, agent, buffer)?;
                info!("Saved checkpoint at episode {} in {:?}", episode, path);
            }
            episode += 1;
        }

        let path = Path::new(&self.model_dir).join(FINAL_POLICY_FILE);
        agent.save_policy(&path)?;
        info!("Saved the final policy in {:?}", path);
        recorder.flush();
        Ok(session)
    }

    /// Builds the environment and the replay buffer, then trains the agent.
    pub fn train<A>(&mut self, agent: &mut A, recorder: &mut dyn Recorder) -> Result<TrainingSession>
    where
        A: Agent<R>,
    {
        let mut env = E::build(&self.env_config)?;
        let mut buffer = R::build(&self.replay_buffer_config);
        let session = self.run(&mut env, agent, &mut buffer, recorder);
        if let Err(e) = env.close() {
            warn!("Failed to close the environment: {:#}", e);
        }
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_message_reads_the_record() {
        let record = Record::from_slice(&[
            ("episode", RecordValue::Scalar(12.0)),
            ("reward", RecordValue::Scalar(-3.456)),
            ("epsilon", RecordValue::Scalar(0.25)),
        ]);
        assert_eq!(
            progress_message(&record),
            "Episode 12, Total Reward: -3.46, Epsilon: 0.250"
        );
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(0, 3));
        assert!(is_due(6, 3));
        assert!(!is_due(4, 3));
        assert!(!is_due(0, 0));
    }
}
