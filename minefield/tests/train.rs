use anyhow::Result;
use minefield::{MinefieldAgent, TrainConfig};
use minefield_core::{
    dummy::{ScriptedEnv, ScriptedEnvConfig},
    record::BufferedRecorder,
    replay_buffer::{PrioritizedReplayBuffer, ReplayBufferConfig},
    Env, EpsilonGreedy, ReplayBufferBase, Trainer, TrainerConfig, FINAL_POLICY_FILE,
};
use std::path::Path;
use tempdir::TempDir;

const SIDE: usize = 2;

fn env_config() -> ScriptedEnvConfig {
    ScriptedEnvConfig::new(SIDE, vec![0.5, 1.0, -1.0, 2.0])
}

fn replay_buffer_config() -> ReplayBufferConfig {
    ReplayBufferConfig::default().capacity(32)
}

fn trainer_config(model_dir: &Path, max_episodes: usize) -> TrainerConfig {
    TrainerConfig::default()
        .max_episodes(max_episodes)
        .pretrain_episodes(2)
        .penalize_forbidden_after(1)
        .distill_interval(2)
        .distill_refresh_interval(2)
        .save_interval(2)
        .model_dir(model_dir.to_string_lossy())
        .explorer(EpsilonGreedy::default().eps_start(0.2).warmup_episodes(1))
}

fn agent() -> Result<MinefieldAgent> {
    MinefieldAgent::build(TrainConfig::agent_config(SIDE).batch_size(2))
}

fn run(model_dir: &Path, max_episodes: usize, recorder: &mut BufferedRecorder) -> Result<Vec<f32>> {
    let mut trainer = Trainer::<ScriptedEnv, PrioritizedReplayBuffer>::build(
        trainer_config(model_dir, max_episodes),
        env_config(),
        replay_buffer_config(),
    );
    let mut env = ScriptedEnv::build(&env_config())?;
    let mut agent = agent()?;
    let mut buffer = PrioritizedReplayBuffer::build(&replay_buffer_config());
    let session = trainer.run(&mut env, &mut agent, &mut buffer, recorder)?;
    assert_eq!(session.next_episode, max_episodes);
    Ok(session.rewards)
}

#[test]
fn test_train_and_resume_with_dqn() -> Result<()> {
    let dir = TempDir::new("minefield_train")?;

    let mut recorder = BufferedRecorder::new();
    let rewards = run(dir.path(), 4, &mut recorder)?;
    assert_eq!(rewards.len(), 4);
    assert!(rewards.iter().all(|&r| r == 1.0 + 2.0));
    assert!(dir.path().join(FINAL_POLICY_FILE).exists());
    assert!(dir.path().join("checkpoint").join("agent").join("opt.safetensors").exists());

    let losses = recorder.scalars("loss_critic");
    assert!(!losses.is_empty());
    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(!recorder.scalars("loss_distill").is_empty());

    // resumes after the checkpoint of episode 2 and keeps the reward history
    let mut recorder = BufferedRecorder::new();
    let rewards = run(dir.path(), 6, &mut recorder)?;
    assert_eq!(rewards.len(), 6);
    assert_eq!(recorder.scalars("episode"), vec![3.0, 4.0, 5.0]);
    Ok(())
}
