use anyhow::Result;
use minefield::{MinefieldAgent, TrainConfig};
use minefield_candle_agent::{
    dqn::{DqnConfig, QNetworkConfig},
    mlp::MlpConfig,
    Device,
};
use tempdir::TempDir;

#[test]
fn test_default_config_round_trip() -> Result<()> {
    let dir = TempDir::new("minefield_config")?;
    let path = dir.path().join("train.yaml");
    let config = TrainConfig::default();
    config.save(&path)?;
    assert_eq!(TrainConfig::load(&path)?, config);
    config.validate()?;

    assert_eq!(config.trainer.max_episodes, 500_000);
    assert_eq!(config.replay_buffer.capacity, 100_000);
    assert_eq!(config.env.url, "http://localhost:5000/gamehub");
    Ok(())
}

#[test]
fn test_partial_yaml() -> Result<()> {
    let config: TrainConfig = serde_yaml::from_str(
        "trainer:\n  max_episodes: 10\nenv:\n  url: http://game:5000/gamehub\n",
    )?;
    assert_eq!(config.trainer.max_episodes, 10);
    assert_eq!(config.trainer.save_interval, 100);
    assert_eq!(config.env.url, "http://game:5000/gamehub");
    config.validate()?;
    Ok(())
}

#[test]
fn test_network_must_fit_board() -> Result<()> {
    let mut config = TrainConfig::default();
    config.env.board_side = 9;
    assert!(config.validate().is_err());

    config.agent = TrainConfig::agent_config(9);
    config.validate()?;

    config.agent = DqnConfig::default()
        .model_config(QNetworkConfig::default())
        .device(Device::Cpu);
    assert!(config.validate().is_err());

    config.agent = DqnConfig::default()
        .model_config(QNetworkConfig::default().q_config(MlpConfig::for_board(9).units(vec![32])))
        .device(Device::Cpu);
    config.validate()?;
    Ok(())
}

#[test]
fn test_default_agent_builds() -> Result<()> {
    let agent = MinefieldAgent::build(TrainConfig::agent_config(3))?;
    assert_eq!(agent.qnet().out_dim(), 9);
    Ok(())
}
