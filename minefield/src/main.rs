use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use minefield::TrainConfig;
use minefield_core::record::{NullRecorder, Recorder};
use minefield_tensorboard::TensorboardRecorder;
use std::path::PathBuf;

/// Train a DQN agent on a remote minefield game server
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the agent, resuming from the last checkpoint if there is one
    Train {
        /// YAML configuration; defaults are used if omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write training records to TFRecord in this directory
        #[arg(long)]
        tensorboard: Option<PathBuf>,

        /// Override the directory of checkpoints and the final policy
        #[arg(long)]
        model_dir: Option<String>,

        /// Override the URL of the game hub
        #[arg(long)]
        url: Option<String>,
    },

    /// Write the default configuration to a YAML file
    WriteConfig {
        /// Output path
        path: PathBuf,
    },
}

fn create_recorder(tensorboard: &Option<PathBuf>) -> Box<dyn Recorder> {
    match tensorboard {
        Some(dir) => Box::new(TensorboardRecorder::new(dir)),
        None => Box::new(NullRecorder {}),
    }
}

fn train(
    config: Option<PathBuf>,
    tensorboard: Option<PathBuf>,
    model_dir: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let mut config = match config {
        Some(path) => TrainConfig::load(path)?,
        None => TrainConfig::default(),
    };
    if let Some(model_dir) = model_dir {
        config.trainer = config.trainer.model_dir(model_dir);
    }
    if let Some(url) = url {
        config.env = config.env.url(url);
    }

    let mut recorder = create_recorder(&tensorboard);
    let session = minefield::train(&config, recorder.as_mut())?;
    info!(
        "Finished {} episodes, mean reward of the last 100: {:.2}",
        session.next_episode,
        mean_tail(&session.rewards, 100)
    );
    Ok(())
}

fn mean_tail(rewards: &[f32], n: usize) -> f32 {
    let tail = &rewards[rewards.len().saturating_sub(n)..];
    if tail.is_empty() {
        0.0
    } else {
        tail.iter().sum::<f32>() / tail.len() as f32
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Train {
            config,
            tensorboard,
            model_dir,
            url,
        } => train(config, tensorboard, model_dir, url),
        Command::WriteConfig { path } => {
            TrainConfig::default().save(&path)?;
            info!("Wrote the default configuration to {:?}", path);
            Ok(())
        }
    }
}
