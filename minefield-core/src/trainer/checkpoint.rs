//! Checkpoints of a training run.
use crate::{error::MinefieldError, Agent, ReplayBufferBase};
use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

const CHECKPOINT_DIR: &str = "checkpoint";
const AGENT_DIR: &str = "agent";
const REPLAY_BUFFER_FILE: &str = "replay_buffer.bin";
const SESSION_FILE: &str = "session.bin";

/// Progress of a training run that is not held by the agent or the buffer.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TrainingSession {
    /// Index of the episode to run next.
    pub next_episode: usize,

    /// Current exploration rate.
    pub epsilon: f32,

    /// Total reward of every finished episode, in order.
    pub rewards: Vec<f32>,
}

impl TrainingSession {
    /// Session of a run starting from scratch.
    pub fn new(epsilon: f32) -> Self {
        Self {
            next_episode: 0,
            epsilon,
            rewards: vec![],
        }
    }

    /// `true` if no episode has been run.
    pub fn is_fresh(&self) -> bool {
        self.next_episode == 0
    }

    fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

/// Saves and restores the agent, the replay buffer and the session as one unit.
///
/// A checkpoint is the directory `<root>/checkpoint`. It is first written to
/// `checkpoint.tmp`; the previous checkpoint is moved to `checkpoint.old`
/// while the new one is renamed into place, so that a crash at any point
/// leaves one complete checkpoint behind.
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Store under directory `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory of the current checkpoint.
    pub fn path(&self) -> PathBuf {
        self.root.join(CHECKPOINT_DIR)
    }

    fn tmp_path(&self) -> PathBuf {
        self.root.join(format!("{}.tmp", CHECKPOINT_DIR))
    }

    fn old_path(&self) -> PathBuf {
        self.root.join(format!("{}.old", CHECKPOINT_DIR))
    }

    /// Writes a checkpoint, replacing the previous one.
    pub fn save<A, R>(&self, session: &TrainingSession, agent: &A, buffer: &R) -> Result<PathBuf>
    where
        A: Agent<R>,
        R: ReplayBufferBase,
    {
        let tmp = self.tmp_path();
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(tmp.join(AGENT_DIR))?;

        agent.save_params(&tmp.join(AGENT_DIR))?;
        buffer.save(&tmp.join(REPLAY_BUFFER_FILE))?;
        session.save(&tmp.join(SESSION_FILE))?;

        let path = self.path();
        let old = self.old_path();
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }
        if path.exists() {
            fs::rename(&path, &old)?;
        }
        fs::rename(&tmp, &path)?;
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }

        Ok(path)
    }

    /// Restores the agent and the buffer from the latest checkpoint.
    ///
    /// Returns `None` if there is no checkpoint. A checkpoint that exists but
    /// cannot be restored completely is an error.
    pub fn load<A, R>(&self, agent: &mut A, buffer: &mut R) -> Result<Option<TrainingSession>>
    where
        A: Agent<R>,
        R: ReplayBufferBase,
    {
        let path = if self.path().exists() {
            self.path()
        } else if self.old_path().exists() {
            warn!(
                "No checkpoint in {:?}, falling back to {:?}",
                self.path(),
                self.old_path()
            );
            self.old_path()
        } else {
            return Ok(None);
        };

        let session = TrainingSession::load(&path.join(SESSION_FILE)).map_err(|e| {
            MinefieldError::CheckpointLoad(format!("session in {:?}: {}", path, e))
        })?;
        agent.load_params(&path.join(AGENT_DIR)).map_err(|e| {
            MinefieldError::CheckpointLoad(format!("agent in {:?}: {:#}", path, e))
        })?;
        let loaded = match buffer.load(&path.join(REPLAY_BUFFER_FILE)) {
            Ok(loaded) => loaded,
            Err(e) => match e.downcast::<MinefieldError>() {
                Ok(e @ MinefieldError::CheckpointLoad(_)) => return Err(e.into()),
                Ok(e) => return Err(MinefieldError::CheckpointLoad(e.to_string()).into()),
                Err(e) => return Err(MinefieldError::CheckpointLoad(format!("{:#}", e)).into()),
            },
        };
        if !loaded {
            return Err(MinefieldError::CheckpointLoad(format!(
                "replay buffer missing in {:?}",
                path
            ))
            .into());
        }

        info!(
            "Restored checkpoint {:?}, resuming from episode {}",
            path, session.next_episode
        );
        Ok(Some(session))
    }
}
