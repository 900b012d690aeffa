//! Configuration of [`RemoteEnv`](crate::RemoteEnv).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
    time::Duration,
};

/// Configuration of [`RemoteEnv`](crate::RemoteEnv).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RemoteEnvConfig {
    /// URL of the game hub.
    pub url: String,

    /// Linear dimension of the board.
    pub board_side: usize,

    /// Deadline of a single request in milliseconds.
    pub timeout_ms: u64,

    /// Number of times `reset` and `expert_action` are resent after a
    /// transient failure.
    pub max_retries: usize,

    /// Wait before the first resend in milliseconds; doubled on each resend.
    pub retry_backoff_ms: u64,

    /// Wait between long polls after a failed poll, in milliseconds.
    pub poll_interval_ms: u64,

    /// Consecutive failed polls after which the connection is considered closed.
    pub max_poll_failures: usize,
}

impl Default for RemoteEnvConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000/gamehub".to_string(),
            board_side: 15,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_backoff_ms: 500,
            poll_interval_ms: 50,
            max_poll_failures: 10,
        }
    }
}

impl RemoteEnvConfig {
    /// Sets the URL of the game hub.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the board size.
    pub fn board_side(mut self, v: usize) -> Self {
        self.board_side = v;
        self
    }

    /// Sets the request deadline.
    pub fn timeout(mut self, v: Duration) -> Self {
        self.timeout_ms = v.as_millis() as u64;
        self
    }

    /// Sets the number of resends.
    pub fn max_retries(mut self, v: usize) -> Self {
        self.max_retries = v;
        self
    }

    /// Sets the initial backoff.
    pub fn retry_backoff(mut self, v: Duration) -> Self {
        self.retry_backoff_ms = v.as_millis() as u64;
        self
    }

    /// Deadline of a single request.
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Wait before the first resend.
    pub fn get_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Wait between failed polls.
    pub fn get_poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Constructs [`RemoteEnvConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`RemoteEnvConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
