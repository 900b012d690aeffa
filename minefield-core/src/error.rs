//! Errors in the library.
use std::time::Duration;
use thiserror::Error;

/// Errors in the library.
///
/// Functions in this workspace return [`anyhow::Result`]; the variants below are
/// wrapped in [`anyhow::Error`] and can be recovered with `downcast_ref` where the
/// caller's behavior depends on the kind of failure.
#[derive(Error, Debug)]
pub enum MinefieldError {
    /// No matching notification arrived from the game server in time.
    #[error("Remote request '{request}' timed out after {waited:?}")]
    RemoteTimeout {
        /// Name of the request, e.g. `StepGame`.
        request: String,

        /// Time spent waiting for the response.
        waited: Duration,
    },

    /// The connection to the game server was closed.
    #[error("Remote connection closed: {0}")]
    RemoteDisconnected(String),

    /// A payload from the game server does not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A checkpoint exists but could not be restored.
    #[error("Failed to load checkpoint: {0}")]
    CheckpointLoad(String),

    /// More samples were requested than the replay buffer holds.
    #[error("Requested {requested} samples but the replay buffer holds {available}")]
    InsufficientSamples {
        /// Batch size.
        requested: usize,

        /// Number of transitions in the buffer.
        available: usize,
    },

    /// Every cell of the board is already revealed.
    #[error("No legal action in the current observation")]
    NoLegalAction,

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKey(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueType(String),
}

impl MinefieldError {
    /// Returns `true` if the error is caused by the remote server being
    /// unavailable, so that retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RemoteTimeout { .. } | Self::RemoteDisconnected(_)
        )
    }

    /// Returns `true` if `err` wraps a transient [`MinefieldError`].
    pub fn is_transient_error(err: &anyhow::Error) -> bool {
        err.downcast_ref::<MinefieldError>()
            .map(|e| e.is_transient())
            .unwrap_or(false)
    }
}
