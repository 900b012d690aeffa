//! Minefield game served by a remote SignalR hub.
//!
//! The game server pushes its results as notifications. [`RemoteEnv`] turns
//! them into the synchronous [`Env`](minefield_core::Env) interface: every
//! request sends one command through a [`Transport`] and blocks until the
//! matching notification arrives or a deadline passes.
mod config;
mod env;
mod protocol;
mod transport;
pub use config::RemoteEnvConfig;
pub use env::RemoteEnv;
pub use protocol::{parse_messages, Command, GamePayload, Notification, NotificationKind};
pub use transport::{SignalRTransport, Transport};
