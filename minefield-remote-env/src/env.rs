//! Synchronous environment over a remote game hub.
use crate::{
    protocol::{parse_expert_action, Command, GamePayload, Notification},
    RemoteEnvConfig, SignalRTransport, Transport,
};
use anyhow::Result;
use crossbeam_channel::RecvTimeoutError;
use log::{debug, info, warn};
use minefield_core::{error::MinefieldError, ActionMask, Env, Observation, Step};
use serde_json::Value;
use std::{
    thread,
    time::{Duration, Instant},
};

/// Minefield game played against a remote server.
///
/// Exactly one request is in flight at a time. A closed connection is
/// reopened by the next [`Env::reset`].
pub struct RemoteEnv<T: Transport = SignalRTransport> {
    config: RemoteEnvConfig,
    transport: Option<T>,
    obs: Option<Observation>,
}

impl<T: Transport> RemoteEnv<T> {
    /// Wraps an open transport.
    pub fn with_transport(config: RemoteEnvConfig, transport: T) -> Self {
        Self {
            config,
            transport: Some(transport),
            obs: None,
        }
    }

    /// `true` while the connection is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// The open connection, if any.
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Configuration.
    pub fn config(&self) -> &RemoteEnvConfig {
        &self.config
    }

    fn reconnect(&mut self) -> Result<()> {
        info!("Connecting to {}", self.config.url);
        match T::connect(&self.config) {
            Ok(transport) => {
                self.transport = Some(transport);
                Ok(())
            }
            Err(e) => Err(MinefieldError::RemoteDisconnected(format!(
                "failed to connect to {}: {}",
                self.config.url, e
            ))
            .into()),
        }
    }

    /// Sends `cmd` and waits for the notification answering it.
    fn request(&mut self, cmd: &Command) -> Result<Value> {
        let result = self.request_(cmd);
        if let Err(e) = &result {
            if let Some(MinefieldError::RemoteDisconnected(_)) = e.downcast_ref::<MinefieldError>() {
                self.transport = None;
            }
        }
        result
    }

    fn request_(&mut self, cmd: &Command) -> Result<Value> {
        let timeout = self.config.get_timeout();
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => {
                return Err(
                    MinefieldError::RemoteDisconnected("not connected".to_string()).into(),
                )
            }
        };
        let receiver = transport.receiver().clone();

        // Results of earlier requests must not be taken for this one.
        for n in receiver.try_iter() {
            match n {
                Notification::Closed(reason) => {
                    return Err(MinefieldError::RemoteDisconnected(reason).into())
                }
                n => debug!("Discarded stale notification {:?}", n.kind()),
            }
        }

        transport.send(cmd)?;
        let expected = cmd.response_kind();
        let start = Instant::now();

        loop {
            let remaining = timeout.checked_sub(start.elapsed()).unwrap_or(Duration::ZERO);
            match receiver.recv_timeout(remaining) {
                Ok(n) if n.kind() == expected => {
                    return Ok(match n {
                        Notification::State(v)
                        | Notification::Step(v)
                        | Notification::ExpertAction(v) => v,
                        _ => Value::Null,
                    });
                }
                Ok(Notification::Error(msg)) => {
                    warn!("Error while waiting for {}: {}", cmd.target(), msg);
                }
                Ok(Notification::Closed(reason)) => {
                    return Err(MinefieldError::RemoteDisconnected(reason).into());
                }
                Ok(n) => debug!(
                    "Discarded notification {:?} while waiting for {}",
                    n.kind(),
                    cmd.target()
                ),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(MinefieldError::RemoteTimeout {
                        request: cmd.target().to_string(),
                        waited: start.elapsed(),
                    }
                    .into());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MinefieldError::RemoteDisconnected(
                        "notification channel closed".to_string(),
                    )
                    .into());
                }
            }
        }
    }

    /// Sends an idempotent request, resending it after transient failures.
    fn request_with_retry(&mut self, cmd: &Command, reconnect: bool) -> Result<Value> {
        let mut backoff = self.config.get_retry_backoff();
        let mut n_retries = 0;

        loop {
            let result = if self.transport.is_none() && reconnect {
                self.reconnect().and_then(|_| self.request(cmd))
            } else {
                self.request(cmd)
            };

            match result {
                Err(e)
                    if MinefieldError::is_transient_error(&e)
                        && n_retries < self.config.max_retries
                        && (reconnect || self.transport.is_some()) =>
                {
                    n_retries += 1;
                    warn!(
                        "{} failed ({}); retry {}/{} in {:?}",
                        cmd.target(),
                        e,
                        n_retries,
                        self.config.max_retries,
                        backoff
                    );
                    thread::sleep(backoff);
                    backoff *= 2;
                }
                result => return result,
            }
        }
    }
}

impl<T: Transport> Env for RemoteEnv<T> {
    type Config = RemoteEnvConfig;

    fn build(config: &Self::Config) -> Result<Self> {
        let transport = T::connect(config)?;
        Ok(Self::with_transport(config.clone(), transport))
    }

    fn reset(&mut self) -> Result<Observation> {
        self.obs = None;
        let value = self.request_with_retry(&Command::ResetGame, true)?;
        let obs = GamePayload::from_value(&value)?.observation(self.config.board_side)?;
        self.obs = Some(obs.clone());
        Ok(obs)
    }

    /// The move is never resent, since the server may already have applied it.
    fn step(&mut self, act: usize, penalize_forbidden: bool, is_agent_move: bool) -> Result<Step> {
        let cmd = Command::StepGame {
            action: act,
            penalize_forbidden,
            is_agent_move,
        };
        let value = self.request(&cmd)?;
        let payload = GamePayload::from_value(&value)?;
        let reward = payload.reward.ok_or_else(|| {
            MinefieldError::Protocol("step result carries no reward".to_string())
        })?;
        let obs = payload.observation(self.config.board_side)?;
        self.obs = Some(obs.clone());
        Ok(Step::new(obs, reward, payload.done))
    }

    fn expert_action(&mut self) -> Result<usize> {
        let value = self.request_with_retry(&Command::GetExpertAction, false)?;
        parse_expert_action(&value)
    }

    fn valid_action_mask(&self) -> Result<ActionMask> {
        match &self.obs {
            Some(obs) => Ok(obs.valid_action_mask()),
            None => Err(MinefieldError::Protocol("no observation received yet".into()).into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.transport = None;
        Ok(())
    }
}
