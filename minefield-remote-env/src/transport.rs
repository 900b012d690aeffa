//! Connections to the game hub.
use crate::{
    protocol::{parse_messages, Command, Notification, RECORD_SEPARATOR},
    RemoteEnvConfig,
};
use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, trace, warn};
use minefield_core::error::MinefieldError;
use reqwest::{blocking::Client, StatusCode};
use serde::Deserialize;
use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

/// A duplex connection to the game hub.
///
/// Commands are sent synchronously; notifications arrive through a channel
/// fed independently of the caller.
pub trait Transport {
    /// Opens a connection.
    fn connect(config: &RemoteEnvConfig) -> Result<Self>
    where
        Self: Sized;

    /// Sends a command.
    fn send(&mut self, cmd: &Command) -> Result<()>;

    /// Channel of the notifications received so far.
    fn receiver(&self) -> &Receiver<Notification>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    connection_id: Option<String>,
    connection_token: Option<String>,
    error: Option<String>,
}

/// SignalR client over the long polling transport with the JSON hub protocol.
///
/// A background thread keeps a `GET` poll open and forwards every message
/// it receives as a [`Notification`]. The connection is deleted on drop.
pub struct SignalRTransport {
    client: Client,
    url: String,
    id: String,
    receiver: Receiver<Notification>,
    stop: Arc<Mutex<bool>>,
}

impl SignalRTransport {
    fn negotiate(client: &Client, url: &str) -> Result<String> {
        let resp = client
            .post(format!("{}/negotiate", url))
            .query(&[("negotiateVersion", "1")])
            .send()?
            .error_for_status()?
            .json::<NegotiateResponse>()?;
        if let Some(e) = resp.error {
            return Err(anyhow!("Negotiation with {} failed: {}", url, e));
        }
        resp.connection_token
            .or(resp.connection_id)
            .ok_or_else(|| anyhow!("Negotiation with {} returned no connection id", url))
    }

    fn post(&self, body: String) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .query(&[("id", self.id.as_str())])
            .header("Content-Type", "text/plain;charset=UTF-8")
            .body(body)
            .send()
            .map_err(|e| MinefieldError::RemoteDisconnected(e.to_string()))?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(MinefieldError::RemoteDisconnected(
                "connection is unknown to the server".to_string(),
            )
            .into()),
            s => Err(anyhow!("Sending to {} failed with status {}", self.url, s)),
        }
    }

    fn is_stopped(stop: &Mutex<bool>) -> bool {
        stop.lock().map(|s| *s).unwrap_or(true)
    }

    /// Forwards polled messages until the connection ends.
    fn poll_loop(
        url: String,
        id: String,
        sender: Sender<Notification>,
        stop: Arc<Mutex<bool>>,
        poll_interval: Duration,
        max_poll_failures: usize,
    ) {
        let client = match Client::builder().timeout(None).build() {
            Ok(client) => client,
            Err(e) => {
                let _ = sender.send(Notification::Closed(e.to_string()));
                return;
            }
        };
        let mut n_failures = 0;

        while !Self::is_stopped(&stop) {
            let resp = client.get(&url).query(&[("id", id.as_str())]).send();
            let notifications = match resp {
                Ok(resp) if resp.status() == StatusCode::NO_CONTENT => {
                    vec![Notification::Closed("server ended the poll".to_string())]
                }
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    vec![Notification::Closed("connection is unknown to the server".to_string())]
                }
                Ok(resp) if resp.status().is_success() => match resp.text() {
                    Ok(text) => {
                        n_failures = 0;
                        trace!("Polled {:?}", text);
                        parse_messages(&text)
                    }
                    Err(e) => vec![Notification::Error(e.to_string())],
                },
                Ok(resp) => vec![Notification::Error(format!("poll status {}", resp.status()))],
                Err(e) => vec![Notification::Error(e.to_string())],
            };

            for n in notifications {
                let closed = matches!(n, Notification::Closed(_));
                if let Notification::Error(_) = n {
                    n_failures += 1;
                    if n_failures >= max_poll_failures {
                        let _ = sender.send(Notification::Closed(format!(
                            "{} consecutive failed polls",
                            n_failures
                        )));
                        return;
                    }
                    thread::sleep(poll_interval);
                }
                if sender.send(n).is_err() || closed {
                    debug!("Stopped polling {}", url);
                    return;
                }
            }
        }
    }
}

impl Transport for SignalRTransport {
    fn connect(config: &RemoteEnvConfig) -> Result<Self> {
        let url = config.url.trim_end_matches('/').to_string();
        let client = Client::builder().timeout(config.get_timeout()).build()?;
        let id = Self::negotiate(&client, &url)?;
        let (sender, receiver) = unbounded();
        let stop = Arc::new(Mutex::new(false));

        let transport = Self {
            client,
            url: url.clone(),
            id: id.clone(),
            receiver,
            stop: stop.clone(),
        };
        transport.post(format!(
            "{{\"protocol\":\"json\",\"version\":1}}{}",
            RECORD_SEPARATOR
        ))?;

        let poll_interval = config.get_poll_interval();
        let max_poll_failures = config.max_poll_failures.max(1);
        thread::spawn(move || {
            Self::poll_loop(url, id, sender, stop, poll_interval, max_poll_failures)
        });
        info!("Connected to {}", transport.url);

        Ok(transport)
    }

    fn send(&mut self, cmd: &Command) -> Result<()> {
        trace!("Send {:?}", cmd);
        self.post(cmd.to_message())
    }

    fn receiver(&self) -> &Receiver<Notification> {
        &self.receiver
    }
}

impl Drop for SignalRTransport {
    fn drop(&mut self) {
        if let Ok(mut stop) = self.stop.lock() {
            *stop = true;
        }
        let resp = self
            .client
            .delete(&self.url)
            .query(&[("id", self.id.as_str())])
            .send();
        match resp {
            Ok(_) => info!("Closed connection to {}", self.url),
            Err(e) => warn!("Failed to close connection to {}: {}", self.url, e),
        }
    }
}
