//! Messages of the SignalR JSON hub protocol used by the game server.
use anyhow::Result;
use log::{debug, trace};
use minefield_core::{error::MinefieldError, Observation};
use serde::Deserialize;
use serde_json::{json, Value};

/// Terminator of every message of the JSON hub protocol.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const MSG_INVOCATION: u64 = 1;
const MSG_PING: u64 = 6;
const MSG_CLOSE: u64 = 7;

/// A command sent to the game server.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Starts a new game.
    ResetGame,

    /// Plays a move.
    StepGame {
        /// Cell index.
        action: usize,

        /// Whether forbidden moves are penalized.
        penalize_forbidden: bool,

        /// Whether the move is made by the agent.
        is_agent_move: bool,
    },

    /// Asks the expert oracle for its move.
    GetExpertAction,
}

impl Command {
    /// Name of the hub method.
    pub fn target(&self) -> &'static str {
        match self {
            Self::ResetGame => "ResetGame",
            Self::StepGame { .. } => "StepGame",
            Self::GetExpertAction => "GetExpertAction",
        }
    }

    /// Arguments of the hub method.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::ResetGame | Self::GetExpertAction => vec![],
            Self::StepGame {
                action,
                penalize_forbidden,
                is_agent_move,
            } => vec![json!(action), json!(penalize_forbidden), json!(is_agent_move)],
        }
    }

    /// Kind of the notification answering this command.
    pub fn response_kind(&self) -> NotificationKind {
        match self {
            Self::ResetGame => NotificationKind::State,
            Self::StepGame { .. } => NotificationKind::Step,
            Self::GetExpertAction => NotificationKind::ExpertAction,
        }
    }

    /// Non-blocking invocation message, terminated by the record separator.
    pub fn to_message(&self) -> String {
        let msg = json!({
            "type": MSG_INVOCATION,
            "target": self.target(),
            "arguments": self.arguments(),
        });
        format!("{}{}", msg, RECORD_SEPARATOR)
    }
}

/// Kinds of [`Notification`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    /// See [`Notification::State`].
    State,

    /// See [`Notification::Step`].
    Step,

    /// See [`Notification::ExpertAction`].
    ExpertAction,

    /// See [`Notification::Error`].
    Error,

    /// See [`Notification::Closed`].
    Closed,
}

/// A message pushed by the game server or the transport.
///
/// Payloads are kept as received and decoded by the requesting side, so that
/// malformed payloads fail the request that asked for them.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// `ReceiveState`, the board after a reset.
    State(Value),

    /// `ReceiveStep`, the board, reward and terminal flag after a move.
    Step(Value),

    /// `ReceiveExpertAction`, the move of the expert oracle.
    ExpertAction(Value),

    /// A recoverable transport or server error.
    Error(String),

    /// The connection was closed.
    Closed(String),
}

impl Notification {
    /// Kind of the notification.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::State(_) => NotificationKind::State,
            Self::Step(_) => NotificationKind::Step,
            Self::ExpertAction(_) => NotificationKind::ExpertAction,
            Self::Error(_) => NotificationKind::Error,
            Self::Closed(_) => NotificationKind::Closed,
        }
    }
}

fn protocol_error(msg: impl Into<String>) -> anyhow::Error {
    MinefieldError::Protocol(msg.into()).into()
}

/// Board planes, and the reward and terminal flag of a move.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GamePayload {
    /// Revealed flags, 0 for unrevealed cells.
    pub board: Vec<f32>,

    /// Known mines.
    pub mines: Vec<f32>,

    /// Numbers of adjacent mines.
    pub numbers: Vec<f32>,

    /// Whether the game is over.
    #[serde(default)]
    pub done: bool,

    /// Reward of the move; absent in states after a reset.
    #[serde(default)]
    pub reward: Option<f32>,
}

impl GamePayload {
    /// Decodes the first argument of `ReceiveState` or `ReceiveStep`.
    ///
    /// The argument is either a JSON object or a string holding one.
    pub fn from_value(value: &Value) -> Result<Self> {
        let parsed = match value {
            Value::String(s) => serde_json::from_str(s),
            v => serde_json::from_value(v.clone()),
        };
        parsed.map_err(|e| protocol_error(format!("malformed game payload: {}", e)))
    }

    /// Stacks the planes into an observation of a `side` x `side` board.
    pub fn observation(&self, side: usize) -> Result<Observation> {
        Observation::from_planes(side, &self.board, &self.mines, &self.numbers)
    }
}

/// Decodes the first argument of `ReceiveExpertAction`.
///
/// The action is an integer or a string holding one.
pub fn parse_expert_action(value: &Value) -> Result<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .map(|a| a as usize)
        .ok_or_else(|| protocol_error(format!("expert action is not a cell index: {}", value)))
}

fn first_argument(msg: &Value) -> Value {
    msg.get("arguments")
        .and_then(|args| args.get(0))
        .cloned()
        .unwrap_or(Value::Null)
}

fn parse_message(msg: &Value) -> Option<Notification> {
    let msg_type = match msg.get("type").and_then(Value::as_u64) {
        Some(t) => t,
        // The handshake response is the only message without a type.
        None => {
            return msg
                .get("error")
                .and_then(Value::as_str)
                .map(|e| Notification::Closed(format!("handshake rejected: {}", e)));
        }
    };

    match msg_type {
        MSG_INVOCATION => {
            let target = msg.get("target").and_then(Value::as_str).unwrap_or("");
            match target {
                "ReceiveState" => Some(Notification::State(first_argument(msg))),
                "ReceiveStep" => Some(Notification::Step(first_argument(msg))),
                "ReceiveExpertAction" => Some(Notification::ExpertAction(first_argument(msg))),
                _ => {
                    debug!("Ignored invocation of unknown target '{}'", target);
                    None
                }
            }
        }
        MSG_PING => None,
        MSG_CLOSE => {
            let reason = msg
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("closed by server");
            Some(Notification::Closed(reason.to_string()))
        }
        t => {
            trace!("Ignored message of type {}", t);
            None
        }
    }
}

/// Splits a poll response into messages and converts them to notifications.
///
/// Pings, the empty handshake response and unknown targets produce nothing;
/// an unparsable message produces [`Notification::Error`].
pub fn parse_messages(text: &str) -> Vec<Notification> {
    text.split(RECORD_SEPARATOR)
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| match serde_json::from_str::<Value>(s) {
            Ok(msg) => parse_message(&msg),
            Err(e) => Some(Notification::Error(format!("unparsable message: {}", e))),
        })
        .collect()
}
