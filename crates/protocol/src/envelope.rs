use std::fmt;

use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{MSG_EVENT, MSG_RESULT};
use crate::messages::Command;
use crate::types::HassEvent;

/// Error code carried by a failed result.
///
/// The hub itself sends string codes (`"not_found"`), but some integrations
/// answer with numbers, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Number(n) => write!(f, "{n}"),
            ErrorCode::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(n: i64) -> Self {
        ErrorCode::Number(n)
    }
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        ErrorCode::Text(s.to_string())
    }
}

/// Error details in a result message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for HassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Envelope for every inbound message.
///
/// The hub multiplexes handshake replies, command results and pushed events
/// over a single socket; only `type` is always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HassError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<HassEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ha_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HubMessage {
    /// Creates a successful result for command `id`.
    pub fn result_ok(id: u64, result: Option<Value>) -> Self {
        Self {
            msg_type: MSG_RESULT.into(),
            id: Some(id),
            success: Some(true),
            result,
            ..Default::default()
        }
    }

    /// Creates a failed result for command `id`.
    pub fn result_err(id: u64, code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            msg_type: MSG_RESULT.into(),
            id: Some(id),
            success: Some(false),
            error: Some(HassError {
                code: code.into(),
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    /// Creates an event message. `id` is the subscription that produced it.
    pub fn event(id: Option<u64>, event: HassEvent) -> Self {
        Self {
            msg_type: MSG_EVENT.into(),
            id,
            event: Some(event),
            ..Default::default()
        }
    }

    pub fn is_result(&self) -> bool {
        self.msg_type == MSG_RESULT
    }

    pub fn is_event(&self) -> bool {
        self.msg_type == MSG_EVENT
    }

    /// Converts a `result` message into a [`ResultMessage`].
    ///
    /// Returns `None` for other message types or results without an id.
    pub fn into_result(self) -> Option<ResultMessage> {
        if !self.is_result() {
            return None;
        }
        Some(ResultMessage {
            id: self.id?,
            success: self.success.unwrap_or(false),
            result: self.result,
            error: self.error,
        })
    }
}

/// Reply correlated to a command by its numeric id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HassError>,
}

impl ResultMessage {
    /// Deserializes the `result` payload into the given type.
    ///
    /// A missing or `null` payload yields `Ok(None)`.
    pub fn parse_result<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.result {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(T::deserialize(value)?)),
        }
    }
}

/// Frames a command as `{"type": ..., "id": N, ...fields}`.
///
/// `id` is `None` only for the pre-auth handshake. The command body must
/// serialize to a JSON object (or to nothing at all).
pub fn encode_command<C: Command + ?Sized>(
    command: &C,
    id: Option<u64>,
) -> Result<Map<String, Value>, serde_json::Error> {
    let mut frame = match serde_json::to_value(command)? {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        other => {
            return Err(serde_json::Error::custom(format!(
                "command body must be a JSON object, got {other}"
            )));
        }
    };
    frame.insert("type".into(), Value::String(command.command_type().to_string()));
    match id {
        Some(id) => {
            frame.insert("id".into(), Value::from(id));
        }
        None => {
            frame.remove("id");
        }
    }
    Ok(frame)
}
