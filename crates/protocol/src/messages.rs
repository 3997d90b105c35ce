use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    CMD_CALL_SERVICE, CMD_SUBSCRIBE_EVENTS, CMD_SUBSCRIBE_TRIGGER, CMD_UNSUBSCRIBE_EVENTS,
    MSG_AUTH,
};
use crate::types::ServiceTarget;

/// An outbound request expecting at most one correlated result.
///
/// The serialized body is merged with `type` and `id` by
/// [`encode_command`](crate::envelope::encode_command).
pub trait Command: Serialize + Send + Sync {
    fn command_type(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Sent in reply to `auth_required`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub access_token: String,
}

impl AuthMessage {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            msg_type: MSG_AUTH.into(),
            access_token: access_token.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A command that carries nothing but its type (`get_states`, registry lists, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimpleCommand {
    #[serde(skip)]
    command_type: String,
}

impl SimpleCommand {
    pub fn new(command_type: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
        }
    }
}

impl Command for SimpleCommand {
    fn command_type(&self) -> &str {
        &self.command_type
    }
}

/// Calls a service in a domain, e.g. `light.turn_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallServiceCommand {
    pub domain: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ServiceTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_response: Option<bool>,
}

impl CallServiceCommand {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data: None,
            target: None,
            return_response: None,
        }
    }

    pub fn with_service_data(mut self, data: Value) -> Self {
        self.service_data = Some(data);
        self
    }

    pub fn with_target(mut self, target: ServiceTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_response(mut self) -> Self {
        self.return_response = Some(true);
        self
    }
}

impl Command for CallServiceCommand {
    fn command_type(&self) -> &str {
        CMD_CALL_SERVICE
    }
}

/// Subscribes to hub events. `None` subscribes to every event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeEventsCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl Command for SubscribeEventsCommand {
    fn command_type(&self) -> &str {
        CMD_SUBSCRIBE_EVENTS
    }
}

/// Subscribes to an automation trigger. Matching events carry the id of
/// this command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeTriggerCommand {
    pub trigger: Value,
}

impl Command for SubscribeTriggerCommand {
    fn command_type(&self) -> &str {
        CMD_SUBSCRIBE_TRIGGER
    }
}

/// Cancels a subscription created by `subscribe_events` or `subscribe_trigger`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeEventsCommand {
    pub subscription: u64,
}

impl Command for UnsubscribeEventsCommand {
    fn command_type(&self) -> &str {
        CMD_UNSUBSCRIBE_EVENTS
    }
}
