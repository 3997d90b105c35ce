//! Message, command and event type names used on the wire.

// ---------------------------------------------------------------------------
// Inbound message types
// ---------------------------------------------------------------------------

pub const MSG_AUTH_REQUIRED: &str = "auth_required";
pub const MSG_AUTH_OK: &str = "auth_ok";
pub const MSG_AUTH_INVALID: &str = "auth_invalid";
pub const MSG_RESULT: &str = "result";
pub const MSG_EVENT: &str = "event";
pub const MSG_PONG: &str = "pong";

/// Outbound handshake message. The only frame sent without an `id`.
pub const MSG_AUTH: &str = "auth";

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

pub const CMD_GET_STATES: &str = "get_states";
pub const CMD_GET_CONFIG: &str = "get_config";
pub const CMD_GET_SERVICES: &str = "get_services";
pub const CMD_CALL_SERVICE: &str = "call_service";
pub const CMD_SUBSCRIBE_EVENTS: &str = "subscribe_events";
pub const CMD_SUBSCRIBE_TRIGGER: &str = "subscribe_trigger";
pub const CMD_UNSUBSCRIBE_EVENTS: &str = "unsubscribe_events";
pub const CMD_PING: &str = "ping";

pub const CMD_AREA_REGISTRY_LIST: &str = "config/area_registry/list";
pub const CMD_DEVICE_REGISTRY_LIST: &str = "config/device_registry/list";
pub const CMD_ENTITY_REGISTRY_LIST: &str = "config/entity_registry/list";
pub const CMD_FLOOR_REGISTRY_LIST: &str = "config/floor_registry/list";
pub const CMD_LABEL_REGISTRY_LIST: &str = "config/label_registry/list";

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const EVENT_STATE_CHANGED: &str = "state_changed";
pub const EVENT_AREA_REGISTRY_UPDATED: &str = "area_registry_updated";
pub const EVENT_DEVICE_REGISTRY_UPDATED: &str = "device_registry_updated";
pub const EVENT_ENTITY_REGISTRY_UPDATED: &str = "entity_registry_updated";

/// Value of [`HubConfig::state`](crate::types::HubConfig::state) once the hub
/// has finished starting up.
pub const HUB_STATE_RUNNING: &str = "RUNNING";
