//! Wire protocol types for the hub WebSocket API.
//!
//! Inbound traffic is parsed into [`envelope::HubMessage`]; outbound
//! commands implement [`messages::Command`] and are framed with
//! [`envelope::encode_command`].

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use envelope::{ErrorCode, HassError, HubMessage, ResultMessage, encode_command};
pub use messages::Command;
pub use types::{EntityState, HassContext, HassEvent, StateChangedData};
