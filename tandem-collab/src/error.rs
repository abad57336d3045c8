use tandem_ot::OtError;
use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors surfaced by the hub. Those caused by a client request are sent
/// back to that client as an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollabError {
    #[error("You don't have edit permission")]
    PermissionDenied,
    #[error("Not in a room")]
    NotInRoom,
    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),
    #[error("Invalid chat message: {0}")]
    InvalidChat(String),
    #[error(transparent)]
    Malformed(#[from] ProtocolError),
    #[error("Failed to apply operation: {0}")]
    Engine(#[from] OtError),
    #[error("Connection lost")]
    ConnectionLost,
    #[error("Collaboration hub is not running")]
    HubUnavailable,
}
