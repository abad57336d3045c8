//! JSON wire protocol for the collaboration hub.
//!
//! Every frame is one envelope:
//! ```text
//! {
//!   "type":      "join_room" | "operation" | …,
//!   "roomId":    "project-42",          (optional)
//!   "userId":    7,                     (optional, set by the server)
//!   "username":  "alice",               (optional, set by the server)
//!   "data":      { … },                 (optional, depends on type)
//!   "timestamp": "2026-01-01T00:00:00Z"
//! }
//! ```
//!
//! Inbound envelopes are decoded into a typed [`Command`]; outbound events
//! are built with [`Envelope::new`] and encoded once into a shared [`Frame`]
//! before fan-out. Snake-case field aliases (`room_id`, `base_version`,
//! `file_id`) are accepted on input.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_ot::{Operation, ResourceId};
use thiserror::Error;

/// User identifier as carried on the wire.
pub type UserId = u64;

/// Pre-encoded outbound frame, shared between all recipients of a broadcast.
pub type Frame = Arc<str>;

/// Message types understood or produced by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Inbound
    JoinRoom,
    LeaveRoom,
    CursorUpdate,
    SelectionUpdate,
    Operation,
    SyncRequest,
    Chat,
    Heartbeat,
    // Outbound
    RoomJoined,
    RoomLeft,
    UserJoined,
    UserLeft,
    OperationAck,
    SyncResponse,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinRoom => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::CursorUpdate => "cursor_update",
            Self::SelectionUpdate => "selection_update",
            Self::Operation => "operation",
            Self::SyncRequest => "sync_request",
            Self::Chat => "chat",
            Self::Heartbeat => "heartbeat",
            Self::RoomJoined => "room_joined",
            Self::RoomLeft => "room_left",
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::OperationAck => "operation_ack",
            Self::SyncResponse => "sync_response",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "join_room" => Self::JoinRoom,
            "leave_room" => Self::LeaveRoom,
            "cursor_update" => Self::CursorUpdate,
            "selection_update" => Self::SelectionUpdate,
            "operation" => Self::Operation,
            "sync_request" => Self::SyncRequest,
            "chat" => Self::Chat,
            "heartbeat" => Self::Heartbeat,
            "room_joined" => Self::RoomJoined,
            "room_left" => Self::RoomLeft,
            "user_joined" => Self::UserJoined,
            "user_left" => Self::UserLeft,
            "operation_ack" => Self::OperationAck,
            "sync_response" => Self::SyncResponse,
            "error" => Self::Error,
            _ => return None,
        };
        Some(kind)
    }
}

/// Top-level wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "room_id", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Create an outbound envelope stamped with the current time.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            room_id: None,
            user_id: None,
            username: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Error event carrying a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(MessageType::Error).with_data(&ErrorPayload {
            message: message.into(),
        })
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn from_user(mut self, user_id: UserId, username: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.username = Some(username.into());
        self
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.data = Some(value),
            Err(e) => log::error!("Failed to serialize {} payload: {e}", self.kind),
        }
        self
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }

    /// Parse the `data` field into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let data = self.data.clone().ok_or(ProtocolError::MissingField("data"))?;
        serde_json::from_value(data).map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Encode into a frame that can be shared across recipients.
    pub fn frame(&self) -> Result<Frame, ProtocolError> {
        self.encode().map(Frame::from)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRoomPayload {
    #[serde(default, alias = "room_id")]
    room_id: Option<String>,
}

/// Cursor position inside a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    #[serde(default, alias = "file_id", skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u64>,
    #[serde(default, alias = "file_name", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub line: u32,
    pub column: u32,
}

/// Selection change; `clear` removes the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionUpdate {
    #[serde(default, alias = "start_line")]
    pub start_line: u32,
    #[serde(default, alias = "start_column")]
    pub start_column: u32,
    #[serde(default, alias = "end_line")]
    pub end_line: u32,
    #[serde(default, alias = "end_column")]
    pub end_column: u32,
    #[serde(default)]
    pub clear: bool,
}

/// Inbound `operation` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    pub operations: Vec<Operation>,
    #[serde(alias = "base_version")]
    pub base_version: u64,
    #[serde(alias = "resource_id", alias = "file_id")]
    pub resource_id: ResourceId,
}

/// Outbound `operation` broadcast: what was actually applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOperation {
    pub operations: Vec<Operation>,
    pub version: u64,
    pub resource_id: ResourceId,
}

/// Outbound `operation_ack` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAck {
    pub version: u64,
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequestPayload {
    #[serde(alias = "resource_id", alias = "file_id")]
    resource_id: ResourceId,
}

/// Inbound `chat` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Outbound `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

// ───────────────────────────────────────────────────────────────────
// Commands
// ───────────────────────────────────────────────────────────────────

/// A decoded inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    JoinRoom { room_id: String },
    LeaveRoom,
    CursorUpdate(CursorPosition),
    SelectionUpdate(SelectionUpdate),
    Operation(OperationPayload),
    SyncRequest { resource_id: ResourceId },
    Chat(ChatPayload),
    Heartbeat,
}

impl Command {
    /// Decode a text frame into a command.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::from_envelope(&Envelope::decode(text)?)
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, ProtocolError> {
        let kind = MessageType::parse(&env.kind).ok_or_else(|| ProtocolError::UnknownType(env.kind.clone()))?;

        let command = match kind {
            MessageType::JoinRoom => {
                let from_data = match &env.data {
                    Some(_) => env.payload::<JoinRoomPayload>()?.room_id,
                    None => None,
                };
                let room_id = from_data
                    .or_else(|| env.room_id.clone())
                    .ok_or(ProtocolError::MissingField("roomId"))?;
                Self::JoinRoom { room_id }
            }
            MessageType::LeaveRoom => Self::LeaveRoom,
            MessageType::CursorUpdate => Self::CursorUpdate(env.payload()?),
            MessageType::SelectionUpdate => Self::SelectionUpdate(env.payload()?),
            MessageType::Operation => Self::Operation(env.payload()?),
            MessageType::SyncRequest => {
                let payload: SyncRequestPayload = env.payload()?;
                Self::SyncRequest {
                    resource_id: payload.resource_id,
                }
            }
            MessageType::Chat => Self::Chat(env.payload()?),
            MessageType::Heartbeat => Self::Heartbeat,
            // Server-to-client events are not valid commands.
            other => return Err(ProtocolError::UnknownType(other.as_str().to_string())),
        };

        Ok(command)
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::JoinRoom { .. } => MessageType::JoinRoom,
            Self::LeaveRoom => MessageType::LeaveRoom,
            Self::CursorUpdate(_) => MessageType::CursorUpdate,
            Self::SelectionUpdate(_) => MessageType::SelectionUpdate,
            Self::Operation(_) => MessageType::Operation,
            Self::SyncRequest { .. } => MessageType::SyncRequest,
            Self::Chat(_) => MessageType::Chat,
            Self::Heartbeat => MessageType::Heartbeat,
        }
    }

    /// Encode as a client would send it.
    pub fn to_envelope(&self) -> Envelope {
        let env = Envelope::new(self.message_type());
        match self {
            Self::JoinRoom { room_id } => env.in_room(room_id.clone()),
            Self::LeaveRoom | Self::Heartbeat => env,
            Self::CursorUpdate(cursor) => env.with_data(cursor),
            Self::SelectionUpdate(selection) => env.with_data(selection),
            Self::Operation(payload) => env.with_data(payload),
            Self::SyncRequest { resource_id } => env.with_data(&SyncRequestPayload {
                resource_id: *resource_id,
            }),
            Self::Chat(chat) => env.with_data(chat),
        }
    }
}

/// Protocol errors. All of them reach the client as an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    Decode(String),
    #[error("Serialization error: {0}")]
    Encode(String),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("Frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },
}
