//! Tandem real-time collaboration hub.
//!
//! Architecture:
//! ```text
//!  Client A ──┐                       ┌── Room "p1" ── members, chat, activity
//!             ├── WebSocket ── Hub ───┤
//!  Client B ──┘   (JSON frames)       ├── PresenceStore (cursors, permissions)
//!                                     └── tandem_ot::Engine
//!                                             └── Document per resource
//! ```
//!
//! Modules:
//! - `protocol`: JSON envelope, typed commands and outbound payloads
//! - `session`: identity, outbound queue, per-connection reader/writer
//! - `room`: rooms, chat history, activity feed, fan-out
//! - `presence`: who is where and who may edit
//! - `hub`: the single task that serializes all room and session changes
//! - `server`: TCP accept loop and WebSocket handshake

pub mod error;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;

pub use error::CollabError;
pub use hub::{Hub, HubConfig, HubHandle, HubStats, Pong, RoomJoined};
pub use presence::{InMemoryPresence, PermissionLevel, PresenceStore, Selection, UserPresence};
pub use protocol::{
    AppliedOperation, ChatPayload, Command, CursorPosition, Envelope, ErrorPayload, Frame, MessageType,
    OperationAck, OperationPayload, ProtocolError, SelectionUpdate, UserId,
};
pub use room::{ActivityAction, ActivityEntry, ChatMessage, Fanout, Room, RoomRegistry};
pub use server::{CollabServer, ServerConfig};
pub use session::{run_session, ClientHandle, Delivery, Identity, SessionConfig};
