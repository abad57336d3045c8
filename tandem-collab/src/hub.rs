//! The collaboration hub.
//!
//! A single task owns every room, every session entry and the presence
//! store. Sessions talk to it through a [`HubHandle`]; commands are handled
//! one at a time in arrival order, so no locking is needed around room or
//! session state and a client's replies keep the order of its requests.
//!
//! ```text
//!  session A ─┐                         ┌─► room "p1" ─► outbound A, B
//!  session B ─┼─► HubCommand queue ─► Hub ├─► Engine (OT, per-document lock)
//!  session C ─┘                         └─► PresenceStore
//! ```
//!
//! A periodic sweep evicts sessions that have been silent for longer than
//! the idle timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tandem_ot::{Engine, ResourceId, Submission};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::error::CollabError;
use crate::presence::{InMemoryPresence, PresenceStore, UserPresence};
use crate::protocol::{
    AppliedOperation, ChatPayload, Command, CursorPosition, Envelope, MessageType, OperationAck, OperationPayload,
    ProtocolError, SelectionUpdate, UserId,
};
use crate::room::{ActivityAction, ActivityEntry, ChatMessage, Fanout, RoomRegistry};
use crate::session::{ClientHandle, Delivery};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound frames buffered per client before drops start.
    pub outbound_capacity: usize,
    /// Sessions silent for longer than this are evicted.
    pub idle_timeout: Duration,
    /// How often to look for idle sessions.
    pub sweep_interval: Duration,
    pub chat_history_limit: usize,
    pub activity_limit: usize,
    /// Maximum chat message length in characters.
    pub max_chat_len: usize,
    pub max_room_id_len: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            idle_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
            chat_history_limit: 500,
            activity_limit: 100,
            max_chat_len: 2000,
            max_room_id_len: 128,
        }
    }
}

/// Hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub active_sessions: usize,
    pub active_rooms: usize,
    pub total_sessions: u64,
    pub operations_applied: u64,
    pub operations_rejected: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub idle_evictions: u64,
}

/// Payload of `room_joined`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub members: Vec<UserPresence>,
    pub chat_history: Vec<ChatMessage>,
}

/// Payload of `heartbeat` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub pong: bool,
}

enum HubCommand {
    Register(ClientHandle),
    Inbound {
        user_id: UserId,
        session_id: Uuid,
        command: Command,
    },
    Rejected {
        user_id: UserId,
        session_id: Uuid,
        error: ProtocolError,
    },
    Disconnect {
        user_id: UserId,
        session_id: Uuid,
    },
    Members {
        room_id: String,
        reply: oneshot::Sender<Option<Vec<UserId>>>,
    },
    Activity {
        room_id: String,
        count: usize,
        reply: oneshot::Sender<Option<Vec<ActivityEntry>>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    SweepIdle,
    Shutdown,
}

/// Cloneable sender side of the hub's command queue.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    fn send(&self, command: HubCommand) -> Result<(), CollabError> {
        self.tx.send(command).map_err(|_| CollabError::HubUnavailable)
    }

    /// Attach a client. An existing session for the same user is closed first.
    pub fn register(&self, client: ClientHandle) -> Result<(), CollabError> {
        self.send(HubCommand::Register(client))
    }

    pub fn submit(&self, user_id: UserId, session_id: Uuid, command: Command) -> Result<(), CollabError> {
        self.send(HubCommand::Inbound {
            user_id,
            session_id,
            command,
        })
    }

    /// Report an inbound frame that could not be decoded.
    pub fn reject(&self, user_id: UserId, session_id: Uuid, error: ProtocolError) -> Result<(), CollabError> {
        self.send(HubCommand::Rejected {
            user_id,
            session_id,
            error,
        })
    }

    pub fn disconnect(&self, user_id: UserId, session_id: Uuid) -> Result<(), CollabError> {
        self.send(HubCommand::Disconnect { user_id, session_id })
    }

    /// Member ids of a room, or `None` if the room does not exist.
    pub async fn room_members(&self, room_id: &str) -> Result<Option<Vec<UserId>>, CollabError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Members {
            room_id: room_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| CollabError::HubUnavailable)
    }

    /// Up to `count` recent activity entries of a room, newest first.
    pub async fn room_activity(&self, room_id: &str, count: usize) -> Result<Option<Vec<ActivityEntry>>, CollabError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Activity {
            room_id: room_id.to_string(),
            count,
            reply,
        })?;
        rx.await.map_err(|_| CollabError::HubUnavailable)
    }

    pub async fn stats(&self) -> Result<HubStats, CollabError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply })?;
        rx.await.map_err(|_| CollabError::HubUnavailable)
    }

    /// Run an idle sweep now instead of waiting for the next tick.
    pub fn sweep_idle(&self) -> Result<(), CollabError> {
        self.send(HubCommand::SweepIdle)
    }

    pub fn shutdown(&self) -> Result<(), CollabError> {
        self.send(HubCommand::Shutdown)
    }
}

struct SessionEntry {
    client: ClientHandle,
    room: Option<String>,
    last_seen: Instant,
}

/// The hub actor.
pub struct Hub {
    config: HubConfig,
    engine: Arc<Engine>,
    registry: RoomRegistry,
    sessions: HashMap<UserId, SessionEntry>,
    presence: Box<dyn PresenceStore>,
    stats: HubStats,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    pub fn new(engine: Arc<Engine>, config: HubConfig) -> (Self, HubHandle) {
        Self::with_presence(engine, config, Box::new(InMemoryPresence::new()))
    }

    pub fn with_presence(
        engine: Arc<Engine>,
        config: HubConfig,
        presence: Box<dyn PresenceStore>,
    ) -> (Self, HubHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let hub = Self {
            registry: RoomRegistry::new(config.chat_history_limit, config.activity_limit),
            config,
            engine,
            sessions: HashMap::new(),
            presence,
            stats: HubStats::default(),
            commands,
        };
        (hub, HubHandle { tx })
    }

    /// Spawn the hub on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval.max(Duration::from_millis(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(HubCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = sweep.tick() => self.sweep_idle(Instant::now()),
            }
        }

        let users: Vec<UserId> = self.sessions.keys().copied().collect();
        for user_id in users {
            self.drop_session(user_id);
        }
        log::info!("Hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(client) => self.register(client),
            HubCommand::Inbound {
                user_id,
                session_id,
                command,
            } => {
                if !self.touch(user_id, session_id) {
                    log::debug!("Ignoring {} from stale session {session_id}", command.message_type().as_str());
                    return;
                }
                if let Err(e) = self.dispatch(user_id, command) {
                    self.send_error(user_id, &e);
                }
            }
            HubCommand::Rejected {
                user_id,
                session_id,
                error,
            } => {
                if self.touch(user_id, session_id) {
                    log::debug!("Rejected frame from user {user_id}: {error}");
                    self.send_error(user_id, &CollabError::Malformed(error));
                }
            }
            HubCommand::Disconnect { user_id, session_id } => {
                if self.is_current(user_id, session_id) {
                    self.drop_session(user_id);
                }
            }
            HubCommand::Members { room_id, reply } => {
                let _ = reply.send(self.registry.get(&room_id).map(|room| room.member_ids()));
            }
            HubCommand::Activity { room_id, count, reply } => {
                let _ = reply.send(self.registry.get(&room_id).map(|room| room.activity.recent(count)));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            HubCommand::SweepIdle => self.sweep_idle(Instant::now()),
            // Handled by the run loop.
            HubCommand::Shutdown => {}
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            active_sessions: self.sessions.len(),
            active_rooms: self.registry.len(),
            ..self.stats.clone()
        }
    }

    fn is_current(&self, user_id: UserId, session_id: Uuid) -> bool {
        self.sessions
            .get(&user_id)
            .is_some_and(|entry| entry.client.session_id() == session_id)
    }

    fn touch(&mut self, user_id: UserId, session_id: Uuid) -> bool {
        match self.sessions.get_mut(&user_id) {
            Some(entry) if entry.client.session_id() == session_id => {
                entry.last_seen = Instant::now();
                true
            }
            _ => false,
        }
    }

    fn register(&mut self, client: ClientHandle) {
        let user_id = client.user_id();
        if self.sessions.contains_key(&user_id) {
            log::info!("User {user_id} reconnected, closing previous session");
            self.drop_session(user_id);
        }
        log::info!(
            "Registered {} (user {user_id}, {}) session {}",
            client.username(),
            client.permission().as_str(),
            client.session_id()
        );
        self.sessions.insert(
            user_id,
            SessionEntry {
                client,
                room: None,
                last_seen: Instant::now(),
            },
        );
        self.stats.total_sessions += 1;
    }

    fn dispatch(&mut self, user_id: UserId, command: Command) -> Result<(), CollabError> {
        match command {
            Command::JoinRoom { room_id } => self.join_room(user_id, room_id),
            Command::LeaveRoom => self.leave_room(user_id),
            Command::CursorUpdate(cursor) => {
                self.update_cursor(user_id, &cursor);
                Ok(())
            }
            Command::SelectionUpdate(selection) => {
                self.update_selection(user_id, &selection);
                Ok(())
            }
            Command::Operation(payload) => self.apply_operation(user_id, payload),
            Command::SyncRequest { resource_id } => self.sync(user_id, resource_id),
            Command::Chat(chat) => self.chat(user_id, chat),
            Command::Heartbeat => {
                self.send_to(user_id, Envelope::new(MessageType::Heartbeat).with_data(&Pong { pong: true }));
                Ok(())
            }
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Membership
    // ───────────────────────────────────────────────────────────────

    fn current_room(&self, user_id: UserId) -> Option<String> {
        self.sessions.get(&user_id).and_then(|entry| entry.room.clone())
    }

    fn validate_room_id(&self, room_id: &str) -> Result<(), CollabError> {
        let valid = !room_id.is_empty()
            && room_id.len() <= self.config.max_room_id_len
            && room_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
        if valid {
            Ok(())
        } else {
            Err(CollabError::InvalidRoomId(room_id.to_string()))
        }
    }

    fn join_room(&mut self, user_id: UserId, room_id: String) -> Result<(), CollabError> {
        self.validate_room_id(&room_id)?;

        match self.current_room(user_id) {
            Some(current) if current == room_id => {
                // Already here: confirm again without notifying anyone.
                self.send_room_joined(user_id, &room_id);
                return Ok(());
            }
            Some(_) => self.leave_current(user_id),
            None => {}
        }

        let Some(entry) = self.sessions.get_mut(&user_id) else {
            return Err(CollabError::ConnectionLost);
        };
        entry.room = Some(room_id.clone());
        let client = entry.client.clone();
        let identity = client.identity().clone();

        let room = self.registry.join(&room_id, client);
        room.activity.record(ActivityEntry::new(
            user_id,
            identity.username.clone(),
            ActivityAction::Joined,
            None,
        ));
        let presence = self.presence.join_room(&room_id, &identity);

        let joined = Envelope::new(MessageType::UserJoined)
            .in_room(&room_id)
            .from_user(user_id, identity.username.clone())
            .with_data(&presence);
        self.broadcast(&room_id, &joined, Some(user_id));
        self.send_room_joined(user_id, &room_id);

        let members = self.registry.get(&room_id).map_or(0, |room| room.member_count());
        log::info!("User {user_id} joined room {room_id} ({members} member(s))");
        Ok(())
    }

    fn send_room_joined(&mut self, user_id: UserId, room_id: &str) {
        let chat_history = self
            .registry
            .get(room_id)
            .map(|room| room.chat.recent())
            .unwrap_or_default();
        let payload = RoomJoined {
            members: self.presence.room_presence(room_id),
            chat_history,
        };
        let envelope = Envelope::new(MessageType::RoomJoined)
            .in_room(room_id)
            .for_user(user_id)
            .with_data(&payload);
        self.send_to(user_id, envelope);
    }

    fn leave_room(&mut self, user_id: UserId) -> Result<(), CollabError> {
        let room_id = self.current_room(user_id).ok_or(CollabError::NotInRoom)?;
        self.leave_current(user_id);
        self.send_to(user_id, Envelope::new(MessageType::RoomLeft).in_room(room_id).for_user(user_id));
        Ok(())
    }

    /// Detach `user_id` from its room, notify the remaining members and
    /// delete the room if it is now empty.
    fn leave_current(&mut self, user_id: UserId) {
        let Some(entry) = self.sessions.get_mut(&user_id) else {
            return;
        };
        let Some(room_id) = entry.room.take() else {
            return;
        };
        let username = entry.client.username().to_string();

        self.presence.leave_room(&room_id, user_id);
        if self.registry.leave(&room_id, user_id) {
            log::info!("User {user_id} left room {room_id} (room closed)");
            return;
        }

        if let Some(room) = self.registry.get_mut(&room_id) {
            room.activity
                .record(ActivityEntry::new(user_id, username.clone(), ActivityAction::Left, None));
        }
        let left = Envelope::new(MessageType::UserLeft)
            .in_room(&room_id)
            .from_user(user_id, username);
        self.broadcast(&room_id, &left, None);
        log::info!("User {user_id} left room {room_id}");
    }

    fn drop_session(&mut self, user_id: UserId) {
        self.leave_current(user_id);
        if let Some(entry) = self.sessions.remove(&user_id) {
            log::info!("Session {} for user {user_id} removed", entry.client.session_id());
        }
    }

    fn sweep_idle(&mut self, now: Instant) {
        let timeout = self.config.idle_timeout;
        let idle: Vec<UserId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > timeout)
            .map(|(user_id, _)| *user_id)
            .collect();

        for user_id in idle {
            log::info!("Evicting idle user {user_id}");
            self.drop_session(user_id);
            self.stats.idle_evictions += 1;
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Editing
    // ───────────────────────────────────────────────────────────────

    fn apply_operation(&mut self, user_id: UserId, payload: OperationPayload) -> Result<(), CollabError> {
        let room_id = self.current_room(user_id).ok_or(CollabError::NotInRoom)?;
        if !self.presence.can_edit(&room_id, user_id) {
            self.stats.operations_rejected += 1;
            return Err(CollabError::PermissionDenied);
        }

        let resource_id = payload.resource_id;
        let submission = Submission::new(resource_id, user_id, payload.base_version, payload.operations);
        let applied = match self.engine.apply(&submission) {
            Ok(applied) => applied,
            Err(e) => {
                self.stats.operations_rejected += 1;
                log::warn!("Operation from user {user_id} on resource {resource_id} rejected: {e}");
                return Err(e.into());
            }
        };
        self.stats.operations_applied += 1;

        let username = self.username(user_id);
        let ack = Envelope::new(MessageType::OperationAck)
            .in_room(&room_id)
            .for_user(user_id)
            .with_data(&OperationAck {
                version: applied.version,
                resource_id,
            });
        self.send_to(user_id, ack);

        let broadcast = Envelope::new(MessageType::Operation)
            .in_room(&room_id)
            .from_user(user_id, username.clone())
            .with_data(&AppliedOperation {
                operations: applied.operations,
                version: applied.version,
                resource_id,
            });
        self.broadcast(&room_id, &broadcast, Some(user_id));

        if let Some(room) = self.registry.get_mut(&room_id) {
            room.activity.record(ActivityEntry::new(
                user_id,
                username,
                ActivityAction::Edited,
                Some(format!("resource {resource_id}")),
            ));
        }
        Ok(())
    }

    fn sync(&mut self, user_id: UserId, resource_id: ResourceId) -> Result<(), CollabError> {
        let snapshot = self.engine.get_or_create_document(resource_id, "").lock().snapshot();
        let mut envelope = Envelope::new(MessageType::SyncResponse)
            .for_user(user_id)
            .with_data(&snapshot);
        envelope.room_id = self.current_room(user_id);
        self.send_to(user_id, envelope);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Presence and chat
    // ───────────────────────────────────────────────────────────────

    fn update_cursor(&mut self, user_id: UserId, cursor: &CursorPosition) {
        let Some(room_id) = self.current_room(user_id) else {
            return;
        };
        log::trace!("Cursor of user {user_id} at {}:{}", cursor.line, cursor.column);
        if let Some(record) = self.presence.update_cursor(&room_id, user_id, cursor) {
            let envelope = Envelope::new(MessageType::CursorUpdate)
                .in_room(&room_id)
                .from_user(user_id, record.username.clone())
                .with_data(&record);
            self.broadcast(&room_id, &envelope, Some(user_id));
        }
    }

    fn update_selection(&mut self, user_id: UserId, selection: &SelectionUpdate) {
        let Some(room_id) = self.current_room(user_id) else {
            return;
        };
        log::trace!("Selection of user {user_id} updated (clear: {})", selection.clear);
        if let Some(record) = self.presence.update_selection(&room_id, user_id, selection) {
            let envelope = Envelope::new(MessageType::SelectionUpdate)
                .in_room(&room_id)
                .from_user(user_id, record.username.clone())
                .with_data(&record);
            self.broadcast(&room_id, &envelope, Some(user_id));
        }
    }

    fn chat(&mut self, user_id: UserId, chat: ChatPayload) -> Result<(), CollabError> {
        let room_id = self.current_room(user_id).ok_or(CollabError::NotInRoom)?;
        let length = chat.message.chars().count();
        if chat.message.trim().is_empty() || length > self.config.max_chat_len {
            return Err(CollabError::InvalidChat(format!(
                "message must be 1 to {} characters",
                self.config.max_chat_len
            )));
        }

        let username = self.username(user_id);
        let message = ChatMessage::new(user_id, username.clone(), chat.message, chat.kind);
        let envelope = Envelope::new(MessageType::Chat)
            .in_room(&room_id)
            .from_user(user_id, username)
            .with_data(&message);
        if let Some(room) = self.registry.get_mut(&room_id) {
            room.activity.record(ActivityEntry::new(
                user_id,
                message.username.clone(),
                ActivityAction::Chatted,
                None,
            ));
            room.chat.append(message);
        }
        self.broadcast(&room_id, &envelope, None);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Delivery
    // ───────────────────────────────────────────────────────────────

    fn username(&self, user_id: UserId) -> String {
        self.sessions
            .get(&user_id)
            .map(|entry| entry.client.username().to_string())
            .unwrap_or_default()
    }

    fn send_error(&mut self, user_id: UserId, error: &CollabError) {
        log::debug!("Error for user {user_id}: {error}");
        self.send_to(user_id, Envelope::error(error.to_string()).for_user(user_id));
    }

    fn send_to(&mut self, user_id: UserId, envelope: Envelope) {
        let frame = match envelope.frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to encode {}: {e}", envelope.kind);
                return;
            }
        };
        let Some(entry) = self.sessions.get(&user_id) else {
            return;
        };
        let fanout = match entry.client.deliver(frame) {
            Delivery::Queued => Fanout { delivered: 1, dropped: 0 },
            _ => Fanout { delivered: 0, dropped: 1 },
        };
        self.record(fanout);
    }

    fn broadcast(&mut self, room_id: &str, envelope: &Envelope, exclude: Option<UserId>) {
        let frame = match envelope.frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to encode {}: {e}", envelope.kind);
                return;
            }
        };
        let fanout = self.registry.broadcast(room_id, &frame, exclude);
        self.record(fanout);
    }

    fn record(&mut self, fanout: Fanout) {
        self.stats.frames_delivered += fanout.delivered as u64;
        self.stats.frames_dropped += fanout.dropped as u64;
    }
}
