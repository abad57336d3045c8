//! Rooms and the room registry.
//!
//! A room is created implicitly by its first joiner and deleted as soon as
//! its last member leaves. Broadcasting walks the member table and pushes a
//! pre-encoded frame into each member's bounded outbound queue; a member
//! whose queue is full misses that frame and everyone else still gets it.
//!
//! ```text
//!   frame ──► Room ──try_send──► member A queue ──► writer A
//!                  ├─try_send──► member B queue ──► writer B
//!                  └─(full)────► dropped for C
//! ```

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{Frame, UserId};
use crate::session::{ClientHandle, Delivery};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
    pub delivered: usize,
    pub dropped: usize,
}

/// A chat line kept in room history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(user_id: UserId, username: impl Into<String>, message: impl Into<String>, kind: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            username: username.into(),
            message: message.into(),
            kind: kind.unwrap_or_else(|| "text".to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Ring buffer of recent chat lines.
#[derive(Debug, Clone)]
pub struct ChatBuffer {
    messages: VecDeque<ChatMessage>,
    limit: usize,
}

impl ChatBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            limit,
        }
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.limit {
            self.messages.pop_front();
        }
    }

    /// Retained messages, oldest first.
    pub fn recent(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityAction {
    Joined,
    Left,
    Edited,
    Chatted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub action: ActivityAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(user_id: UserId, username: impl Into<String>, action: ActivityAction, target: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            username: username.into(),
            action,
            target,
            timestamp: Utc::now(),
        }
    }
}

/// Most-recent-first activity log.
#[derive(Debug, Clone)]
pub struct ActivityFeed {
    entries: VecDeque<ActivityEntry>,
    limit: usize,
}

impl ActivityFeed {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    pub fn record(&mut self, entry: ActivityEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.limit);
    }

    /// Up to `count` entries, newest first.
    pub fn recent(&self, count: usize) -> Vec<ActivityEntry> {
        self.entries.iter().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One collaboration room.
pub struct Room {
    id: String,
    created_at: DateTime<Utc>,
    members: HashMap<UserId, ClientHandle>,
    pub chat: ChatBuffer,
    pub activity: ActivityFeed,
}

impl Room {
    fn new(id: String, chat_limit: usize, activity_limit: usize) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            members: HashMap::new(),
            chat: ChatBuffer::new(chat_limit),
            activity: ActivityFeed::new(activity_limit),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.members.contains_key(&user_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Member ids in ascending order.
    pub fn member_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.members.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Push `frame` to every member except `exclude`.
    pub fn broadcast(&self, frame: &Frame, exclude: Option<UserId>) -> Fanout {
        let mut fanout = Fanout::default();
        for (user_id, member) in &self.members {
            if Some(*user_id) == exclude {
                continue;
            }
            match member.deliver(frame.clone()) {
                Delivery::Queued => fanout.delivered += 1,
                Delivery::Dropped => {
                    log::warn!("Outbound queue full for user {user_id} in room {}, frame dropped", self.id);
                    fanout.dropped += 1;
                }
                Delivery::Closed => fanout.dropped += 1,
            }
        }
        fanout
    }
}

/// All live rooms, keyed by room id.
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    chat_limit: usize,
    activity_limit: usize,
}

impl RoomRegistry {
    pub fn new(chat_limit: usize, activity_limit: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            chat_limit,
            activity_limit,
        }
    }

    /// Add `client` to `room_id`, creating the room if needed.
    pub fn join(&mut self, room_id: &str, client: ClientHandle) -> &mut Room {
        let (chat_limit, activity_limit) = (self.chat_limit, self.activity_limit);
        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            log::info!("Created room {room_id}");
            Room::new(room_id.to_string(), chat_limit, activity_limit)
        });
        room.members.insert(client.user_id(), client);
        room
    }

    /// Remove `user_id` from `room_id`. Returns `true` if the room was
    /// deleted because it became empty.
    pub fn leave(&mut self, room_id: &str, user_id: UserId) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        room.members.remove(&user_id);
        if room.members.is_empty() {
            self.rooms.remove(room_id);
            log::info!("Deleted empty room {room_id}");
            return true;
        }
        false
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Broadcast into a room; unknown rooms deliver nothing.
    pub fn broadcast(&self, room_id: &str, frame: &Frame, exclude: Option<UserId>) -> Fanout {
        self.rooms
            .get(room_id)
            .map(|room| room.broadcast(frame, exclude))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PermissionLevel;
    use crate::session::Identity;
    use tokio::sync::mpsc;

    fn client(user_id: UserId, capacity: usize) -> (ClientHandle, mpsc::Receiver<Frame>) {
        ClientHandle::new(
            Identity {
                user_id,
                username: format!("u{user_id}"),
                permission: PermissionLevel::Editor,
            },
            capacity,
        )
    }

    #[test]
    fn test_join_creates_room_and_leave_deletes_it() {
        let mut registry = RoomRegistry::new(10, 10);
        let (a, _ra) = client(1, 4);
        let (b, _rb) = client(2, 4);

        registry.join("r", a);
        registry.join("r", b);
        assert_eq!(registry.get("r").unwrap().member_ids(), vec![1, 2]);

        assert!(!registry.leave("r", 1));
        assert!(registry.contains("r"));
        assert!(registry.leave("r", 2));
        assert!(!registry.contains("r"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_leave_unknown_room_is_noop() {
        let mut registry = RoomRegistry::new(10, 10);
        assert!(!registry.leave("nowhere", 1));
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let mut registry = RoomRegistry::new(10, 10);
        let (a, mut ra) = client(1, 4);
        let (b, mut rb) = client(2, 4);
        registry.join("r", a);
        registry.join("r", b);

        let frame: Frame = Frame::from("hello");
        let fanout = registry.broadcast("r", &frame, Some(1));
        assert_eq!(fanout, Fanout { delivered: 1, dropped: 0 });
        assert_eq!(&*rb.try_recv().unwrap(), "hello");
        assert!(ra.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_only_for_slow_member() {
        let mut registry = RoomRegistry::new(10, 10);
        let (slow, mut slow_rx) = client(1, 1);
        let (fast, mut fast_rx) = client(2, 8);
        registry.join("r", slow);
        registry.join("r", fast);

        let frame: Frame = Frame::from("x");
        registry.broadcast("r", &frame, None);
        let fanout = registry.broadcast("r", &frame, None);
        assert_eq!(fanout, Fanout { delivered: 1, dropped: 1 });

        assert!(slow_rx.try_recv().is_ok());
        assert!(slow_rx.try_recv().is_err());
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_to_unknown_room() {
        let registry = RoomRegistry::new(10, 10);
        assert_eq!(registry.broadcast("x", &Frame::from("f"), None), Fanout::default());
    }

    #[test]
    fn test_chat_buffer_keeps_latest() {
        let mut chat = ChatBuffer::new(3);
        for i in 0..5 {
            chat.append(ChatMessage::new(1, "u", format!("m{i}"), None));
        }
        let lines: Vec<_> = chat.recent().into_iter().map(|m| m.message).collect();
        assert_eq!(lines, vec!["m2", "m3", "m4"]);
        assert_eq!(chat.recent()[0].kind, "text");
    }

    #[test]
    fn test_activity_feed_newest_first_and_bounded() {
        let mut feed = ActivityFeed::new(2);
        feed.record(ActivityEntry::new(1, "a", ActivityAction::Joined, None));
        feed.record(ActivityEntry::new(2, "b", ActivityAction::Joined, None));
        feed.record(ActivityEntry::new(1, "a", ActivityAction::Edited, Some("file 3".into())));
        assert_eq!(feed.len(), 2);
        let recent = feed.recent(10);
        assert_eq!(recent[0].action, ActivityAction::Edited);
        assert_eq!(recent[1].user_id, 2);
        assert_eq!(feed.recent(1).len(), 1);
    }
}
