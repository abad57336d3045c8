//! Per-room presence: who is here, where their cursor is, what they can do.
//!
//! The hub talks to presence only through [`PresenceStore`], so a shared
//! backend can replace [`InMemoryPresence`] without touching room logic.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{CursorPosition, SelectionUpdate, UserId};
use crate::session::Identity;

/// Access level of a collaborator within a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Viewer,
    #[default]
    Editor,
    Admin,
    Owner,
}

impl PermissionLevel {
    pub fn can_edit(&self) -> bool {
        *self >= Self::Editor
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }
}

/// Current selection of a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

/// Presence record of one user in one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: UserId,
    pub username: String,
    /// Stable display color, `#rrggbb`.
    pub color: String,
    pub permission: PermissionLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl UserPresence {
    fn new(identity: &Identity) -> Self {
        let now = Utc::now();
        Self {
            user_id: identity.user_id,
            username: identity.username.clone(),
            color: cursor_color(identity.user_id),
            permission: identity.permission,
            cursor: None,
            selection: None,
            joined_at: now,
            last_activity: now,
        }
    }
}

/// Presence backend used by the hub.
pub trait PresenceStore: Send {
    /// Record `identity` as present in `room_id`, replacing any previous record.
    fn join_room(&mut self, room_id: &str, identity: &Identity) -> UserPresence;

    fn leave_room(&mut self, room_id: &str, user_id: UserId);

    /// Returns the updated record, or `None` if the user is not in the room.
    fn update_cursor(&mut self, room_id: &str, user_id: UserId, cursor: &CursorPosition) -> Option<UserPresence>;

    /// Returns the updated record, or `None` if the user is not in the room.
    fn update_selection(
        &mut self,
        room_id: &str,
        user_id: UserId,
        selection: &SelectionUpdate,
    ) -> Option<UserPresence>;

    /// All records for a room, ordered by user id.
    fn room_presence(&self, room_id: &str) -> Vec<UserPresence>;

    /// Whether `user_id` may submit operations in `room_id`.
    fn can_edit(&self, room_id: &str, user_id: UserId) -> bool;
}

/// Process-local presence store.
#[derive(Debug, Default)]
pub struct InMemoryPresence {
    rooms: HashMap<String, HashMap<UserId, UserPresence>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn record_mut(&mut self, room_id: &str, user_id: UserId) -> Option<&mut UserPresence> {
        self.rooms.get_mut(room_id)?.get_mut(&user_id)
    }
}

impl PresenceStore for InMemoryPresence {
    fn join_room(&mut self, room_id: &str, identity: &Identity) -> UserPresence {
        let record = UserPresence::new(identity);
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(identity.user_id, record.clone());
        record
    }

    fn leave_room(&mut self, room_id: &str, user_id: UserId) {
        if let Some(members) = self.rooms.get_mut(room_id) {
            members.remove(&user_id);
            if members.is_empty() {
                self.rooms.remove(room_id);
            }
        }
    }

    fn update_cursor(&mut self, room_id: &str, user_id: UserId, cursor: &CursorPosition) -> Option<UserPresence> {
        let record = self.record_mut(room_id, user_id)?;
        record.cursor = Some(cursor.clone());
        record.last_activity = Utc::now();
        Some(record.clone())
    }

    fn update_selection(
        &mut self,
        room_id: &str,
        user_id: UserId,
        selection: &SelectionUpdate,
    ) -> Option<UserPresence> {
        let record = self.record_mut(room_id, user_id)?;
        record.selection = if selection.clear {
            None
        } else {
            Some(Selection {
                start_line: selection.start_line,
                start_column: selection.start_column,
                end_line: selection.end_line,
                end_column: selection.end_column,
            })
        };
        record.last_activity = Utc::now();
        Some(record.clone())
    }

    fn room_presence(&self, room_id: &str) -> Vec<UserPresence> {
        let mut records: Vec<UserPresence> = self
            .rooms
            .get(room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.user_id);
        records
    }

    fn can_edit(&self, room_id: &str, user_id: UserId) -> bool {
        self.rooms
            .get(room_id)
            .and_then(|members| members.get(&user_id))
            .is_some_and(|record| record.permission.can_edit())
    }
}

/// Stable cursor color for a user, spread around the hue wheel.
pub fn cursor_color(user_id: UserId) -> String {
    // Golden-angle steps keep consecutive ids visually distinct.
    let hue = (user_id.wrapping_mul(137) % 360) as f32 / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.5);
    format!(
        "#{:02x}{:02x}{:02x}",
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8
    )
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_channel(p, q, h + 1.0 / 3.0),
        hue_channel(p, q, h),
        hue_channel(p, q, h - 1.0 / 3.0),
    )
}

fn hue_channel(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    match t {
        t if t < 1.0 / 6.0 => p + (q - p) * 6.0 * t,
        t if t < 1.0 / 2.0 => q,
        t if t < 2.0 / 3.0 => p + (q - p) * (2.0 / 3.0 - t) * 6.0,
        _ => p,
    }
}
