//! Room abstraction for keyrace.
//!
//! A room is an ephemeral group of connections racing each other,
//! keyed by the short shareable code the provisioning service hands out.

use keyrace_protocol::ServerEvent;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Maximum room code length.
pub const MAX_ROOM_CODE_LENGTH: usize = 64;

/// A room identifier.
pub type RoomId = String;

/// Per-member outbound delivery handle.
///
/// Each connection's task owns the receiving half; the relay sends through
/// the sender half so delivery is FIFO per sender-to-recipient pair and a
/// slow socket never blocks the relay.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Validate a room code.
///
/// Codes are externally provisioned and treated as opaque, so validation
/// only rejects values that cannot be legitimate codes at all.
///
/// # Errors
///
/// Returns an error message if the room code is invalid.
pub fn validate_room_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() {
        return Err("Room code cannot be empty");
    }
    if code.len() > MAX_ROOM_CODE_LENGTH {
        return Err("Room code too long");
    }
    if !code.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room code contains invalid characters");
    }
    Ok(())
}

/// A race room holding its current members.
#[derive(Debug)]
pub struct Room {
    /// Room code.
    id: RoomId,
    /// Members by connection ID, each with its outbound delivery handle.
    members: HashMap<String, Outbox>,
}

impl Room {
    /// Create a new empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashMap::new(),
        }
    }

    /// Get the room code.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, connection_id: &str) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Add a member to the room.
    ///
    /// Returns `true` if the connection is a new member, `false` if it was
    /// already joined (the existing delivery handle is kept, so a duplicate
    /// join is a no-op).
    pub fn insert(&mut self, connection_id: impl Into<String>, outbox: Outbox) -> bool {
        let conn_id = connection_id.into();
        if self.members.contains_key(&conn_id) {
            return false;
        }
        self.members.insert(conn_id.clone(), outbox);
        debug!(room = %self.id, connection = %conn_id, "Member joined");
        true
    }

    /// Remove a member from the room.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove(&mut self, connection_id: &str) -> bool {
        let removed = self.members.remove(connection_id).is_some();
        if removed {
            debug!(room = %self.id, connection = %connection_id, "Member left");
        }
        removed
    }

    /// Get all member connection IDs.
    #[must_use]
    pub fn member_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    /// Get every member except the given connection, with delivery handles.
    ///
    /// This is the relay's recipient list: a sender never receives its own
    /// relayed event.
    #[must_use]
    pub fn others(&self, connection_id: &str) -> Vec<(String, Outbox)> {
        self.members
            .iter()
            .filter(|(id, _)| id.as_str() != connection_id)
            .map(|(id, outbox)| (id.clone(), outbox.clone()))
            .collect()
    }

    /// Check if the room is empty (no members).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
