//! Room membership registry for keyrace.
//!
//! The registry is the single source of truth for which connections belong
//! to which room. It is the only shared mutable state in the coordinator,
//! so every mutation here must be safe under concurrent invocation from
//! independent connection tasks. Critical sections are pure in-memory map
//! work; nothing here ever waits on the network.

use crate::room::{validate_room_code, Outbox, Room, RoomId};
use dashmap::DashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid room code.
    #[error("Invalid room code: {0}")]
    InvalidRoomCode(&'static str),

    /// Maximum number of active rooms reached.
    #[error("Maximum number of rooms reached")]
    TooManyRooms,

    /// The room already holds its maximum number of racers.
    #[error("Room is full: {0}")]
    RoomFull(String),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of active rooms.
    pub max_rooms: usize,
    /// Maximum members per room. A race is typically two racers; the cap
    /// exists so a hostile client cannot grow a room without bound.
    pub max_members_per_room: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_members_per_room: 8,
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of active rooms.
    pub room_count: usize,
    /// Number of connections currently joined to a room.
    pub connection_count: usize,
}

/// The room membership registry.
///
/// Rooms are created implicitly on first join and deleted as soon as their
/// last member leaves; an unknown room behaves exactly like an empty one.
/// Per-room mutations observe a single consistent order because each room
/// lives in one `DashMap` entry.
pub struct RoomRegistry {
    /// Rooms indexed by code.
    rooms: DashMap<RoomId, Room>,
    /// The room (at most one) each connection has joined.
    memberships: DashMap<String, RoomId>,
    /// Serializes room creation so the room cap check and the insert
    /// observe each other. Joins to existing rooms never take this lock.
    create_lock: Mutex<()>,
    /// Configuration.
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            create_lock: Mutex::new(()),
            config,
        }
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            connection_count: self.memberships.len(),
        }
    }

    /// Join a connection to a room, creating the room entry if absent.
    ///
    /// Returns `true` if the connection newly joined, `false` if it was
    /// already a member (the member set is unchanged).
    ///
    /// # Errors
    ///
    /// Returns an error if the room code is invalid or a limit is exceeded.
    pub fn join(
        &self,
        room_id: &str,
        connection_id: &str,
        outbox: Outbox,
    ) -> Result<bool, RegistryError> {
        validate_room_code(room_id).map_err(RegistryError::InvalidRoomCode)?;

        let mut room = match self.rooms.get_mut(room_id) {
            Some(room) => room,
            None => {
                let _create = self.create_lock.lock().expect("room creation lock poisoned");

                if !self.rooms.contains_key(room_id) && self.rooms.len() >= self.config.max_rooms {
                    return Err(RegistryError::TooManyRooms);
                }

                self.rooms.entry(room_id.to_string()).or_insert_with(|| {
                    debug!(room = %room_id, "Creating room");
                    Room::new(room_id)
                })
            }
        };

        if !room.is_member(connection_id) && room.member_count() >= self.config.max_members_per_room
        {
            return Err(RegistryError::RoomFull(room_id.to_string()));
        }

        let newly_joined = room.insert(connection_id, outbox);
        let member_count = room.member_count();
        drop(room);

        if newly_joined {
            self.memberships
                .insert(connection_id.to_string(), room_id.to_string());
        }

        debug!(
            room = %room_id,
            connection = %connection_id,
            members = member_count,
            newly_joined,
            "Joined"
        );

        Ok(newly_joined)
    }

    /// Remove a connection from a room.
    ///
    /// Deletes the room entry when the member set becomes empty; an empty
    /// room has no further reason to exist.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&self, room_id: &str, connection_id: &str) -> bool {
        let was_member = self
            .rooms
            .get_mut(room_id)
            .map(|mut room| room.remove(connection_id))
            .unwrap_or(false);

        if was_member {
            self.memberships
                .remove_if(connection_id, |_, room| room.as_str() == room_id);

            if self.rooms.remove_if(room_id, |_, room| room.is_empty()).is_some() {
                debug!(room = %room_id, "Deleted empty room");
            }
        }

        was_member
    }

    /// Remove a connection from whichever room it has joined.
    ///
    /// This is the disconnect path: the transport only knows the connection,
    /// not the room. Returns the room the connection was a member of, if any.
    pub fn leave_current(&self, connection_id: &str) -> Option<RoomId> {
        let (_, room_id) = self.memberships.remove(connection_id)?;

        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            room.remove(connection_id);
        }
        if self.rooms.remove_if(&room_id, |_, room| room.is_empty()).is_some() {
            debug!(room = %room_id, "Deleted empty room");
        }

        Some(room_id)
    }

    /// Get the current member set of a room.
    ///
    /// An unknown room behaves identically to a room with no members.
    #[must_use]
    pub fn members_of(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|room| room.member_ids())
            .unwrap_or_default()
    }

    /// Get every member of a room except the caller, with delivery handles.
    #[must_use]
    pub fn others_of(&self, room_id: &str, connection_id: &str) -> Vec<(String, Outbox)> {
        self.rooms
            .get(room_id)
            .map(|room| room.others(connection_id))
            .unwrap_or_default()
    }

    /// The room a connection has joined, if any.
    #[must_use]
    pub fn room_of(&self, connection_id: &str) -> Option<RoomId> {
        self.memberships
            .get(connection_id)
            .map(|room| room.value().clone())
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Get the member count for a room.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.member_count())
            .unwrap_or(0)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
