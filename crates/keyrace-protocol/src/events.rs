//! Event types for the keyrace protocol.
//!
//! Events are the fundamental unit of communication during a race.
//! Client events flow from a racer to the coordinator; server events
//! flow back out, most of them relays of what an opponent just did.
//! Each event is serialized using MessagePack for efficient binary encoding.

use serde::{Deserialize, Serialize};

/// A room identifier as carried on the wire.
///
/// Room codes are allocated by the provisioning service; the coordinator
/// treats them as opaque strings.
pub type RoomCode = String;

/// An event sent by a client to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Join a race room by code.
    #[serde(rename = "join")]
    Join {
        /// Room code to join.
        room: RoomCode,
    },

    /// Leave the current race room without closing the connection.
    #[serde(rename = "leave")]
    Leave {
        /// Room code to leave.
        room: RoomCode,
    },

    /// The racer is ready to start.
    #[serde(rename = "ready")]
    Ready {
        /// Room code.
        room: RoomCode,
    },

    /// Start the pre-race countdown for the room.
    #[serde(rename = "countdown-start")]
    CountdownStart {
        /// Room code.
        room: RoomCode,
        /// Countdown length in seconds.
        seconds: u32,
    },

    /// Mid-race progress snapshot.
    #[serde(rename = "progress")]
    Progress {
        /// Room code.
        room: RoomCode,
        /// Fractional completion of the passage, 0.0 to 1.0.
        fraction: f64,
        /// Current words-per-minute estimate.
        wpm: f64,
    },

    /// The racer finished the passage.
    #[serde(rename = "finish")]
    Finish {
        /// Room code.
        room: RoomCode,
        /// Final words per minute.
        wpm: f64,
        /// Final accuracy percentage.
        accuracy: f64,
        /// Completion timestamp, epoch milliseconds.
        finished_at: u64,
    },

    /// Request a rematch with the current opponent(s).
    #[serde(rename = "rematch-request")]
    RematchRequest {
        /// Room code.
        room: RoomCode,
    },

    /// Accept a pending rematch offer.
    #[serde(rename = "rematch-accept")]
    RematchAccept {
        /// Room code.
        room: RoomCode,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp echoed back in the pong.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientEvent {
    /// The room code this event targets, if any.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        match self {
            ClientEvent::Join { room }
            | ClientEvent::Leave { room }
            | ClientEvent::Ready { room }
            | ClientEvent::CountdownStart { room, .. }
            | ClientEvent::Progress { room, .. }
            | ClientEvent::Finish { room, .. }
            | ClientEvent::RematchRequest { room }
            | ClientEvent::RematchAccept { room } => Some(room),
            ClientEvent::Ping { .. } => None,
        }
    }

    /// Short kind name for logging and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::Leave { .. } => "leave",
            ClientEvent::Ready { .. } => "ready",
            ClientEvent::CountdownStart { .. } => "countdown-start",
            ClientEvent::Progress { .. } => "progress",
            ClientEvent::Finish { .. } => "finish",
            ClientEvent::RematchRequest { .. } => "rematch-request",
            ClientEvent::RematchAccept { .. } => "rematch-accept",
            ClientEvent::Ping { .. } => "ping",
        }
    }
}

/// An event sent by the coordinator to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Connection established handshake, sent once on accept.
    #[serde(rename = "connected")]
    Connected {
        /// Ephemeral identifier for this connection.
        connection_id: String,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat_ms: u32,
    },

    /// Another racer joined the room.
    #[serde(rename = "opponent-joined")]
    OpponentJoined,

    /// The opponent is ready to start.
    #[serde(rename = "opponent-ready")]
    OpponentReady,

    /// Pre-race countdown started.
    #[serde(rename = "countdown-start")]
    CountdownStart {
        /// Countdown length in seconds.
        seconds: u32,
    },

    /// Opponent progress snapshot.
    #[serde(rename = "opponent-progress")]
    OpponentProgress {
        /// Fractional completion, 0.0 to 1.0.
        fraction: f64,
        /// Current words-per-minute estimate.
        wpm: f64,
    },

    /// The opponent finished the passage.
    #[serde(rename = "opponent-finish")]
    OpponentFinish {
        /// Final words per minute.
        wpm: f64,
        /// Final accuracy percentage.
        accuracy: f64,
        /// Completion timestamp, epoch milliseconds.
        finished_at: u64,
    },

    /// Another racer left or disconnected.
    #[serde(rename = "opponent-left")]
    OpponentLeft,

    /// The opponent requested a rematch.
    #[serde(rename = "rematch-offer")]
    RematchOffer,

    /// The opponent accepted the rematch.
    #[serde(rename = "rematch-accepted")]
    RematchAccepted,

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Create a new Connected handshake event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat_ms: u32) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
            heartbeat_ms,
        }
    }

    /// Create a new Pong event.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerEvent::Pong { timestamp }
    }

    /// Short kind name for logging and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::OpponentJoined => "opponent-joined",
            ServerEvent::OpponentReady => "opponent-ready",
            ServerEvent::CountdownStart { .. } => "countdown-start",
            ServerEvent::OpponentProgress { .. } => "opponent-progress",
            ServerEvent::OpponentFinish { .. } => "opponent-finish",
            ServerEvent::OpponentLeft => "opponent-left",
            ServerEvent::RematchOffer => "rematch-offer",
            ServerEvent::RematchAccepted => "rematch-accepted",
            ServerEvent::Pong { .. } => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_room() {
        let join = ClientEvent::Join {
            room: "AB12CD".to_string(),
        };
        assert_eq!(join.room(), Some("AB12CD"));

        let ping = ClientEvent::Ping { timestamp: None };
        assert_eq!(ping.room(), None);
    }

    #[test]
    fn test_event_kinds() {
        let progress = ClientEvent::Progress {
            room: "AB12CD".to_string(),
            fraction: 0.5,
            wpm: 72.0,
        };
        assert_eq!(progress.kind(), "progress");
        assert_eq!(ServerEvent::OpponentLeft.kind(), "opponent-left");
    }
}
