//! # keyrace-protocol
//!
//! Wire protocol definitions for the keyrace realtime race coordinator.
//!
//! This crate defines the binary protocol used for communication between
//! racing clients and the coordinator: event types and the framing codec.
//!
//! ## Event Types
//!
//! - [`ClientEvent`] - What a racer sends: `join`, `ready`, `progress`,
//!   `finish`, rematch negotiation, keepalive pings
//! - [`ServerEvent`] - What the coordinator sends back: the opponent's
//!   relayed actions plus the connection handshake
//!
//! ## Example
//!
//! ```rust
//! use keyrace_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::Join { room: "AB12CD".to_string() };
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{ClientEvent, RoomCode, ServerEvent};
