//! # keyrace-transport
//!
//! Transport abstraction layer for the keyrace race coordinator.
//!
//! The coordinator only needs a duplex stream of decoded events per racer
//! plus a reliable end-of-connection signal; this crate provides that
//! surface over WebSocket and keeps the door open for other transports.
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` and `Connection` traits,
//! allowing the coordinator to be protocol-agnostic.
//!
//! ```rust,ignore
//! use keyrace_transport::Connection;
//!
//! async fn handle_connection(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(event)) = conn.recv().await {
//!         // Process event
//!     }
//!     // recv returned None: the connection is gone, exactly once
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
