//! # keyrace-core
//!
//! Room registry, event relay, and lifecycle management for the keyrace
//! realtime race coordinator.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Room** - Ephemeral group of connections racing each other
//! - **RoomRegistry** - Single source of truth for room membership
//! - **EventRouter** - Relays race events to the other room members
//! - **LifecycleManager** - Join/leave/disconnect transitions and cleanup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌──────────────┐
//! │  Connection │────▶│ LifecycleManager │────▶│ RoomRegistry │
//! └─────────────┘     └──────────────────┘     └──────────────┘
//!                             │                       ▲
//!                             ▼                       │
//!                      ┌─────────────┐                │
//!                      │ EventRouter │────────────────┘
//!                      └─────────────┘
//! ```
//!
//! The registry is the only shared mutable state; everything else is owned
//! by a single connection's task.

pub mod lifecycle;
pub mod registry;
pub mod relay;
pub mod room;

pub use lifecycle::LifecycleManager;
pub use registry::{RegistryConfig, RegistryError, RegistryStats, RoomRegistry};
pub use relay::{relayed_form, EventRouter};
pub use room::{Outbox, Room, RoomId};
