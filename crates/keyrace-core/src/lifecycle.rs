//! Connection lifecycle management for keyrace.
//!
//! Each connection moves through `unjoined -> joined -> (left | disconnected)`.
//! The lifecycle manager applies those transitions to the registry and emits
//! the membership-change events the remaining racers see. An explicit leave
//! and a transport-detected disconnect are treated identically; the only
//! difference is who noticed first.

use crate::registry::{RegistryError, RoomRegistry};
use crate::relay::EventRouter;
use crate::room::{Outbox, RoomId};
use keyrace_protocol::ServerEvent;
use std::sync::Arc;
use tracing::debug;

/// Applies join/leave/disconnect transitions and notifies room members.
#[derive(Clone)]
pub struct LifecycleManager {
    registry: Arc<RoomRegistry>,
    router: EventRouter,
}

impl LifecycleManager {
    /// Create a new lifecycle manager over the given registry.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        let router = EventRouter::new(Arc::clone(&registry));
        Self { registry, router }
    }

    /// Handle an explicit join request.
    ///
    /// A connection holds at most one room membership, so joining a new
    /// room first leaves the current one (emitting `opponent-left` there).
    /// The members already present receive `opponent-joined`; the joiner
    /// receives nothing, and an idempotent re-join emits nothing at all.
    ///
    /// The coordinator does not consult room provisioning: a join to a room
    /// code nobody has seen before simply creates the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the room code is invalid or a limit is exceeded.
    pub fn handle_join(
        &self,
        room_id: &str,
        connection_id: &str,
        outbox: Outbox,
    ) -> Result<bool, RegistryError> {
        if let Some(current) = self.registry.room_of(connection_id) {
            if current != room_id {
                self.depart(connection_id, "switched room");
            }
        }

        let newly_joined = self.registry.join(room_id, connection_id, outbox)?;
        if newly_joined {
            self.router
                .fan_out(room_id, connection_id, ServerEvent::OpponentJoined);
        }
        Ok(newly_joined)
    }

    /// Handle an explicit leave request.
    ///
    /// Ignored when the connection is not a member of the named room.
    /// Returns `true` if the connection left.
    pub fn handle_leave(&self, room_id: &str, connection_id: &str) -> bool {
        match self.registry.room_of(connection_id) {
            Some(current) if current == room_id => {
                self.depart(connection_id, "left");
                true
            }
            _ => {
                debug!(
                    room = %room_id,
                    connection = %connection_id,
                    "Leave for a room the connection is not in"
                );
                false
            }
        }
    }

    /// Handle a transport-level disconnect.
    ///
    /// This transition is unconditional and runs to completion even while
    /// the connection's task is being torn down. It is naturally idempotent:
    /// once the membership is gone, a second invocation does nothing, so an
    /// explicit leave followed by the socket closing emits only one
    /// `opponent-left`.
    ///
    /// Returns the room the connection was in, if any.
    pub fn handle_disconnect(&self, connection_id: &str) -> Option<RoomId> {
        self.depart(connection_id, "disconnected")
    }

    /// Shared leave/disconnect path: registry removal first, then the
    /// membership-change relay to whoever remains.
    fn depart(&self, connection_id: &str, reason: &str) -> Option<RoomId> {
        let room_id = self.registry.leave_current(connection_id)?;
        debug!(room = %room_id, connection = %connection_id, reason, "Departed room");
        self.router
            .fan_out(&room_id, connection_id, ServerEvent::OpponentLeft);
        Some(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn setup() -> (Arc<RoomRegistry>, LifecycleManager) {
        let registry = Arc::new(RoomRegistry::new());
        let lifecycle = LifecycleManager::new(Arc::clone(&registry));
        (registry, lifecycle)
    }

    fn outbox() -> (Outbox, UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_join_notifies_existing_members_only() {
        let (_registry, lifecycle) = setup();
        let (tx_a, mut rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();

        lifecycle.handle_join("AB12CD", "conn-a", tx_a).unwrap();
        // First joiner has nobody to notify
        assert!(rx_a.try_recv().is_err());

        lifecycle.handle_join("AB12CD", "conn-b", tx_b).unwrap();
        // Existing member sees the join; the joiner does not see its own
        assert_eq!(rx_a.try_recv().unwrap(), ServerEvent::OpponentJoined);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_join_emits_nothing() {
        let (registry, lifecycle) = setup();
        let (tx_a, mut rx_a) = outbox();
        let (tx_b, _rx_b) = outbox();

        lifecycle.handle_join("AB12CD", "conn-a", tx_a).unwrap();
        lifecycle.handle_join("AB12CD", "conn-b", tx_b).unwrap();
        assert_eq!(rx_a.try_recv().unwrap(), ServerEvent::OpponentJoined);

        let (tx_b2, _rx_b2) = outbox();
        assert!(!lifecycle.handle_join("AB12CD", "conn-b", tx_b2).unwrap());
        assert_eq!(registry.member_count("AB12CD"), 2);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_notifies_remaining_member_once() {
        let (registry, lifecycle) = setup();
        let (tx_a, _rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();

        lifecycle.handle_join("AB12CD", "conn-a", tx_a).unwrap();
        lifecycle.handle_join("AB12CD", "conn-b", tx_b).unwrap();

        assert_eq!(
            lifecycle.handle_disconnect("conn-a").as_deref(),
            Some("AB12CD")
        );
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::OpponentLeft);
        assert!(rx_b.try_recv().is_err());

        // Disconnect after departure is a no-op
        assert!(lifecycle.handle_disconnect("conn-a").is_none());
        assert_eq!(registry.member_count("AB12CD"), 1);
    }

    #[test]
    fn test_leave_then_disconnect_emits_one_opponent_left() {
        let (_registry, lifecycle) = setup();
        let (tx_a, _rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();

        lifecycle.handle_join("AB12CD", "conn-a", tx_a).unwrap();
        lifecycle.handle_join("AB12CD", "conn-b", tx_b).unwrap();

        assert!(lifecycle.handle_leave("AB12CD", "conn-a"));
        // Socket closes afterwards; cleanup must not duplicate the event
        assert!(lifecycle.handle_disconnect("conn-a").is_none());

        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::OpponentLeft);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_leave_wrong_room_is_ignored() {
        let (registry, lifecycle) = setup();
        let (tx_a, _rx_a) = outbox();

        lifecycle.handle_join("AB12CD", "conn-a", tx_a).unwrap();
        assert!(!lifecycle.handle_leave("OTHER", "conn-a"));
        assert_eq!(registry.member_count("AB12CD"), 1);
    }

    #[test]
    fn test_switching_rooms_leaves_the_old_one() {
        let (registry, lifecycle) = setup();
        let (tx_a, _rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();

        lifecycle.handle_join("ROOM-1", "conn-a", tx_a).unwrap();
        lifecycle.handle_join("ROOM-1", "conn-b", tx_b).unwrap();
        rx_b.try_recv().ok();

        let (tx_a2, _rx_a2) = outbox();
        lifecycle.handle_join("ROOM-2", "conn-a", tx_a2).unwrap();

        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::OpponentLeft);
        assert_eq!(registry.members_of("ROOM-1"), vec!["conn-b".to_string()]);
        assert_eq!(registry.members_of("ROOM-2"), vec!["conn-a".to_string()]);
    }

    #[test]
    fn test_last_member_departure_reclaims_room() {
        let (registry, lifecycle) = setup();
        let (tx_a, _rx_a) = outbox();
        let (tx_b, _rx_b) = outbox();

        lifecycle.handle_join("AB12CD", "conn-a", tx_a).unwrap();
        lifecycle.handle_join("AB12CD", "conn-b", tx_b).unwrap();

        lifecycle.handle_disconnect("conn-a");
        assert!(registry.room_exists("AB12CD"));
        lifecycle.handle_disconnect("conn-b");
        assert!(!registry.room_exists("AB12CD"));

        // A reconnect gets a new connection id and must re-join from scratch
        let (tx_a2, _rx_a2) = outbox();
        assert!(lifecycle.handle_join("AB12CD", "conn-a-2", tx_a2).unwrap());
        assert_eq!(registry.members_of("AB12CD"), vec!["conn-a-2".to_string()]);
    }

    #[test]
    fn test_two_racer_scenario() {
        use keyrace_protocol::ClientEvent;

        let (registry, lifecycle) = setup();
        let router = EventRouter::new(Arc::clone(&registry));

        let (tx_a, _rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();
        lifecycle.handle_join("AB12CD", "conn-a", tx_a).unwrap();
        lifecycle.handle_join("AB12CD", "conn-b", tx_b).unwrap();

        router.route(
            "AB12CD",
            "conn-a",
            &ClientEvent::Ready {
                room: "AB12CD".to_string(),
            },
        );
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::OpponentReady);

        router.route(
            "AB12CD",
            "conn-a",
            &ClientEvent::Finish {
                room: "AB12CD".to_string(),
                wpm: 85.0,
                accuracy: 97.2,
                finished_at: 169_000_000,
            },
        );
        assert_eq!(
            rx_b.try_recv().unwrap(),
            ServerEvent::OpponentFinish {
                wpm: 85.0,
                accuracy: 97.2,
                finished_at: 169_000_000,
            }
        );

        lifecycle.handle_disconnect("conn-a");
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::OpponentLeft);
        assert!(rx_b.try_recv().is_err());

        lifecycle.handle_leave("AB12CD", "conn-b");
        assert!(!registry.room_exists("AB12CD"));
    }
}
