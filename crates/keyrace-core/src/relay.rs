//! Event relay for keyrace.
//!
//! The relay forwards race-lifecycle events from a sender to the other
//! members of its room. The kind-to-kind transform is a pure function so
//! it can be tested without any networking; delivery is best-effort per
//! recipient and keeps no buffers, retries, or history.

use crate::registry::RoomRegistry;
use keyrace_protocol::{ClientEvent, ServerEvent};
use std::sync::Arc;
use tracing::{trace, warn};

/// Transform an incoming client event into the event relayed to the other
/// room members.
///
/// Returns `None` for kinds that are not relayed (keepalives; `leave` is
/// handled by the lifecycle manager, which emits the membership change
/// after the registry has been updated).
#[must_use]
pub fn relayed_form(event: &ClientEvent) -> Option<ServerEvent> {
    match event {
        ClientEvent::Join { .. } => Some(ServerEvent::OpponentJoined),
        ClientEvent::Ready { .. } => Some(ServerEvent::OpponentReady),
        ClientEvent::CountdownStart { seconds, .. } => {
            Some(ServerEvent::CountdownStart { seconds: *seconds })
        }
        ClientEvent::Progress { fraction, wpm, .. } => Some(ServerEvent::OpponentProgress {
            fraction: *fraction,
            wpm: *wpm,
        }),
        ClientEvent::Finish {
            wpm,
            accuracy,
            finished_at,
            ..
        } => Some(ServerEvent::OpponentFinish {
            wpm: *wpm,
            accuracy: *accuracy,
            finished_at: *finished_at,
        }),
        ClientEvent::RematchRequest { .. } => Some(ServerEvent::RematchOffer),
        ClientEvent::RematchAccept { .. } => Some(ServerEvent::RematchAccepted),
        ClientEvent::Leave { .. } | ClientEvent::Ping { .. } => None,
    }
}

/// Relays events to the other members of a sender's room.
///
/// The router is stateless beyond its handle on the registry.
#[derive(Clone)]
pub struct EventRouter {
    registry: Arc<RoomRegistry>,
}

impl EventRouter {
    /// Create a new router over the given registry.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Relay a client event to every other member of the sender's room.
    ///
    /// Returns the number of recipients the event was handed to. A room
    /// with no other members is a silent no-op, and a failed delivery to
    /// one recipient never prevents delivery to the rest or surfaces an
    /// error to the sender.
    pub fn route(&self, room_id: &str, sender_id: &str, event: &ClientEvent) -> usize {
        match relayed_form(event) {
            Some(relayed) => self.fan_out(room_id, sender_id, relayed),
            None => 0,
        }
    }

    /// Deliver a server event to every member of a room except the sender.
    ///
    /// Returns the number of successful deliveries.
    pub fn fan_out(&self, room_id: &str, sender_id: &str, event: ServerEvent) -> usize {
        let recipients = self.registry.others_of(room_id, sender_id);
        if recipients.is_empty() {
            trace!(room = %room_id, kind = event.kind(), "No relay recipients");
            return 0;
        }

        let mut delivered = 0;
        for (recipient_id, outbox) in recipients {
            if outbox.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                // Recipient's task is gone; its disconnect cleanup will
                // remove it from the registry.
                warn!(
                    room = %room_id,
                    recipient = %recipient_id,
                    kind = event.kind(),
                    "Dropped relay to closed connection"
                );
            }
        }

        trace!(
            room = %room_id,
            sender = %sender_id,
            kind = event.kind(),
            recipients = delivered,
            "Relayed event"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrace_protocol::ServerEvent;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn setup() -> (Arc<RoomRegistry>, EventRouter) {
        let registry = Arc::new(RoomRegistry::new());
        let router = EventRouter::new(Arc::clone(&registry));
        (registry, router)
    }

    fn join(registry: &RoomRegistry, room: &str, conn: &str) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.join(room, conn, tx).unwrap();
        rx
    }

    #[test]
    fn test_relayed_form_table() {
        let room = "AB12CD".to_string();

        assert_eq!(
            relayed_form(&ClientEvent::Join { room: room.clone() }),
            Some(ServerEvent::OpponentJoined)
        );
        assert_eq!(
            relayed_form(&ClientEvent::Ready { room: room.clone() }),
            Some(ServerEvent::OpponentReady)
        );
        assert_eq!(
            relayed_form(&ClientEvent::CountdownStart {
                room: room.clone(),
                seconds: 3
            }),
            Some(ServerEvent::CountdownStart { seconds: 3 })
        );
        assert_eq!(
            relayed_form(&ClientEvent::Progress {
                room: room.clone(),
                fraction: 0.5,
                wpm: 90.0
            }),
            Some(ServerEvent::OpponentProgress {
                fraction: 0.5,
                wpm: 90.0
            })
        );
        assert_eq!(
            relayed_form(&ClientEvent::Finish {
                room: room.clone(),
                wpm: 85.0,
                accuracy: 97.2,
                finished_at: 169_000_000
            }),
            Some(ServerEvent::OpponentFinish {
                wpm: 85.0,
                accuracy: 97.2,
                finished_at: 169_000_000
            })
        );
        assert_eq!(
            relayed_form(&ClientEvent::RematchRequest { room: room.clone() }),
            Some(ServerEvent::RematchOffer)
        );
        assert_eq!(
            relayed_form(&ClientEvent::RematchAccept { room: room.clone() }),
            Some(ServerEvent::RematchAccepted)
        );
        assert_eq!(relayed_form(&ClientEvent::Leave { room }), None);
        assert_eq!(relayed_form(&ClientEvent::Ping { timestamp: None }), None);
    }

    #[test]
    fn test_route_excludes_sender() {
        let (registry, router) = setup();
        let mut rx_a = join(&registry, "AB12CD", "conn-a");
        let mut rx_b = join(&registry, "AB12CD", "conn-b");

        let delivered = router.route(
            "AB12CD",
            "conn-a",
            &ClientEvent::Ready {
                room: "AB12CD".to_string(),
            },
        );

        assert_eq!(delivered, 1);
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::OpponentReady);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_route_does_not_leak_across_rooms() {
        let (registry, router) = setup();
        let _rx_a = join(&registry, "ROOM-1", "conn-a");
        let mut rx_b = join(&registry, "ROOM-1", "conn-b");
        let mut rx_c = join(&registry, "ROOM-2", "conn-c");

        router.route(
            "ROOM-1",
            "conn-a",
            &ClientEvent::Progress {
                room: "ROOM-1".to_string(),
                fraction: 0.25,
                wpm: 60.0,
            },
        );

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_route_empty_room_is_noop() {
        let (registry, router) = setup();
        let _rx = join(&registry, "AB12CD", "conn-a");

        // Sole member: no other recipients, no error
        let delivered = router.route(
            "AB12CD",
            "conn-a",
            &ClientEvent::Progress {
                room: "AB12CD".to_string(),
                fraction: 0.9,
                wpm: 100.0,
            },
        );
        assert_eq!(delivered, 0);

        // Unknown room behaves the same
        assert_eq!(
            router.route(
                "NOSUCH",
                "conn-a",
                &ClientEvent::Ready {
                    room: "NOSUCH".to_string()
                }
            ),
            0
        );
    }

    #[test]
    fn test_route_survives_closed_recipient() {
        let (registry, router) = setup();
        let _rx_a = join(&registry, "AB12CD", "conn-a");
        let rx_b = join(&registry, "AB12CD", "conn-b");
        let mut rx_c = join(&registry, "AB12CD", "conn-c");

        // conn-b's task is gone but it hasn't been cleaned up yet
        drop(rx_b);

        let delivered = router.route(
            "AB12CD",
            "conn-a",
            &ClientEvent::Ready {
                room: "AB12CD".to_string(),
            },
        );

        // Delivery to conn-c proceeds despite the failure to conn-b
        assert_eq!(delivered, 1);
        assert_eq!(rx_c.try_recv().unwrap(), ServerEvent::OpponentReady);
    }
}
