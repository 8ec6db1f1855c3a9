//! Connection handlers for the keyrace coordinator.
//!
//! This module handles the WebSocket connection lifecycle: one task per
//! racer, an outbox channel for relayed events, and a single unconditional
//! disconnect cleanup when the socket ends for any reason.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use keyrace_core::{EventRouter, LifecycleManager, RegistryConfig, RoomRegistry};
use keyrace_protocol::{codec, ClientEvent, ServerEvent};
use keyrace_transport::ConnectionId;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The room membership registry.
    pub registry: Arc<RoomRegistry>,
    /// Lifecycle transitions (join/leave/disconnect).
    pub lifecycle: LifecycleManager,
    /// Race event relay.
    pub router: EventRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(RoomRegistry::with_config(RegistryConfig {
            max_rooms: config.limits.max_rooms,
            max_members_per_room: config.limits.max_members_per_room,
        }));

        Self {
            lifecycle: LifecycleManager::new(Arc::clone(&registry)),
            router: EventRouter::new(Arc::clone(&registry)),
            registry,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("keyrace coordinator listening on {}", addr);
    info!(
        "Race endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": stats.room_count,
        "racers": stats.connection_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();

    debug!(connection = %connection_id, "Racer connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Send the Connected handshake
    let connected =
        ServerEvent::connected(connection_id.as_str(), state.config.heartbeat.interval_ms as u32);
    if send_event(&mut sender, &connected).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected handshake");
        return;
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Outbox: the registry hands the sender half to other racers' relays;
    // this task drains the receiver half into the socket, preserving the
    // per-sender FIFO order of whatever was relayed here.
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Relayed events destined for this racer
            Some(event) = outbox_rx.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    metrics::record_relay_failure();
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        read_buffer.extend_from_slice(&data);

                        if !drain_events(
                            &mut read_buffer,
                            &connection_id,
                            &state,
                            &mut sender,
                            &outbox_tx,
                        )
                        .await
                        {
                            break;
                        }

                        metrics::record_event(data.len(), "inbound");
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        let start = Instant::now();
                        read_buffer.extend_from_slice(text.as_bytes());

                        if !drain_events(
                            &mut read_buffer,
                            &connection_id,
                            &state,
                            &mut sender,
                            &outbox_tx,
                        )
                        .await
                        {
                            break;
                        }

                        metrics::record_event(text.len(), "inbound");
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup runs unconditionally on every exit path: remove the racer
    // from its room and tell whoever remains.
    if let Some(room) = state.lifecycle.handle_disconnect(connection_id.as_str()) {
        debug!(connection = %connection_id, room = %room, "Removed from room on disconnect");
    }
    metrics::set_active_rooms(state.registry.stats().room_count);

    debug!(connection = %connection_id, "Racer disconnected");
}

/// Decode and handle every complete event in the read buffer.
///
/// Malformed frames are dropped with a diagnostic log and the connection
/// stays open. Returns `false` if the socket failed and the connection
/// loop should end.
async fn drain_events(
    read_buffer: &mut BytesMut,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
    outbox_tx: &mpsc::UnboundedSender<ServerEvent>,
) -> bool {
    loop {
        match codec::decode_from::<ClientEvent>(read_buffer) {
            Ok(Some(event)) => {
                if let Err(e) = handle_event(&event, connection_id, state, sender, outbox_tx).await
                {
                    error!(connection = %connection_id, error = %e, "Event handling error");
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e @ keyrace_protocol::ProtocolError::FrameTooLarge(_)) => {
                // An oversized length prefix cannot be skipped; the stream
                // is unsynchronizable from here on
                warn!(connection = %connection_id, error = %e, "Unrecoverable frame, closing");
                metrics::record_error("oversized");
                return false;
            }
            Err(e) => {
                // Frame bytes were consumed; drop it and keep reading
                warn!(connection = %connection_id, error = %e, "Dropping malformed event");
                metrics::record_error("malformed");
            }
        }
    }
}

/// Handle a decoded client event.
async fn handle_event(
    event: &ClientEvent,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
    outbox_tx: &mpsc::UnboundedSender<ServerEvent>,
) -> Result<()> {
    match event {
        ClientEvent::Join { room } => {
            debug!(connection = %connection_id, room = %room, "Join request");

            match state
                .lifecycle
                .handle_join(room, connection_id.as_str(), outbox_tx.clone())
            {
                Ok(true) => {
                    metrics::record_join();
                    metrics::set_active_rooms(state.registry.stats().room_count);
                }
                Ok(false) => {
                    debug!(connection = %connection_id, room = %room, "Already joined");
                }
                Err(e) => {
                    // The racer stays connected; the join just didn't happen
                    warn!(connection = %connection_id, room = %room, error = %e, "Join rejected");
                    metrics::record_error("join");
                }
            }
        }

        ClientEvent::Leave { room } => {
            debug!(connection = %connection_id, room = %room, "Leave request");
            state.lifecycle.handle_leave(room, connection_id.as_str());
            metrics::set_active_rooms(state.registry.stats().room_count);
        }

        ClientEvent::Ping { timestamp } => {
            send_event(sender, &ServerEvent::pong(*timestamp)).await?;
        }

        _ => {
            // Relayable race event: only route it when the sender actually
            // belongs to the room it names, so events never cross rooms.
            let Some(room) = event.room() else {
                return Ok(());
            };

            let in_room = state
                .registry
                .room_of(connection_id.as_str())
                .is_some_and(|current| current == *room);

            if !in_room {
                debug!(
                    connection = %connection_id,
                    room = %room,
                    kind = event.kind(),
                    "Dropping event for a room the sender is not in"
                );
                return Ok(());
            }

            let recipients = state.router.route(room, connection_id.as_str(), event);
            debug!(
                connection = %connection_id,
                room = %room,
                kind = event.kind(),
                recipients,
                "Relayed"
            );
        }
    }

    Ok(())
}

/// Send a server event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let data = codec::encode(event)?;
    metrics::record_event(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    async fn spawn_server() -> std::net::SocketAddr {
        let state = Arc::new(AppState::new(Config::default()));
        let app = Router::new()
            .route("/race", get(ws_handler))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn inbound_event_count(rendered: &str) -> u64 {
        rendered
            .lines()
            .find(|line| {
                line.starts_with(metrics::names::EVENTS_TOTAL)
                    && line.contains("direction=\"inbound\"")
            })
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_text_frames_feed_the_event_pipeline() {
        let handle = PrometheusBuilder::new().install_recorder().unwrap();
        let addr = spawn_server().await;

        let (mut client, _) = connect_async(format!("ws://{}/race", addr)).await.unwrap();
        // Consume the connected handshake
        client.next().await.unwrap().unwrap();

        let join = codec::encode(&ClientEvent::Join {
            room: "AB12CD".to_string(),
        })
        .unwrap();
        client.send(WsMessage::Binary(join.to_vec())).await.unwrap();

        // Length-prefixed garbage that happens to be valid UTF-8: each frame
        // is dropped, the connection survives, and the inbound counters tick
        let garbage = String::from_utf8(vec![0, 0, 0, 3, b'a', b'b', b'c']).unwrap();
        for _ in 0..3 {
            client.send(WsMessage::Text(garbage.clone())).await.unwrap();
        }

        // A ping round-trip orders this task after the frames above
        let ping = codec::encode(&ClientEvent::Ping { timestamp: Some(1) }).unwrap();
        client.send(WsMessage::Binary(ping.to_vec())).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        let WsMessage::Binary(data) = reply else {
            panic!("Expected a binary pong, got {:?}", reply);
        };
        let pong: ServerEvent = codec::decode(&data).unwrap();
        assert_eq!(pong, ServerEvent::Pong { timestamp: Some(1) });

        // The binary join plus all three text frames must be counted
        let inbound = inbound_event_count(&handle.render());
        assert!(inbound >= 4, "inbound event count was {}", inbound);
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_closes_connection() {
        let addr = spawn_server().await;

        let (mut client, _) = connect_async(format!("ws://{}/race", addr)).await.unwrap();
        client.next().await.unwrap().unwrap();

        let mut bytes = BytesMut::new();
        bytes.put_u32((codec::MAX_FRAME_SIZE + 1) as u32);
        client.send(WsMessage::Binary(bytes.to_vec())).await.unwrap();

        // The server ends the connection instead of stalling on a frame it
        // can never skip
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    }
}
