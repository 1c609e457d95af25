//! Downstream WebSocket Listener
//!
//! Accepts subscriber WebSocket connections and pumps each subscriber's
//! outbound queue into its socket as text frames.
//!
//! # Endpoints
//!
//! - `GET /` - WebSocket upgrade
//! - `GET /ws` - WebSocket upgrade
//!
//! Anything a subscriber sends is logged and discarded.

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::{SharedSubscriberRegistry, SubscriberConnection};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Listener errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(#[from] std::io::Error),
}

// =============================================================================
// Server
// =============================================================================

#[derive(Clone)]
struct ServerState {
    registry: SharedSubscriberRegistry,
    cancel: CancellationToken,
}

/// Downstream WebSocket server.
pub struct RelayServer {
    listener: TcpListener,
    state: ServerState,
}

impl RelayServer {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError::BindFailed` if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        registry: SharedSubscriberRegistry,
        cancel: CancellationToken,
    ) -> Result<Self, RelayServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(addr, e))?;

        Ok(Self {
            listener,
            state: ServerState { registry, cancel },
        })
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until cancelled. Open subscriber sockets are closed on cancel.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while running.
    pub async fn run(self) -> Result<(), RelayServerError> {
        let cancel = self.state.cancel.clone();
        let app = router(self.state);

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "Relay listening for subscribers");
        }

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

        tracing::info!("Relay listener stopped");
        Ok(())
    }
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

/// Pump one subscriber until either side goes away, then unregister it.
async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: ServerState) {
    let SubscriberConnection { id, mut rx } = state.registry.register(Some(peer));
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            payload = rx.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = sink.send(Message::Text(String::from(&*payload).into())).await {
                    tracing::debug!(subscriber = %id, error = %e, "Send to subscriber failed");
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_inbound_discarded();
                        tracing::debug!(subscriber = %id, len = text.len(), "Discarding subscriber text");
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_inbound_discarded();
                        tracing::debug!(subscriber = %id, len = data.len(), "Discarding subscriber binary");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = %id, error = %e, "Subscriber socket error");
                        break;
                    }
                }
            }
        }
    }

    state.registry.mark_closed(id);
    state.registry.unregister(id);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;
    use crate::application::ports::MockUpstreamPort;
    use crate::domain::session::SessionState;
    use crate::infrastructure::broadcast::SubscriberRegistry;

    async fn start() -> (SocketAddr, SharedSubscriberRegistry, CancellationToken) {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_state().return_const(SessionState::Open);
        let registry = Arc::new(SubscriberRegistry::new(Arc::new(upstream)));
        let cancel = CancellationToken::new();

        let server = RelayServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Arc::clone(&registry),
            cancel.clone(),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        (addr, registry, cancel)
    }

    async fn wait_for_len(registry: &SubscriberRegistry, len: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.len() != len {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn subscriber_receives_broadcast_and_is_removed_on_close() {
        let (addr, registry, cancel) = start().await;

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        wait_for_len(&registry, 1).await;

        registry.broadcast_payload(&Arc::from(r#"{"type":"ticker"}"#));
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, WsMessage::text(r#"{"type":"ticker"}"#));

        client.close(None).await.unwrap();
        wait_for_len(&registry, 0).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn inbound_messages_are_discarded() {
        let (addr, registry, cancel) = start().await;

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .unwrap();
        wait_for_len(&registry, 1).await;

        client.send(WsMessage::text("hello")).await.unwrap();
        client
            .send(WsMessage::binary(vec![1_u8, 2, 3]))
            .await
            .unwrap();

        registry.broadcast_payload(&Arc::from("{}"));
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, WsMessage::text("{}"));
        assert_eq!(registry.len(), 1);

        cancel.cancel();
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() {
        let (addr, registry, cancel) = start().await;

        let (mut a, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .unwrap();
        let (b, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .unwrap();
        wait_for_len(&registry, 2).await;

        drop(b);
        wait_for_len(&registry, 1).await;

        registry.broadcast_payload(&Arc::from("{\"n\":1}"));
        let frame = tokio::time::timeout(Duration::from_secs(2), a.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, WsMessage::text("{\"n\":1}"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let mut upstream = MockUpstreamPort::new();
        upstream.expect_state().return_const(SessionState::Open);
        let registry = Arc::new(SubscriberRegistry::new(Arc::new(upstream)));

        let err = RelayServer::bind(addr, registry, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayServerError::BindFailed(a, _) if a == addr));
    }
}
