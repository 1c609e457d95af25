//! Shared fixtures: a mock upstream feed and downstream client helpers.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Generous bound for anything that should happen "soon".
pub const WAIT: Duration = Duration::from_secs(5);

/// Server side of one accepted upstream connection.
pub type UpstreamConn = WebSocketStream<TcpStream>;

/// Downstream client socket.
pub type ClientConn = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Mock Upbit WebSocket endpoint.
pub struct MockUpstream {
    pub addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    conns: mpsc::UnboundedReceiver<UpstreamConn>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let (tx, conns) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepts);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                if tx.send(ws).is_err() {
                    break;
                }
            }
        });

        Self {
            addr,
            accepts,
            conns,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Completed WebSocket handshakes so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection.
    pub async fn next_conn(&mut self) -> UpstreamConn {
        timeout(WAIT, self.conns.recv())
            .await
            .expect("timed out waiting for upstream connection")
            .expect("accept loop ended")
    }
}

/// Next text frame from the relay, skipping control frames.
pub async fn next_text<S>(ws: &mut WebSocketStream<S>) -> String
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for text frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Next text frame parsed as JSON.
pub async fn next_json<S>(ws: &mut WebSocketStream<S>) -> Value
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    serde_json::from_str(&next_text(ws).await).unwrap()
}

/// Send a JSON value as a binary frame, the way Upbit does.
pub async fn send_binary_json(ws: &mut UpstreamConn, value: &Value) {
    ws.send(Message::binary(serde_json::to_vec(value).unwrap()))
        .await
        .unwrap();
}

/// Connect a downstream subscriber.
pub async fn connect_client(addr: SocketAddr) -> ClientConn {
    let (ws, _) = timeout(
        WAIT,
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/", addr.port())),
    )
    .await
    .unwrap()
    .unwrap();
    ws
}

/// Poll `predicate` until it holds or `WAIT` elapses.
pub async fn wait_until<F>(mut predicate: F)
where
    F: FnMut() -> bool,
{
    timeout(WAIT, async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
