//! Upstream Session
//!
//! Owns the single WebSocket connection to the Upbit ticker feed.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──► Open ──► Closing ──► Reconnecting
//!                                  │                                  │
//!                                  └───────── connect failed ────────►│
//!                                  ▲                                  │
//!                                  └──────────── after delay ─────────┘
//! ```
//!
//! Every close, error or failed connect waits the fixed reconnect delay and
//! tries again, forever. Only cancellation returns the session to
//! `Disconnected`.
//!
//! # Protocol
//!
//! After the socket opens the subscribe list is sent as chunked ticker
//! subscription frames. Records arrive as binary frames holding one JSON
//! object each; they are decoded, enriched and emitted as
//! [`UpstreamEvent::Record`]. Text frames are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::BinaryJsonCodec;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::subscription::{self, DEFAULT_CHUNK_SIZE, DEFAULT_TICKET_PREFIX};
use crate::application::ports::UpstreamPort;
use crate::domain::market::InstrumentCode;
use crate::domain::session::{SessionState, SessionStateCell};
use crate::domain::ticker::{Enricher, TickerMessage};
use crate::infrastructure::metrics::{self, FrameKind, RecordKind};

/// Default upstream endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://api.upbit.com/websocket/v1";

/// Default keepalive ping interval.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Subscription frame could not be serialized.
    #[error("failed to encode subscription frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// Connection closed by the server or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,
}

impl UpstreamError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::WebSocket(_) => "websocket",
            Self::Encode(_) => "encode",
            Self::ConnectionClosed => "closed",
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the upstream session.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// Connection opened.
    Connected,
    /// Subscription frames sent.
    Subscribed {
        /// Number of frames.
        frames: usize,
        /// Number of codes across all frames.
        codes: usize,
    },
    /// Decoded (and, for catalogued tickers, enriched) record.
    Record(TickerMessage),
    /// Connection lost.
    Disconnected,
    /// Waiting before the next attempt.
    Reconnecting {
        /// Consecutive attempt number since the last open connection.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the upstream session.
#[derive(Debug, Clone)]
pub struct UpstreamSessionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum codes per subscription frame. Must be non-zero.
    pub chunk_size: usize,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Keepalive ping interval; `None` disables pings.
    pub keepalive: Option<Duration>,
    /// Ticket prefix for subscription frames.
    pub ticket_prefix: String,
}

impl UpstreamSessionConfig {
    /// Create a configuration with defaults for everything but the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            reconnect: ReconnectConfig::default(),
            keepalive: Some(DEFAULT_KEEPALIVE),
            ticket_prefix: DEFAULT_TICKET_PREFIX.to_string(),
        }
    }

    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub fn from_settings(settings: &crate::UpstreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            chunk_size: settings.chunk_size,
            reconnect: ReconnectConfig::from_upstream_settings(settings),
            keepalive: settings.keepalive,
            ticket_prefix: settings.ticket_prefix.clone(),
        }
    }

    /// Set the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect = ReconnectConfig::new(delay);
        self
    }

    /// Set the chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the keepalive interval.
    #[must_use]
    pub const fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }
}

impl Default for UpstreamSessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_URL)
    }
}

// =============================================================================
// Upstream Session
// =============================================================================

/// Handle to the upstream session.
///
/// Cheap to clone; all clones control the same connection.
#[derive(Clone)]
pub struct UpstreamSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: UpstreamSessionConfig,
    codes: Arc<[InstrumentCode]>,
    enricher: Enricher,
    codec: BinaryJsonCodec,
    state: SessionStateCell,
    event_tx: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
    connection_attempts: AtomicU64,
}

impl std::fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSession")
            .field("url", &self.inner.config.url)
            .field("codes", &self.inner.codes.len())
            .field("state", &self.inner.state.load())
            .finish_non_exhaustive()
    }
}

impl UpstreamSession {
    /// Create a session. Nothing connects until [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        config: UpstreamSessionConfig,
        codes: Vec<InstrumentCode>,
        enricher: Enricher,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                codes: codes.into(),
                enricher,
                codec: BinaryJsonCodec::new(),
                state: SessionStateCell::new(),
                event_tx,
                cancel,
                connection_attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Start the session task if none is running.
    ///
    /// Returns `true` only when this call started the task. A no-op when the
    /// subscribe list is empty, after cancellation, or while the session is
    /// connecting, open, closing or waiting to reconnect.
    pub fn connect(&self) -> bool {
        if self.inner.codes.is_empty() {
            tracing::debug!("No instrument codes; upstream connect skipped");
            return false;
        }
        if self.inner.cancel.is_cancelled() {
            return false;
        }
        if !self.inner.state.try_begin_connect() {
            tracing::trace!(state = %self.inner.state.load(), "Upstream session already active");
            return false;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run());
        true
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.load()
    }

    /// Total connection attempts since creation.
    #[must_use]
    pub fn connection_attempts(&self) -> u64 {
        self.inner.connection_attempts.load(Ordering::Relaxed)
    }

    /// The subscribe list.
    #[must_use]
    pub fn codes(&self) -> &[InstrumentCode] {
        &self.inner.codes
    }
}

impl UpstreamPort for UpstreamSession {
    fn connect(&self) -> bool {
        Self::connect(self)
    }

    fn state(&self) -> SessionState {
        Self::state(self)
    }
}

impl SessionInner {
    /// Connection loop. Runs until cancelled.
    async fn run(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect);

        loop {
            let result = self.connect_and_run(&mut policy).await;
            metrics::set_upstream_connected(false);

            if self.cancel.is_cancelled() {
                self.state.set(SessionState::Disconnected);
                tracing::info!("Upstream session cancelled");
                return;
            }

            if let Err(e) = result {
                metrics::record_upstream_error(e.kind());
                tracing::warn!(error = %e, "Upstream connection error");
            }

            self.state.set(SessionState::Reconnecting);
            self.emit(UpstreamEvent::Disconnected).await;

            let delay = policy.next_delay();
            let attempt = policy.attempt_count();
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to upstream feed"
            );
            self.emit(UpstreamEvent::Reconnecting { attempt, delay })
                .await;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.state.set(SessionState::Disconnected);
                    tracing::info!("Upstream session cancelled during reconnect delay");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            if !self
                .state
                .compare_and_set(SessionState::Reconnecting, SessionState::Connecting)
            {
                tracing::debug!(state = %self.state.load(), "Reconnect superseded");
                return;
            }
        }
    }

    /// Open one connection and pump it until it ends.
    ///
    /// Returns `Ok(())` only on cancellation.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), UpstreamError> {
        tracing::info!(url = %self.config.url, "Connecting to upstream feed");
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result?,
        };

        let (mut write, mut read) = ws_stream.split();

        self.state.set(SessionState::Open);
        policy.reset();
        metrics::set_upstream_connected(true);
        tracing::info!("Upstream connection open");
        self.emit(UpstreamEvent::Connected).await;

        self.send_subscriptions(&mut write).await?;

        let mut keepalive = self
            .config
            .keepalive
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.state.set(SessionState::Closing);
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "Failed to send close frame");
                    }
                    return Ok(());
                }
                () = keepalive_tick(&mut keepalive) => {
                    tracing::trace!("Sending keepalive ping");
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            self.handle_frame(&data).await;
                        }
                        Some(Ok(Message::Text(text))) => {
                            metrics::record_upstream_frame(FrameKind::Text);
                            tracing::trace!(len = text.len(), "Ignoring text frame");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Upstream sent close frame");
                            self.state.set(SessionState::Closing);
                            return Err(UpstreamError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            self.state.set(SessionState::Closing);
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!("Upstream stream ended");
                            self.state.set(SessionState::Closing);
                            return Err(UpstreamError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Send the subscribe list as chunked ticker frames.
    async fn send_subscriptions<W>(&self, write: &mut W) -> Result<(), UpstreamError>
    where
        W: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let frames = subscription::build_frames(
            &self.codes,
            self.config.chunk_size,
            &self.config.ticket_prefix,
            chrono::Utc::now().timestamp_millis(),
        );

        for frame in &frames {
            let json = frame.to_json()?;
            tracing::debug!(
                ticket = frame.ticket(),
                codes = frame.codes().len(),
                "Sending subscription frame"
            );
            write.send(Message::Text(json.into())).await?;
        }

        metrics::record_subscription_frames(frames.len() as u64);
        tracing::info!(
            frames = frames.len(),
            codes = self.codes.len(),
            "Subscribed to ticker stream"
        );
        self.emit(UpstreamEvent::Subscribed {
            frames: frames.len(),
            codes: self.codes.len(),
        })
        .await;

        Ok(())
    }

    /// Decode, enrich and emit one binary frame. Never fails the session.
    async fn handle_frame(&self, payload: &[u8]) {
        metrics::record_upstream_frame(FrameKind::Binary);

        let mut message = match self.codec.decode(payload) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_decode_error();
                tracing::warn!(error = %e, len = payload.len(), "Dropping undecodable frame");
                return;
            }
        };

        if message.is_ticker() {
            metrics::record_received(RecordKind::Ticker);
            if self.enricher.enrich(&mut message) {
                metrics::record_enriched();
            }
        } else {
            metrics::record_received(RecordKind::Other);
            tracing::trace!(kind = ?message.kind(), "Forwarding non-ticker record");
        }

        self.emit(UpstreamEvent::Record(message)).await;
    }

    async fn emit(&self, event: UpstreamEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("Upstream event receiver dropped");
        }
    }
}

async fn keepalive_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::ReferenceCatalog;

    fn session(url: &str, codes: &[&str], cancel: CancellationToken) -> UpstreamSession {
        let (tx, _rx) = mpsc::channel(16);
        UpstreamSession::new(
            UpstreamSessionConfig::new(url).with_reconnect_delay(Duration::from_millis(50)),
            codes.iter().copied().map(InstrumentCode::from).collect(),
            Enricher::with_default_field(Arc::new(ReferenceCatalog::new())),
            tx,
            cancel,
        )
    }

    #[test]
    fn config_defaults() {
        let config = UpstreamSessionConfig::default();
        assert_eq!(config.url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.keepalive, Some(Duration::from_secs(60)));
        assert_eq!(config.ticket_prefix, "relay-server-ticker");
        assert_eq!(config.reconnect.delay, Duration::from_secs(5));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(UpstreamError::ConnectionClosed.kind(), "closed");
    }

    #[tokio::test]
    async fn connect_with_no_codes_is_noop() {
        let session = session("ws://127.0.0.1:1", &[], CancellationToken::new());

        assert!(!session.connect());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.connection_attempts(), 0);
    }

    #[tokio::test]
    async fn connect_after_cancel_is_noop() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let session = session("ws://127.0.0.1:1", &["KRW-BTC"], cancel);

        assert!(!session.connect());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn second_connect_while_connecting_is_noop() {
        // Accepts TCP but never completes the WebSocket handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        let session = session(&url, &["KRW-BTC"], cancel.clone());

        assert!(session.connect());
        assert!(!session.connect());
        assert!(!session.clone().connect());
        assert_eq!(session.state(), SessionState::Connecting);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.state() != SessionState::Disconnected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn failed_connect_schedules_reconnect() {
        // Bind then drop to get a port nobody listens on.
        let url = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            format!("ws://{}", listener.local_addr().unwrap())
        };
        let cancel = CancellationToken::new();
        let session = session(&url, &["KRW-BTC"], cancel.clone());

        assert!(session.connect());
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.connection_attempts() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
    }
}
