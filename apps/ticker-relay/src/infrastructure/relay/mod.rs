//! Relay Coordinator
//!
//! Wires reference data, the upstream session, the subscriber registry and
//! the downstream listener together.
//!
//! # Startup
//!
//! 1. Load reference data once; on failure continue with none.
//! 2. Build the enricher and upstream session.
//! 3. Spawn the event router (session events → registry broadcast).
//! 4. Connect upstream if there are codes; otherwise stay idle for good.
//! 5. Bind the downstream listener and serve.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::RelayConfig;
use crate::application::ports::ReferenceDataPort;
use crate::domain::market::ReferenceData;
use crate::domain::session::SessionState;
use crate::domain::ticker::Enricher;
use crate::infrastructure::broadcast::{SharedSubscriberRegistry, SubscriberRegistry};
use crate::infrastructure::metrics;
use crate::infrastructure::server::{RelayServer, RelayServerError};
use crate::infrastructure::upbit::session::{
    UpstreamEvent, UpstreamSession, UpstreamSessionConfig,
};

/// Relay startup errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The downstream listener could not be started.
    #[error("listener error: {0}")]
    Listener(#[from] RelayServerError),

    /// The bound address could not be read.
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Builds and starts the relay.
pub struct RelayCoordinator {
    config: RelayConfig,
    reference: Arc<dyn ReferenceDataPort>,
    cancel: CancellationToken,
    bind_addr: Option<SocketAddr>,
}

impl RelayCoordinator {
    /// Create a coordinator. The listener binds `0.0.0.0:<relay_port>`.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        reference: Arc<dyn ReferenceDataPort>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            reference,
            cancel,
            bind_addr: None,
        }
    }

    /// Bind the listener to `addr` instead of the configured port.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Start the relay.
    ///
    /// # Errors
    ///
    /// Returns an error only if the downstream listener cannot be bound.
    pub async fn start(self) -> Result<RunningRelay, RelayError> {
        let data = match self.reference.load().await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Reference data unavailable; continuing without it");
                ReferenceData::empty()
            }
        };

        let code_count = data.codes.len();
        let catalog_size = data.catalog.len();
        tracing::info!(codes = code_count, catalog = catalog_size, "Reference data loaded");

        let enricher = Enricher::new(Arc::new(data.catalog), self.config.display_field.clone());
        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity);

        let session = UpstreamSession::new(
            UpstreamSessionConfig::from_settings(&self.config.upstream),
            data.codes,
            enricher,
            event_tx,
            self.cancel.clone(),
        );
        let registry: SharedSubscriberRegistry =
            Arc::new(SubscriberRegistry::new(Arc::new(session.clone())));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(route_events(
            event_rx,
            Arc::clone(&registry),
            self.cancel.clone(),
        )));

        if code_count == 0 {
            tracing::warn!("No instrument codes; upstream connection disabled");
        } else {
            session.connect();
        }

        let bind_addr = self
            .bind_addr
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], self.config.server.relay_port)));
        let server =
            RelayServer::bind(bind_addr, Arc::clone(&registry), self.cancel.clone()).await?;
        let local_addr = server.local_addr().map_err(RelayError::LocalAddr)?;

        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Relay listener error");
            }
        }));

        Ok(RunningRelay {
            local_addr,
            session,
            registry,
            code_count,
            catalog_size,
            cancel: self.cancel,
            tasks,
        })
    }
}

/// Forward session events to the registry until cancelled.
async fn route_events(
    mut rx: mpsc::Receiver<UpstreamEvent>,
    registry: SharedSubscriberRegistry,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        let Some(event) = event else { break };

        match event {
            UpstreamEvent::Record(message) => {
                let started = Instant::now();
                match registry.broadcast(&message) {
                    Ok(report) => {
                        tracing::trace!(
                            code = ?message.code(),
                            delivered = report.delivered,
                            skipped = report.skipped,
                            failed = report.failed,
                            "Record broadcast"
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to broadcast record"),
                }
                metrics::record_fanout_duration(started.elapsed());
            }
            UpstreamEvent::Connected => {
                tracing::info!(subscribers = registry.len(), "Upstream feed connected");
            }
            UpstreamEvent::Subscribed { frames, codes } => {
                tracing::debug!(frames, codes, "Upstream subscriptions sent");
            }
            UpstreamEvent::Disconnected => {
                tracing::warn!("Upstream feed disconnected");
            }
            UpstreamEvent::Reconnecting { attempt, delay } => {
                tracing::debug!(attempt, delay_ms = delay.as_millis(), "Upstream feed reconnecting");
            }
        }
    }

    tracing::debug!("Event router stopped");
}

/// Handle to a started relay.
pub struct RunningRelay {
    local_addr: SocketAddr,
    session: UpstreamSession,
    registry: SharedSubscriberRegistry,
    code_count: usize,
    catalog_size: usize,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningRelay {
    /// Address the downstream listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The upstream session.
    #[must_use]
    pub const fn session(&self) -> &UpstreamSession {
        &self.session
    }

    /// The subscriber registry.
    #[must_use]
    pub const fn registry(&self) -> &SharedSubscriberRegistry {
        &self.registry
    }

    /// Number of codes in the subscribe list.
    #[must_use]
    pub const fn code_count(&self) -> usize {
        self.code_count
    }

    /// Number of catalogued instruments.
    #[must_use]
    pub const fn catalog_size(&self) -> usize {
        self.catalog_size
    }

    /// Whether the relay is intentionally idle (no codes to subscribe).
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.code_count == 0
    }

    /// Whether the relay can serve data.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_idle() || self.session.state() == SessionState::Open
    }

    /// Cancel everything and wait up to `timeout` for tasks to finish.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();

        let join_all = async {
            for task in self.tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Relay task failed");
                }
            }
        };

        if tokio::time::timeout(timeout, join_all).await.is_err() {
            tracing::warn!(timeout_ms = timeout.as_millis(), "Relay shutdown timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ReferenceDataError;
    use crate::infrastructure::reference::StaticReferenceSource;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn failed_reference_load_starts_idle() {
        let source = Arc::new(StaticReferenceSource::failing(ReferenceDataError::Network(
            "unreachable".into(),
        )));

        let relay = RelayCoordinator::new(
            RelayConfig::default(),
            Arc::clone(&source) as Arc<dyn ReferenceDataPort>,
            CancellationToken::new(),
        )
        .with_bind_addr(loopback())
        .start()
        .await
        .unwrap();

        assert_eq!(source.load_count(), 1);
        assert!(relay.is_idle());
        assert!(relay.is_ready());
        assert_eq!(relay.session().state(), SessionState::Disconnected);
        assert_eq!(relay.session().connection_attempts(), 0);

        relay.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn bind_failure_is_an_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

        let result = RelayCoordinator::new(
            RelayConfig::default(),
            Arc::new(StaticReferenceSource::new(ReferenceData::empty())),
            CancellationToken::new(),
        )
        .with_bind_addr(taken.local_addr().unwrap())
        .start()
        .await;

        assert!(matches!(result, Err(RelayError::Listener(_))));
    }
}
