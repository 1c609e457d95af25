//! Subscriber Registry
//!
//! Tracks live downstream connections and fans each upstream record out to
//! all of them.
//!
//! # Architecture
//!
//! Each subscriber owns an unbounded outbound queue drained by its socket
//! task. `broadcast` serializes a record once, snapshots the member list under
//! a read lock and pushes the shared payload to every open member outside the
//! lock. A member whose queue is gone is marked closed and removed after the
//! pass; the other members are unaffected.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::application::ports::UpstreamPort;
use crate::domain::session::SessionState;
use crate::domain::ticker::TickerMessage;
use crate::infrastructure::metrics;

// =============================================================================
// Subscriber Types
// =============================================================================

/// Registry-assigned subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialized record shared by every subscriber queue.
pub type Payload = Arc<str>;

#[derive(Debug)]
struct SubscriberHandle {
    id: SubscriberId,
    peer: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<Payload>,
    open: AtomicBool,
}

impl SubscriberHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// The subscriber side of a registration.
#[derive(Debug)]
pub struct SubscriberConnection {
    /// Assigned id; pass to [`SubscriberRegistry::unregister`] on close.
    pub id: SubscriberId,
    /// Outbound payloads for this subscriber.
    pub rx: mpsc::UnboundedReceiver<Payload>,
}

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the payload was queued for.
    pub delivered: usize,
    /// Members skipped because they were already closed.
    pub skipped: usize,
    /// Members whose queue was gone; removed from the registry.
    pub failed: usize,
}

/// Broadcast errors.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// Record could not be serialized.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// Subscriber Registry
// =============================================================================

/// Live set of downstream subscribers.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ticker_relay::application::ports::UpstreamPort;
/// use ticker_relay::domain::session::SessionState;
/// use ticker_relay::infrastructure::broadcast::SubscriberRegistry;
///
/// struct AlwaysOpen;
///
/// impl UpstreamPort for AlwaysOpen {
///     fn connect(&self) -> bool { false }
///     fn state(&self) -> SessionState { SessionState::Open }
/// }
///
/// let registry = SubscriberRegistry::new(Arc::new(AlwaysOpen));
/// let conn = registry.register(None);
/// assert_eq!(registry.len(), 1);
///
/// assert!(registry.unregister(conn.id));
/// assert!(!registry.unregister(conn.id));
/// ```
pub struct SubscriberRegistry {
    members: RwLock<HashMap<SubscriberId, Arc<SubscriberHandle>>>,
    next_id: AtomicU64,
    upstream: Arc<dyn UpstreamPort>,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("members", &self.len())
            .field("upstream", &self.upstream.state())
            .finish_non_exhaustive()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry bound to the upstream session.
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamPort>) -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            upstream,
        }
    }

    /// Add a subscriber.
    ///
    /// Asks the upstream session to connect unless it is already connecting
    /// or open.
    pub fn register(&self, peer: Option<SocketAddr>) -> SubscriberConnection {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(SubscriberHandle {
            id,
            peer,
            tx,
            open: AtomicBool::new(true),
        });

        let count = {
            let mut members = self.members.write();
            members.insert(id, handle);
            members.len()
        };
        metrics::set_subscribers(count);
        tracing::info!(subscriber = %id, ?peer, subscribers = count, "Subscriber registered");

        let state = self.upstream.state();
        if !matches!(state, SessionState::Connecting | SessionState::Open) {
            let started = self.upstream.connect();
            tracing::debug!(%state, started, "Upstream connect requested by subscriber");
        }

        SubscriberConnection { id, rx }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut members = self.members.write();
            let removed = members.remove(&id);
            (removed, members.len())
        };

        let Some(handle) = removed else {
            return false;
        };
        handle.close();
        metrics::set_subscribers(count);
        tracing::info!(
            subscriber = %id,
            peer = ?handle.peer,
            subscribers = count,
            "Subscriber unregistered"
        );
        true
    }

    /// Mark a subscriber closed without removing it. Broadcasts skip it.
    pub fn mark_closed(&self, id: SubscriberId) {
        if let Some(handle) = self.members.read().get(&id) {
            handle.close();
        }
    }

    /// Serialize `message` once and queue it for every open subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized; nothing is sent.
    pub fn broadcast(&self, message: &TickerMessage) -> Result<BroadcastReport, BroadcastError> {
        let payload: Payload = message.to_json()?.into();
        Ok(self.broadcast_payload(&payload))
    }

    /// Queue an already-serialized payload for every open subscriber.
    pub fn broadcast_payload(&self, payload: &Payload) -> BroadcastReport {
        let snapshot: Vec<Arc<SubscriberHandle>> = self.members.read().values().cloned().collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for handle in snapshot {
            if !handle.is_open() {
                report.skipped += 1;
                continue;
            }
            if handle.tx.send(Arc::clone(payload)).is_ok() {
                report.delivered += 1;
            } else {
                handle.close();
                report.failed += 1;
                failed.push(handle.id);
            }
        }

        for id in failed {
            tracing::debug!(subscriber = %id, "Removing subscriber after failed send");
            self.unregister(id);
        }

        metrics::record_messages_sent(report.delivered as u64);
        if report.failed > 0 {
            metrics::record_messages_dropped(report.failed as u64);
        }

        report
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Whether no subscribers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Current upstream state.
    #[must_use]
    pub fn upstream_state(&self) -> SessionState {
        self.upstream.state()
    }
}

/// Shared reference to the registry.
pub type SharedSubscriberRegistry = Arc<SubscriberRegistry>;

// =============================================================================
// Tests
// =============================================================================
