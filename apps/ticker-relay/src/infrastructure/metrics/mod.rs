//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Frames and records received, decode failures, reconnects
//! - **Enrichment**: Ticker records that received a display name
//! - **Downstream**: Messages delivered to and dropped for subscribers
//! - **Latency**: Time from frame receipt to fan-out completion
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Until
//! [`init_metrics`] is called every recording function is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_relay_upstream_frames_total",
        "Total WebSocket frames received from the upstream feed"
    );
    describe_counter!(
        "ticker_relay_records_received_total",
        "Total decoded records by kind"
    );
    describe_counter!(
        "ticker_relay_decode_errors_total",
        "Total upstream frames that could not be decoded"
    );
    describe_counter!(
        "ticker_relay_subscription_frames_total",
        "Total subscription frames sent upstream"
    );
    describe_counter!(
        "ticker_relay_records_enriched_total",
        "Total ticker records that received a display name"
    );

    describe_counter!(
        "ticker_relay_messages_sent_total",
        "Total messages delivered to downstream subscribers"
    );
    describe_counter!(
        "ticker_relay_messages_dropped_total",
        "Total messages not delivered because the subscriber was gone"
    );
    describe_counter!(
        "ticker_relay_inbound_discarded_total",
        "Total messages received from subscribers and discarded"
    );
    describe_gauge!(
        "ticker_relay_subscribers",
        "Number of registered downstream subscribers"
    );

    describe_gauge!(
        "ticker_relay_upstream_connected",
        "1 while the upstream connection is open"
    );
    describe_counter!(
        "ticker_relay_upstream_errors_total",
        "Total upstream connection errors by type"
    );
    describe_counter!(
        "ticker_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );

    describe_histogram!(
        "ticker_relay_fanout_seconds",
        "Time to enrich and fan out one upstream record"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Upstream frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Binary frame (carries records).
    Binary,
    /// Text frame (ignored).
    Text,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Text => "text",
        }
    }
}

/// Decoded record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `type == "ticker"`.
    Ticker,
    /// Any other object.
    Other,
}

impl RecordKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Other => "other",
        }
    }
}

/// Record a frame received from upstream.
pub fn record_upstream_frame(kind: FrameKind) {
    counter!(
        "ticker_relay_upstream_frames_total",
        "frame" => kind.as_str()
    )
    .increment(1);
}

/// Record a decoded record.
pub fn record_received(kind: RecordKind) {
    counter!(
        "ticker_relay_records_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("ticker_relay_decode_errors_total").increment(1);
}

/// Record subscription frames sent upstream.
pub fn record_subscription_frames(count: u64) {
    counter!("ticker_relay_subscription_frames_total").increment(count);
}

/// Record an enriched ticker record.
pub fn record_enriched() {
    counter!("ticker_relay_records_enriched_total").increment(1);
}

/// Record messages delivered downstream.
pub fn record_messages_sent(count: u64) {
    counter!("ticker_relay_messages_sent_total").increment(count);
}

/// Record messages dropped for gone subscribers.
pub fn record_messages_dropped(count: u64) {
    counter!("ticker_relay_messages_dropped_total").increment(count);
}

/// Record a discarded inbound subscriber message.
pub fn record_inbound_discarded() {
    counter!("ticker_relay_inbound_discarded_total").increment(1);
}

/// Update the subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("ticker_relay_subscribers").set(count as f64);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("ticker_relay_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record an upstream connection error.
pub fn record_upstream_error(error_type: &'static str) {
    counter!(
        "ticker_relay_upstream_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("ticker_relay_reconnects_total").increment(1);
}

/// Record fan-out duration for one record.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("ticker_relay_fanout_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_as_str() {
        assert_eq!(FrameKind::Binary.as_str(), "binary");
        assert_eq!(FrameKind::Text.as_str(), "text");
    }

    #[test]
    fn record_kind_as_str() {
        assert_eq!(RecordKind::Ticker.as_str(), "ticker");
        assert_eq!(RecordKind::Other.as_str(), "other");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_upstream_frame(FrameKind::Binary);
        record_received(RecordKind::Other);
        record_decode_error();
        set_subscribers(3);
        set_upstream_connected(true);
        record_fanout_duration(Duration::from_micros(15));
    }
}
