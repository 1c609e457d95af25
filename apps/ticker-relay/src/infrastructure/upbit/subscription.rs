//! Subscription Frames
//!
//! Upbit accepts a bounded number of codes per subscription request, so the
//! subscribe list is split into fixed-size chunks and each chunk is sent as
//! its own frame with its own ticket.
//!
//! # Frame Format
//!
//! ```json
//! [{"ticket":"relay-server-ticker-1718000000000-0"},
//!  {"type":"ticker","codes":["KRW-BTC","KRW-ETH"],"isOnlyRealtime":false}]
//! ```

use serde::Serialize;

use crate::domain::market::InstrumentCode;
use crate::domain::ticker::TICKER_KIND;

/// Maximum codes per subscription frame.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default ticket prefix.
pub const DEFAULT_TICKET_PREFIX: &str = "relay-server-ticker";

/// Ticket field of a subscription frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketField {
    /// Correlation string; unique per frame.
    pub ticket: String,
}

/// Data-type field of a subscription frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeField {
    /// Stream type (`ticker`).
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Codes in this chunk.
    pub codes: Vec<InstrumentCode>,
    /// `false` requests a snapshot followed by realtime updates.
    pub is_only_realtime: bool,
}

/// One subscription request frame. Serializes as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionFrame(pub TicketField, pub TypeField);

impl SubscriptionFrame {
    /// Create a ticker subscription frame.
    #[must_use]
    pub fn ticker(ticket: String, codes: Vec<InstrumentCode>) -> Self {
        Self(
            TicketField { ticket },
            TypeField {
                kind: TICKER_KIND,
                codes,
                is_only_realtime: false,
            },
        )
    }

    /// The frame's ticket.
    #[must_use]
    pub fn ticket(&self) -> &str {
        &self.0.ticket
    }

    /// The codes carried by this frame.
    #[must_use]
    pub fn codes(&self) -> &[InstrumentCode] {
        &self.1.codes
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Build the ticket for chunk `index` of a subscription round started at
/// `timestamp_millis`.
#[must_use]
pub fn ticket_for(prefix: &str, timestamp_millis: i64, index: usize) -> String {
    format!("{prefix}-{timestamp_millis}-{index}")
}

/// Split `codes` into frames of at most `chunk_size` codes.
///
/// Produces `ceil(codes.len() / chunk_size)` frames whose code lists,
/// concatenated, equal `codes`. An empty list yields no frames.
///
/// # Panics
///
/// Panics if `chunk_size` is zero. Configuration loading rejects zero.
#[must_use]
pub fn build_frames(
    codes: &[InstrumentCode],
    chunk_size: usize,
    ticket_prefix: &str,
    timestamp_millis: i64,
) -> Vec<SubscriptionFrame> {
    codes
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| {
            SubscriptionFrame::ticker(
                ticket_for(ticket_prefix, timestamp_millis, index),
                chunk.to_vec(),
            )
        })
        .collect()
}
