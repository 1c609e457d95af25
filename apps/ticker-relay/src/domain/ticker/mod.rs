//! Ticker Records and Enrichment
//!
//! A `TickerMessage` is one decoded record from the upstream feed. The relay
//! treats it as an open JSON object: only `type` and `code` are interpreted,
//! every other field passes through untouched.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::market::ReferenceCatalog;

/// Message kind that receives enrichment.
pub const TICKER_KIND: &str = "ticker";

/// Default field the display name is written to.
pub const DEFAULT_DISPLAY_FIELD: &str = "korean_name";

// =============================================================================
// Ticker Message
// =============================================================================

/// A decoded upstream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerMessage {
    fields: Map<String, Value>,
}

impl TickerMessage {
    /// Wrap a decoded JSON object.
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Message kind (`type` field).
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.fields.get("type").and_then(Value::as_str)
    }

    /// Instrument code (`code` field).
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.fields.get("code").and_then(Value::as_str)
    }

    /// Whether this record is a ticker.
    #[must_use]
    pub fn is_ticker(&self) -> bool {
        self.kind() == Some(TICKER_KIND)
    }

    /// Read a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Borrow the underlying object.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Serialize to compact JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.fields)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }
}

impl From<Map<String, Value>> for TickerMessage {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

// =============================================================================
// Enricher
// =============================================================================

/// Attaches catalog display names to ticker records.
///
/// Enrichment is idempotent: the same record enriched twice is identical to
/// the record enriched once. Records that are not tickers, carry no code, or
/// carry an uncatalogued code are left as they are.
#[derive(Debug, Clone)]
pub struct Enricher {
    catalog: Arc<ReferenceCatalog>,
    field: String,
}

impl Enricher {
    /// Create an enricher writing into `field`.
    #[must_use]
    pub fn new(catalog: Arc<ReferenceCatalog>, field: impl Into<String>) -> Self {
        Self {
            catalog,
            field: field.into(),
        }
    }

    /// Create an enricher writing into [`DEFAULT_DISPLAY_FIELD`].
    #[must_use]
    pub fn with_default_field(catalog: Arc<ReferenceCatalog>) -> Self {
        Self::new(catalog, DEFAULT_DISPLAY_FIELD)
    }

    /// Field name the display name is written to.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The catalog used for lookups.
    #[must_use]
    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    /// Enrich a record in place. Returns `true` if a name was attached.
    pub fn enrich(&self, message: &mut TickerMessage) -> bool {
        if !message.is_ticker() {
            return false;
        }

        let Some(metadata) = message.code().and_then(|code| self.catalog.get(code)) else {
            return false;
        };

        let name = Value::String(metadata.display_name.clone());
        message.set(&self.field, name);
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::market::{DisplayMetadata, InstrumentCode};

    fn enricher(field: &str) -> Enricher {
        let catalog: ReferenceCatalog = [(InstrumentCode::new("X-A"), DisplayMetadata::new("Alpha"))]
            .into_iter()
            .collect();
        Enricher::new(Arc::new(catalog), field)
    }

    fn message(value: Value) -> TickerMessage {
        match value {
            Value::Object(map) => TickerMessage::new(map),
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn enriches_catalogued_ticker() {
        let enricher = enricher("display_name");
        let mut msg = message(json!({"type": "ticker", "code": "X-A", "price": 100}));

        assert!(enricher.enrich(&mut msg));
        assert_eq!(
            Value::Object(msg.fields().clone()),
            json!({"type": "ticker", "code": "X-A", "price": 100, "display_name": "Alpha"})
        );
    }

    #[test]
    fn uncatalogued_code_is_unchanged() {
        let enricher = enricher("display_name");
        let original = message(json!({"type": "ticker", "code": "X-C", "price": 7}));
        let mut msg = original.clone();

        assert!(!enricher.enrich(&mut msg));
        assert_eq!(msg, original);
    }

    #[test]
    fn non_ticker_kind_is_unchanged() {
        let enricher = enricher("display_name");
        let original = message(json!({"type": "orderbook", "code": "X-A"}));
        let mut msg = original.clone();

        assert!(!enricher.enrich(&mut msg));
        assert_eq!(msg, original);
    }

    #[test]
    fn missing_code_is_unchanged() {
        let enricher = enricher("display_name");
        let original = message(json!({"type": "ticker"}));
        let mut msg = original.clone();

        assert!(!enricher.enrich(&mut msg));
        assert_eq!(msg, original);
    }

    #[test]
    fn enrichment_is_idempotent() {
        let enricher = enricher(DEFAULT_DISPLAY_FIELD);
        let mut once = message(json!({"type": "ticker", "code": "X-A", "trade_price": 1.5}));
        enricher.enrich(&mut once);

        let mut twice = once.clone();
        enricher.enrich(&mut twice);

        assert_eq!(once, twice);
        assert_eq!(twice.get(DEFAULT_DISPLAY_FIELD), Some(&json!("Alpha")));
    }

    #[test]
    fn accessors_read_type_and_code() {
        let msg = message(json!({"type": "ticker", "code": "X-A"}));
        assert_eq!(msg.kind(), Some("ticker"));
        assert_eq!(msg.code(), Some("X-A"));
        assert!(msg.is_ticker());

        let text = msg.to_json().unwrap();
        let round: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(round, json!({"type": "ticker", "code": "X-A"}));
    }
}
