//! Stream Codec Module
//!
//! Decodes Upbit WebSocket payloads. Upbit delivers every record as a
//! binary frame holding one UTF-8 encoded JSON object, e.g.
//!
//! ```json
//! {"type":"ticker","code":"KRW-BTC","trade_price":91500000.0,...}
//! ```

use serde_json::Value;

use crate::domain::ticker::TickerMessage;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame payload is not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parsed but is not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// JSON codec for Upbit binary frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryJsonCodec;

impl BinaryJsonCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one binary frame into a ticker record.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not UTF-8, not JSON, or not a
    /// JSON object.
    pub fn decode(&self, payload: &[u8]) -> Result<TickerMessage, CodecError> {
        let text = std::str::from_utf8(payload)?;

        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Ok(TickerMessage::new(fields)),
            other => Err(CodecError::NotAnObject(json_type_name(&other))),
        }
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
