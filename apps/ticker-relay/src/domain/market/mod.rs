//! Market Reference Data
//!
//! Instrument codes and the display metadata attached to relayed tickers.
//! Loaded once at startup and shared read-only for the lifetime of the
//! process.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Instrument Code
// =============================================================================

/// Exchange-qualified market identifier (e.g. `KRW-BTC`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentCode(String);

impl InstrumentCode {
    /// Create a new instrument code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for InstrumentCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstrumentCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for InstrumentCode {
    fn from(code: String) -> Self {
        Self(code)
    }
}

// =============================================================================
// Display Metadata
// =============================================================================

/// Human-readable names for a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    /// Name attached to relayed tickers (Upbit: `korean_name`).
    pub display_name: String,
    /// English name, when the source provides one.
    pub english_name: Option<String>,
}

impl DisplayMetadata {
    /// Create metadata with only a display name.
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            english_name: None,
        }
    }

    /// Attach an English name.
    #[must_use]
    pub fn with_english_name(mut self, english_name: impl Into<String>) -> Self {
        self.english_name = Some(english_name.into());
        self
    }
}

// =============================================================================
// Reference Catalog
// =============================================================================

/// Read-only mapping from instrument code to display metadata.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalog {
    entries: HashMap<InstrumentCode, DisplayMetadata>,
}

impl ReferenceCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up metadata for a code.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&DisplayMetadata> {
        self.entries.get(code)
    }

    /// Check whether a code is catalogued.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    /// Number of catalogued markets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(InstrumentCode, DisplayMetadata)> for ReferenceCatalog {
    fn from_iter<I: IntoIterator<Item = (InstrumentCode, DisplayMetadata)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Reference Data
// =============================================================================

/// Output of the reference data loader.
///
/// `codes` keeps the order the source returned them in; that order is the
/// order codes appear across subscription frames.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// Codes to subscribe to upstream.
    pub codes: Vec<InstrumentCode>,
    /// Display metadata used for enrichment.
    pub catalog: ReferenceCatalog,
}

impl ReferenceData {
    /// Create reference data from parts.
    #[must_use]
    pub const fn new(codes: Vec<InstrumentCode>, catalog: ReferenceCatalog) -> Self {
        Self { codes, catalog }
    }

    /// Empty reference data (degraded mode).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether there is nothing to subscribe to.
    #[must_use]
    pub fn has_no_codes(&self) -> bool {
        self.codes.is_empty()
    }
}
