//! In-memory reference data source.
//!
//! Serves a fixed `ReferenceData` (or a fixed error). Used by tests and by
//! embedders that already hold their market list.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{ReferenceDataError, ReferenceDataPort};
use crate::domain::market::{DisplayMetadata, InstrumentCode, ReferenceData};

/// Static reference data source.
#[derive(Debug)]
pub struct StaticReferenceSource {
    result: Result<ReferenceData, ReferenceDataError>,
    loads: Mutex<usize>,
}

impl StaticReferenceSource {
    /// Serve `data` on every load.
    #[must_use]
    pub const fn new(data: ReferenceData) -> Self {
        Self {
            result: Ok(data),
            loads: Mutex::new(0),
        }
    }

    /// Serve `codes`, with catalog entries for the named subset.
    #[must_use]
    pub fn from_pairs(codes: &[&str], names: &[(&str, &str)]) -> Self {
        let codes = codes.iter().copied().map(InstrumentCode::from).collect();
        let catalog = names
            .iter()
            .map(|(code, name)| (InstrumentCode::from(*code), DisplayMetadata::new(*name)))
            .collect();
        Self::new(ReferenceData::new(codes, catalog))
    }

    /// Fail every load with `error`.
    #[must_use]
    pub const fn failing(error: ReferenceDataError) -> Self {
        Self {
            result: Err(error),
            loads: Mutex::new(0),
        }
    }

    /// Number of completed `load` calls.
    #[must_use]
    pub fn load_count(&self) -> usize {
        *self.loads.lock()
    }
}

#[async_trait]
impl ReferenceDataPort for StaticReferenceSource {
    async fn load(&self) -> Result<ReferenceData, ReferenceDataError> {
        *self.loads.lock() += 1;
        self.result.clone()
    }
}
