//! Upbit market list adapter.
//!
//! Loads the tradable market list from `GET /v1/market/all` and turns it into
//! the relay's subscribe list and display catalog.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{ReferenceDataError, ReferenceDataPort};
use crate::domain::market::{DisplayMetadata, InstrumentCode, ReferenceCatalog, ReferenceData};

/// Default market list endpoint.
pub const DEFAULT_REFERENCE_URL: &str = "https://api.upbit.com/v1/market/all?isDetails=false";

/// Default market code prefix.
pub const DEFAULT_MARKET_PREFIX: &str = "KRW-";

/// Default request timeout.
pub const DEFAULT_REFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of the market list response.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketEntry {
    /// Market code (e.g. `KRW-BTC`).
    pub market: String,
    /// Korean display name.
    pub korean_name: String,
    /// English display name.
    #[serde(default)]
    pub english_name: Option<String>,
}

/// Reference data loader backed by the Upbit REST API.
///
/// Implements `ReferenceDataPort`.
#[derive(Debug)]
pub struct UpbitMarketCatalog {
    client: reqwest::Client,
    url: String,
    market_prefix: String,
}

impl UpbitMarketCatalog {
    /// Create a new adapter.
    ///
    /// An empty `market_prefix` keeps every market.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        market_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ReferenceDataError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReferenceDataError::Network(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            market_prefix: market_prefix.into(),
        })
    }

    /// Create an adapter from `ReferenceSettings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &crate::ReferenceSettings) -> Result<Self, ReferenceDataError> {
        Self::new(
            settings.url.clone(),
            settings.market_prefix.clone(),
            settings.timeout,
        )
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketEntry>, ReferenceDataError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ReferenceDataError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReferenceDataError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ReferenceDataError::Parse(e.to_string()))
    }
}

/// Keep entries matching `prefix`, in response order.
#[must_use]
pub fn build_reference_data(entries: Vec<MarketEntry>, prefix: &str) -> ReferenceData {
    let mut codes = Vec::new();
    let mut catalog = Vec::new();

    for entry in entries {
        if !entry.market.starts_with(prefix) {
            continue;
        }
        let code = InstrumentCode::new(entry.market);
        let mut metadata = DisplayMetadata::new(entry.korean_name);
        if let Some(english) = entry.english_name {
            metadata = metadata.with_english_name(english);
        }
        codes.push(code.clone());
        catalog.push((code, metadata));
    }

    ReferenceData::new(codes, catalog.into_iter().collect::<ReferenceCatalog>())
}

#[async_trait]
impl ReferenceDataPort for UpbitMarketCatalog {
    async fn load(&self) -> Result<ReferenceData, ReferenceDataError> {
        let entries = self.fetch_markets().await?;
        let total = entries.len();
        let data = build_reference_data(entries, &self.market_prefix);

        tracing::info!(
            total,
            kept = data.codes.len(),
            prefix = %self.market_prefix,
            "Loaded Upbit market list"
        );

        Ok(data)
    }
}
