#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Ticker Relay - Market Data Fan-out
//!
//! Maintains a single WebSocket connection to the Upbit ticker feed,
//! enriches each ticker with its market's display name, and multiplexes the
//! stream to any number of downstream WebSocket subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `market`: Instrument codes and the display catalog
//!   - `ticker`: Ticker records and enrichment
//!   - `session`: Upstream lifecycle state
//!
//! - **Application**: Port definitions
//!   - `ports`: Reference data source, upstream session control
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upbit`: Upstream WebSocket session and REST market list
//!   - `broadcast`: Subscriber registry and fan-out
//!   - `server`: Downstream WebSocket listener
//!   - `relay`: Startup wiring and event routing
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐    ┌────────────┐    ┌────────────┐
//! Upbit WS ───────►│   Upstream   │───►│ Subscriber │───►│ WebSocket  │──► Client 1
//!  (binary JSON)   │   Session    │    │  Registry  │    │  Listener  │──► Client 2
//!                  │ decode+enrich│    │  fan-out   │    │            │──► Client N
//!                  └──────────────┘    └────────────┘    └────────────┘
//!                         ▲
//! Upbit REST ─────────────┘ (market list, loaded once)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{DisplayMetadata, InstrumentCode, ReferenceCatalog, ReferenceData};
pub use domain::session::SessionState;
pub use domain::ticker::{Enricher, TickerMessage};

// Ports
pub use application::ports::{ReferenceDataError, ReferenceDataPort, UpstreamPort};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ReferenceSettings, RelayConfig, ServerSettings, UpstreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Subscriber registry
pub use infrastructure::broadcast::{
    BroadcastReport, SharedSubscriberRegistry, SubscriberConnection, SubscriberId,
    SubscriberRegistry,
};

// Relay
pub use infrastructure::relay::{RelayCoordinator, RelayError, RunningRelay};

// Upstream
pub use infrastructure::upbit::{
    UpbitMarketCatalog, UpstreamEvent, UpstreamSession, UpstreamSessionConfig,
};

// Reference sources
pub use infrastructure::reference::StaticReferenceSource;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
