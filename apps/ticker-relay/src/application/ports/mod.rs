//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ReferenceDataPort`: one-shot source of instrument codes and display names
//! - `UpstreamPort`: control surface of the single upstream feed session

use async_trait::async_trait;

use crate::domain::market::ReferenceData;
use crate::domain::session::SessionState;

// =============================================================================
// Reference Data
// =============================================================================

/// Errors from a reference data source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceDataError {
    /// Request could not be sent or the connection failed.
    #[error("network error: {0}")]
    Network(String),

    /// Source answered with a non-success status.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Response body could not be parsed.
    #[error("failed to parse reference data: {0}")]
    Parse(String),
}

/// Source of the instrument list and display catalog.
///
/// Called once at startup. Callers treat an error as "no reference data" and
/// keep running.
#[async_trait]
pub trait ReferenceDataPort: Send + Sync {
    /// Load the subscribe list and catalog.
    async fn load(&self) -> Result<ReferenceData, ReferenceDataError>;
}

// =============================================================================
// Upstream Session
// =============================================================================

/// Control surface of the upstream feed session.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamPort: Send + Sync {
    /// Request a connection.
    ///
    /// A no-op while a session is already connecting, open, or waiting to
    /// reconnect. Returns `true` only when this call started a new session.
    fn connect(&self) -> bool;

    /// Current lifecycle state.
    fn state(&self) -> SessionState;
}
