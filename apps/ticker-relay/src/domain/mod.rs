//! Domain Layer - Core relay types and business logic.
//!
//! This layer contains the reference data model, the ticker record and its
//! enrichment, and the upstream session state machine. Nothing here performs
//! I/O.

/// Instrument codes, display metadata, and the reference catalog.
pub mod market;

/// Upstream session lifecycle states.
pub mod session;

/// Ticker records and enrichment.
pub mod ticker;
