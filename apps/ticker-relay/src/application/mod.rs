//! Application Layer - Port definitions.
//!
//! The interfaces through which the relay core talks to its collaborators:
//! the reference data source and the upstream session.

/// Port interfaces for external systems (reference data, upstream feed).
pub mod ports;
