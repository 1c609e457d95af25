//! Infrastructure Layer
//!
//! Adapters for external systems and the relay's I/O surfaces.
//!
//! - `upbit`: upstream ticker session and REST market list
//! - `reference`: in-memory reference data source
//! - `broadcast`: subscriber registry and fan-out
//! - `server`: downstream WebSocket listener
//! - `relay`: startup wiring and event routing
//! - `config`, `health`, `metrics`, `telemetry`: ambient services

pub mod broadcast;
pub mod config;
pub mod health;
pub mod metrics;
pub mod reference;
pub mod relay;
pub mod server;
pub mod telemetry;
pub mod upbit;
