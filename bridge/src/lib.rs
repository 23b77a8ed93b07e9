//! # plate-bridge
//!
//! Field bridge bonding a shot timer and one or more vibration plate sensors
//! over short-range wireless, fusing their event streams into a durable
//! NDJSON event log, plus the offline half that loads those logs into SQLite
//! and pairs timer starts with plate impacts.
//!
//! ## Pipeline
//! transport session → frame codec → classifier / amplitude → hit detector
//! → orchestrator → event logger → NDJSON file → ingest → SQLite → correlator
//!
//! The GATT stack itself is an external collaborator; this crate only defines
//! its contract (`transport::GattBackend`) and everything above it.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod correlate;
pub mod detector;
pub mod error;
pub mod ingest;
pub mod logger;
pub mod transport;
