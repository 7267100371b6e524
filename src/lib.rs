//! Pondside: dosing control and telemetry aggregation for shrimp ponds.
//!
//! Single Rust binary. Takes water readings, tank levels and image
//! analysis results from the pond, decides what to dose, drives the
//! dosing controller over MQTT, and keeps the farm app supplied with
//! merged per-pond status snapshots.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod calibration;
pub mod config;
pub mod error;
pub mod logging;

pub mod dosing;
pub mod publisher;

pub mod heartbeat;
pub mod ingest;
pub mod notify;
pub mod state;
pub mod status;

pub mod aggregator;
pub mod api;
