//! Fish feeder firmware library.
//!
//! Exposes the domain engines and the adapters for integration testing
//! and for the device binary. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module, so everything here
//! also builds and tests on the host.

#![deny(unused_must_use)]

pub mod app;
pub mod arbiter;
pub mod config;
pub mod error;
pub mod schedule;
pub mod scheduler;
pub mod status;
pub mod timesync;

pub mod adapters;
pub mod drivers;
pub mod pins;
