//! Wearlog sensor-node library.
//!
//! Exposes the capture, storage and uplink core for integration testing
//! and the host simulation. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod batch;
pub mod capture;
pub mod config;
pub mod error;
pub mod flash;
pub mod pipeline;
pub mod ring;
pub mod slot;
pub mod stats;
pub mod sync;

pub mod adapters;
pub mod drivers;
