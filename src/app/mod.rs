//! Application core.
//!
//! [`ports`] defines the traits every hardware adapter implements;
//! [`service`] wires the capture, transmit and watchdog tasks together.
//! Nothing in here touches hardware directly, so the whole node runs on
//! the host against the simulation adapters.

pub mod ports;
pub mod service;
