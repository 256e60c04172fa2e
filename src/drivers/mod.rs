//! Peripheral drivers.

pub mod accel;
pub mod watchdog;
