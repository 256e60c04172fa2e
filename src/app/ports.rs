//! Port traits: the hexagonal boundary between the core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ core (ring, batch, pipeline)
//! ```
//!
//! Driven adapters (flash chip, accelerometer, radio, broker client, clock,
//! NVS) implement these traits. The core consumes them via generics, so it
//! never touches hardware directly and every path can be exercised on the
//! host with the simulation adapters or test mocks.
//!
//! Flash, sensor, link and clock calls are short and synchronous. The
//! publish transport is async because acknowledgments and cooperative
//! shutdown take wall time; the pipeline bounds every one of those waits.

use core::time::Duration;

use crate::config::SystemConfig;
use crate::error::{FlashError, LinkError, PublishError, SensorError};
use crate::slot::SampleBuf;

// ───────────────────────────────────────────────────────────────
// Flash device port (raw NOR flash)
// ───────────────────────────────────────────────────────────────

/// Raw page/sector primitives of the external NOR flash.
///
/// Programming can only clear bits; a page must sit in an erased sector
/// before it is written. Callers are expected to verify by read-back.
pub trait FlashDevice {
    /// Bytes per program page.
    const PAGE_SIZE: usize;
    /// Bytes per erase sector.
    const SECTOR_SIZE: usize;

    fn page_read(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashError>;

    fn page_write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Erase the sector starting at `addr` to all 0xFF.
    fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError>;
}

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: accelerometer → core)
// ───────────────────────────────────────────────────────────────

pub trait SensorPort {
    /// Drain the accelerometer FIFO into `out` (cleared first).
    /// Returns the number of samples read.
    fn read_fifo(&mut self, out: &mut SampleBuf) -> Result<usize, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Network ports
// ───────────────────────────────────────────────────────────────

/// Radio / network association control.
pub trait LinkPort {
    /// Power the RF section up or down.
    fn radio_enable(&mut self, on: bool);

    /// Associate with the provisioned network.
    fn select_network(&mut self) -> Result<(), LinkError>;

    /// Whether the link has an address and can carry traffic.
    fn is_up(&self) -> bool;

    fn disconnect(&mut self);
}

/// Maximum downlink message length kept by transports.
pub const DOWNLINK_MAX: usize = 256;

pub type Downlink = heapless::Vec<u8, DOWNLINK_MAX>;

/// Broker client with acknowledged publish.
#[allow(async_fn_in_trait)]
pub trait PublishPort {
    fn is_connected(&self) -> bool;

    /// Start the client; connection completes asynchronously.
    fn start(&mut self) -> Result<(), PublishError>;

    /// Publish with at-least-once QoS and wait for the broker ack.
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        ack_timeout: Duration,
    ) -> Result<(), PublishError>;

    /// Cooperative stop. May hang on a wedged stack; callers bound it.
    async fn stop(&mut self);

    /// Tear the client down immediately, abandoning in-flight work.
    fn force_stop(&mut self);

    /// Next downlink message received on the command topic, if any.
    fn take_downlink(&mut self) -> Option<Downlink>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

pub trait ClockPort {
    /// Monotonic milliseconds since boot.
    fn uptime_ms(&self) -> i64;

    /// Milliseconds since the Unix epoch, `None` until the clock is synced.
    fn wall_clock_ms(&self) -> Option<i64>;

    /// Local offset from UTC, in minutes.
    fn utc_offset_minutes(&self) -> i32 {
        0
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: core ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST run [`validate_config`](crate::config::validate_config)
/// before persisting. Invalid ranges are rejected with
/// [`ConfigError::ValidationFailed`], not silently clamped: a ring geometry
/// that breaks the margin rules would let the producer overwrite data.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::Corrupted => Self::Config("stored config corrupted"),
            ConfigError::IoError => Self::Config("config storage I/O error"),
        }
    }
}
