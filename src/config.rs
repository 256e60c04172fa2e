//! System configuration parameters
//!
//! All tunable parameters for the capture buffer and the uplink pipeline.
//! Values can be overridden via NVS (see [`crate::adapters::nvs`]).

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::ring::pending::MAX_SLOTS;

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Ring buffer ---
    /// Flash address of ring position 0.
    pub ring_base_address: u32,
    /// Number of slots (flash pages) in the ring.
    pub ring_slots: u16,
    /// Pages per erasable sector.
    pub pages_per_sector: u16,
    /// Positions kept clear between the write cursor and the oldest
    /// undelivered slot.
    pub safety_margin: u16,

    // --- Flash retry ---
    pub write_max_attempts: u8,
    pub write_retry_delay_ms: u32,
    pub erase_max_attempts: u8,
    pub erase_retry_delay_ms: u32,
    pub read_max_attempts: u8,
    /// Bytes sampled at the start of a sector to confirm an erase.
    pub erase_verify_bytes: u16,

    // --- Locks ---
    /// Bound on every buffer/flash/pipeline lock acquisition.
    pub lock_timeout_ms: u32,

    // --- Capture ---
    /// Poll interval of the capture task for the FIFO interrupt latch.
    pub fifo_poll_interval_ms: u32,
    /// Nominal time to fill the FIFO (used for the first slot after boot).
    pub fifo_period_ms: u32,

    // --- Transmission ---
    pub max_slots_per_batch: u16,
    /// Captures between transmissions while the uplink is healthy.
    pub trigger_fast: u16,
    /// Captures between transmissions after repeated failures.
    pub trigger_slow: u16,
    /// Captures before the very first transmission after boot.
    pub trigger_first: u16,
    /// Consecutive unsuccessful cycles tolerated before switching to slow.
    pub fast_slow_switch: u16,
    /// Publish attempts per cycle before giving up until the next trigger.
    pub attempts_per_cycle: u8,
    pub link_timeout_ms: u32,
    pub connect_timeout_ms: u32,
    pub ack_timeout_ms: u32,
    pub stop_timeout_ms: u32,
    pub retry_delay_ms: u32,
    pub watchdog_timeout_ms: u32,
    pub watchdog_poll_ms: u32,
    pub topic: heapless::String<64>,
    /// Prefix of the MAC-derived device id.
    pub device_prefix: heapless::String<8>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut topic = heapless::String::new();
        let _ = topic.push_str("wearlog/accel");
        let mut device_prefix = heapless::String::new();
        let _ = device_prefix.push_str("WL");

        Self {
            // Ring: 243 sectors of 16 x 256-byte pages after the boot area
            ring_base_address: 0x1000,
            ring_slots: 3888,
            pages_per_sector: 16,
            safety_margin: 32,

            // Flash retry
            write_max_attempts: 4,
            write_retry_delay_ms: 30,
            erase_max_attempts: 3,
            erase_retry_delay_ms: 10,
            read_max_attempts: 3,
            erase_verify_bytes: 16,

            lock_timeout_ms: 100,

            // Capture: 28-sample FIFO threshold at 14 Hz
            fifo_poll_interval_ms: 50,
            fifo_period_ms: 2000,

            // Transmission
            max_slots_per_batch: 5,
            trigger_fast: 16,
            trigger_slow: 80,
            trigger_first: 3,
            fast_slow_switch: 10,
            attempts_per_cycle: 3,
            link_timeout_ms: 20_000,
            connect_timeout_ms: 10_000,
            ack_timeout_ms: 2_000,
            stop_timeout_ms: 3_000,
            retry_delay_ms: 1_000,
            watchdog_timeout_ms: 30_000,
            watchdog_poll_ms: 1_000,
            topic,
            device_prefix,
        }
    }
}

impl SystemConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms as u64)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms as u64)
    }
}

/// Range-check a configuration before it is used or persisted.
///
/// The ring constraints keep the no-overwrite invariant sound: the
/// backpressure window must cover a whole sector so the ahead-of-cursor
/// erase never wipes undelivered data.
pub fn validate_config(cfg: &SystemConfig) -> Result<(), ConfigError> {
    if cfg.pages_per_sector == 0 {
        return Err(ConfigError::ValidationFailed("pages_per_sector must be > 0"));
    }
    if cfg.ring_slots == 0 || cfg.ring_slots as usize > MAX_SLOTS {
        return Err(ConfigError::ValidationFailed("ring_slots must be 1–4096"));
    }
    if cfg.ring_slots % cfg.pages_per_sector != 0 {
        return Err(ConfigError::ValidationFailed(
            "ring_slots must be a whole number of sectors",
        ));
    }
    if cfg.safety_margin == 0 {
        return Err(ConfigError::ValidationFailed("safety_margin must be > 0"));
    }
    if cfg.safety_margin < cfg.pages_per_sector {
        return Err(ConfigError::ValidationFailed(
            "safety_margin must cover at least one sector",
        ));
    }
    if cfg.safety_margin as u32 + 1 >= cfg.ring_slots as u32 {
        return Err(ConfigError::ValidationFailed(
            "safety_margin must be < ring_slots - 1",
        ));
    }
    if cfg.write_max_attempts == 0 || cfg.erase_max_attempts == 0 || cfg.read_max_attempts == 0 {
        return Err(ConfigError::ValidationFailed("retry attempts must be >= 1"));
    }
    if cfg.erase_verify_bytes == 0 {
        return Err(ConfigError::ValidationFailed("erase_verify_bytes must be > 0"));
    }
    if cfg.lock_timeout_ms == 0 {
        return Err(ConfigError::ValidationFailed("lock_timeout_ms must be > 0"));
    }
    if cfg.max_slots_per_batch == 0 {
        return Err(ConfigError::ValidationFailed("max_slots_per_batch must be > 0"));
    }
    if cfg.trigger_fast == 0 || cfg.trigger_slow < cfg.trigger_fast {
        return Err(ConfigError::ValidationFailed(
            "trigger_fast must be > 0 and <= trigger_slow",
        ));
    }
    if cfg.trigger_first > cfg.trigger_fast {
        return Err(ConfigError::ValidationFailed("trigger_first must be <= trigger_fast"));
    }
    if cfg.attempts_per_cycle == 0 {
        return Err(ConfigError::ValidationFailed("attempts_per_cycle must be >= 1"));
    }
    if cfg.ack_timeout_ms == 0
        || cfg.stop_timeout_ms == 0
        || cfg.link_timeout_ms == 0
        || cfg.connect_timeout_ms == 0
    {
        return Err(ConfigError::ValidationFailed("network timeouts must be > 0"));
    }
    if cfg.watchdog_poll_ms == 0 || cfg.watchdog_timeout_ms < cfg.watchdog_poll_ms {
        return Err(ConfigError::ValidationFailed(
            "watchdog_timeout_ms must be >= watchdog_poll_ms > 0",
        ));
    }
    if cfg.topic.is_empty() {
        return Err(ConfigError::ValidationFailed("topic must not be empty"));
    }
    Ok(())
}
