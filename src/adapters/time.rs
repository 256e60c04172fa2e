//! System clock adapter implementing [`ClockPort`].
//!
//! - **`target_os = "espidf"`**: uptime from `esp_timer_get_time()`, wall
//!   clock from `gettimeofday()` once SNTP has set it.
//! - **`not(target_os = "espidf")`**: `std::time::Instant` and
//!   `SystemTime` for host-side simulation.

use crate::app::ports::ClockPort;

/// Wall clock values before 2020-01-01 mean SNTP has not run yet.
const EPOCH_2020_MS: i64 = 1_577_836_800_000;

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    utc_offset_minutes: i32,
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SystemClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self {
            utc_offset_minutes,
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    #[cfg(target_os = "espidf")]
    fn raw_wall_ms(&self) -> Option<i64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: `tv` is a valid out-pointer; the timezone argument may be null.
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        Some(tv.tv_sec as i64 * 1000 + tv.tv_usec as i64 / 1000)
    }

    #[cfg(not(target_os = "espidf"))]
    fn raw_wall_ms(&self) -> Option<i64> {
        let since = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?;
        i64::try_from(since.as_millis()).ok()
    }
}

impl ClockPort for SystemClock {
    #[cfg(target_os = "espidf")]
    fn uptime_ms(&self) -> i64 {
        // SAFETY: reads the monotonic high-resolution timer.
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) / 1000
    }

    #[cfg(not(target_os = "espidf"))]
    fn uptime_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }

    fn wall_clock_ms(&self) -> Option<i64> {
        self.raw_wall_ms().filter(|&ms| ms >= EPOCH_2020_MS)
    }

    fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_minutes
    }
}
