//! Task Watchdog Timer (TWDT) driver.
//!
//! Resets the node if the capture task stops running. The capture loop
//! feeds it on every poll, so a wedged executor (or a task that blocks
//! instead of awaiting) trips it within `timeout_ms`.
//!
//! This is independent of the pipeline's cycle watchdog, which only
//! cancels an overrunning transmit cycle.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    #[cfg(not(target_os = "espidf"))]
    feeds: core::cell::Cell<u32>,
}

impl Watchdog {
    /// Subscribe the calling task with a panic-on-trigger timeout.
    pub fn new(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: plain FFI calls with a valid config; a null handle
            // subscribes the current task.
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    warn!("Watchdog: reconfigure returned {} (may already be configured)", ret);
                }

                let subscribed = esp_task_wdt_add(core::ptr::null_mut()) == ESP_OK;
                if subscribed {
                    info!("Watchdog: subscribed ({} ms, panic on trigger)", timeout_ms);
                } else {
                    warn!("Watchdog: failed to subscribe");
                }
                Self { subscribed }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("Watchdog(sim): {} ms, no-op", timeout_ms);
            Self {
                feeds: core::cell::Cell::new(0),
            }
        }
    }

    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: the current task was subscribed in `new`.
            unsafe {
                esp_task_wdt_reset();
            }
        }

        #[cfg(not(target_os = "espidf"))]
        self.feeds.set(self.feeds.get().wrapping_add(1));
    }

    /// Simulation: how many times the watchdog was fed.
    #[cfg(not(target_os = "espidf"))]
    pub fn feeds(&self) -> u32 {
        self.feeds.get()
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn feeds_are_counted() {
        let wd = Watchdog::new(10_000);
        wd.feed();
        wd.feed();
        assert_eq!(wd.feeds(), 2);
    }
}
