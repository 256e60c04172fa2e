//! Shared health and uplink counters.
//!
//! Updated from both tasks on a best-effort basis: if the stats lock is
//! busy the increment is skipped rather than waited for. Counters are
//! diagnostics, never control inputs, so a lost increment is harmless.

use core::time::Duration;

use log::info;

use crate::sync::TimedMutex;

/// Largest retry bound tracked by the attempt histograms.
pub const MAX_TRACKED_ATTEMPTS: usize = 8;

/// Which attempt finally succeeded, for one class of flash operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptStats {
    /// `histogram[n]` counts operations that succeeded on attempt `n + 1`.
    pub histogram: [u32; MAX_TRACKED_ATTEMPTS],
    /// Operations that exhausted every attempt.
    pub faults: u32,
    /// Individual attempts that had to be repeated.
    pub retries: u32,
}

impl AttemptStats {
    /// Record the outcome of one retried operation.
    pub fn record(&mut self, attempts: u8, succeeded: bool) {
        self.retries = self
            .retries
            .saturating_add(u32::from(attempts.saturating_sub(1)));
        if succeeded {
            let idx = (attempts.max(1) as usize - 1).min(MAX_TRACKED_ATTEMPTS - 1);
            self.histogram[idx] = self.histogram[idx].saturating_add(1);
        } else {
            self.faults = self.faults.saturating_add(1);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    // ── Flash health ──────────────────────────────────────────
    pub writes: AttemptStats,
    pub erases: AttemptStats,
    pub reads: AttemptStats,

    // ── Capture path ──────────────────────────────────────────
    pub captures_stored: u32,
    pub captures_dropped: u32,
    pub backpressure_refusals: u32,
    pub lock_timeouts: u32,
    pub sensor_errors: u32,

    // ── Uplink ────────────────────────────────────────────────
    pub packets_sent: u32,
    pub samples_sent: u32,
    pub retry_attempts: u32,
    pub connect_attempts: u32,
    pub connect_failures: u32,
    pub transmit_successes: u32,
    pub attempts_since_success: u32,
    pub forced_teardowns: u32,
    pub unreadable_batches: u32,
}

impl Stats {
    pub fn log_summary(&self) {
        info!(
            "Stats: writes ok={:?} faults={} retries={} | erases ok={:?} faults={} retries={}",
            self.writes.histogram,
            self.writes.faults,
            self.writes.retries,
            self.erases.histogram,
            self.erases.faults,
            self.erases.retries,
        );
        info!(
            "Stats: stored={} dropped={} backpressure={} lock_timeouts={} read_faults={}",
            self.captures_stored,
            self.captures_dropped,
            self.backpressure_refusals,
            self.lock_timeouts,
            self.reads.faults,
        );
        info!(
            "Stats: packets={} samples={} retries={} connects={}/{} failed | ok_cycles={} since_ok={} forced={}",
            self.packets_sent,
            self.samples_sent,
            self.retry_attempts,
            self.connect_failures,
            self.connect_attempts,
            self.transmit_successes,
            self.attempts_since_success,
            self.forced_teardowns,
        );
    }
}

/// The stats lock.
pub struct StatsCell {
    inner: TimedMutex<Stats>,
}

impl StatsCell {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: TimedMutex::new(Stats::default(), timeout),
        }
    }

    /// Apply `f` if the lock is free, otherwise drop the update.
    pub fn bump(&self, f: impl FnOnce(&mut Stats)) -> bool {
        match self.inner.try_lock() {
            Some(mut stats) => {
                f(&mut stats);
                true
            }
            None => false,
        }
    }

    /// Copy of the current counters, if the lock is free.
    pub fn snapshot(&self) -> Option<Stats> {
        self.inner.try_lock().map(|s| *s)
    }

    /// Zero the flash health counters (cold boot).
    pub fn reset_flash_health(&self) {
        self.bump(|s| {
            s.writes = AttemptStats::default();
            s.erases = AttemptStats::default();
            s.reads = AttemptStats::default();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_success_has_no_retries() {
        let mut a = AttemptStats::default();
        a.record(1, true);
        assert_eq!(a.histogram[0], 1);
        assert_eq!(a.retries, 0);
        assert_eq!(a.faults, 0);
    }

    #[test]
    fn late_success_counts_retries_and_bucket() {
        let mut a = AttemptStats::default();
        a.record(3, true);
        assert_eq!(a.histogram[2], 1);
        assert_eq!(a.retries, 2);
    }

    #[test]
    fn exhausted_attempts_count_a_fault() {
        let mut a = AttemptStats::default();
        a.record(4, false);
        assert_eq!(a.faults, 1);
        assert_eq!(a.retries, 3);
        assert!(a.histogram.iter().all(|&n| n == 0));
    }

    #[test]
    fn bump_is_skipped_while_locked() {
        let cell = StatsCell::new(Duration::from_millis(5));
        let guard = cell.inner.try_lock().unwrap();
        assert!(!cell.bump(|s| s.packets_sent += 1));
        drop(guard);
        assert!(cell.bump(|s| s.packets_sent += 1));
        assert_eq!(cell.snapshot().unwrap().packets_sent, 1);
    }

    #[test]
    fn reset_flash_health_keeps_uplink_counters() {
        let cell = StatsCell::new(Duration::from_millis(5));
        cell.bump(|s| {
            s.writes.record(2, true);
            s.packets_sent = 4;
        });
        cell.reset_flash_health();
        let s = cell.snapshot().unwrap();
        assert_eq!(s.writes, AttemptStats::default());
        assert_eq!(s.packets_sent, 4);
    }
}
