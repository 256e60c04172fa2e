//! Per-cycle session counters and the once-per-lifetime time-sync snapshot.

use core::fmt::Write;

use heapless::String;

use crate::app::ports::ClockPort;

/// Counters for one wake/transmit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub attempts_remaining: u8,
    pub messages_sent: u32,
    pub samples_sent: u32,
    pub batches_delivered: u32,
}

impl Session {
    pub fn new(attempts: u8) -> Self {
        Self {
            attempts_remaining: attempts.max(1),
            messages_sent: 0,
            samples_sent: 0,
            batches_delivered: 0,
        }
    }

    /// Spend one attempt. Returns `true` while attempts remain.
    pub fn spend_attempt(&mut self) -> bool {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining > 0
    }

    pub fn record_delivery(&mut self, samples: usize) {
        self.messages_sent += 1;
        self.samples_sent += samples as u32;
        self.batches_delivered += 1;
    }
}

pub const TIME_SYNC_LEN: usize = 64;

/// Wall clock paired with uptime, so receivers can align uptime-based
/// sample timestamps across devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSync {
    pub uptime_ms: i64,
    pub wall_ms: i64,
    /// `YYYY.MM.DD HH:MM:SS (GMT +hh:mm)` in local time.
    pub local_time: String<TIME_SYNC_LEN>,
}

impl TimeSync {
    /// Snapshot the clock. `None` if the wall clock is not synced yet.
    pub fn capture(clock: &impl ClockPort) -> Option<Self> {
        let wall_ms = clock.wall_clock_ms()?;
        Some(Self {
            uptime_ms: clock.uptime_ms(),
            wall_ms,
            local_time: format_local(wall_ms, clock.utc_offset_minutes()),
        })
    }

    /// Packet field: local time followed by the matching uptime.
    pub fn field(&self) -> String<TIME_SYNC_LEN> {
        let mut s = String::new();
        let _ = write!(s, "{} {}", self.local_time, self.uptime_ms);
        s
    }
}

/// Format epoch milliseconds shifted by `offset_minutes`.
pub fn format_local(wall_ms: i64, offset_minutes: i32) -> String<TIME_SYNC_LEN> {
    let local_s = wall_ms.div_euclid(1000) + i64::from(offset_minutes) * 60;
    let days = local_s.div_euclid(86_400);
    let secs = local_s.rem_euclid(86_400);
    let (y, m, d) = civil_from_days(days);

    let sign = if offset_minutes < 0 { '-' } else { '+' };
    let off = offset_minutes.unsigned_abs();

    let mut s = String::new();
    let _ = write!(
        s,
        "{:04}.{:02}.{:02} {:02}:{:02}:{:02} (GMT {}{:02}:{:02})",
        y,
        m,
        d,
        secs / 3600,
        secs % 3600 / 60,
        secs % 60,
        sign,
        off / 60,
        off % 60
    );
    s
}

/// Proleptic Gregorian date for days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}
