//! Pipeline phase and the status guarded by the pipeline-state lock.
//!
//! ```text
//!  IDLE ──[trigger]──▶ CONNECTING ──[broker up]──▶ CONNECTED
//!    ▲                     ▲   │                      │
//!    │                     │   └──[timeout]──┐   [publish fail,
//!    │              [retry delay]            │    attempts left]
//!    │                     │                 │        │
//!    │                 WAIT_RETRY ◀──────────┼────────┘
//!    │                                       ▼
//!    └──────────────────────────────── CLOSING ◀── [done / watchdog]
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
    WaitRetry = 4,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Closing => "Closing",
            Self::WaitRetry => "WaitRetry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub phase: Phase,
    /// A cycle future is running on the transmit task.
    pub cycle_active: bool,
    /// Set for the whole of a teardown; a second caller backs off.
    pub teardown_in_progress: bool,
    /// Uptime (ms) after which the watchdog tears the cycle down.
    watchdog_deadline: Option<i64>,
    /// The next watchdog poll must tear down regardless of the deadline.
    terminate_requested: bool,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStatus {
    pub const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            cycle_active: false,
            teardown_in_progress: false,
            watchdog_deadline: None,
            terminate_requested: false,
        }
    }

    pub fn arm_watchdog(&mut self, now_ms: i64, timeout_ms: u32) {
        self.watchdog_deadline = Some(now_ms + i64::from(timeout_ms));
    }

    pub fn disarm_watchdog(&mut self) {
        self.watchdog_deadline = None;
    }

    pub fn watchdog_armed(&self) -> bool {
        self.watchdog_deadline.is_some()
    }

    /// Ask the watchdog to end the running cycle on its next poll.
    pub fn request_terminate(&mut self) {
        self.terminate_requested = true;
    }

    /// Whether the watchdog must tear down now.
    pub fn watchdog_due(&self, now_ms: i64) -> bool {
        self.terminate_requested || self.watchdog_deadline.is_some_and(|d| now_ms >= d)
    }

    /// Enter Closing. `false` if a teardown is already running or there is
    /// nothing to tear down.
    pub fn begin_teardown(&mut self) -> bool {
        if self.teardown_in_progress || (self.phase == Phase::Idle && !self.cycle_active) {
            return false;
        }
        self.teardown_in_progress = true;
        self.phase = Phase::Closing;
        self.watchdog_deadline = None;
        self.terminate_requested = false;
        true
    }

    pub fn finish_teardown(&mut self) {
        self.phase = Phase::Idle;
        self.cycle_active = false;
        self.teardown_in_progress = false;
    }

    /// Mark a new cycle running. `false` while one is active or closing.
    pub fn begin_cycle(&mut self) -> bool {
        if self.cycle_active || self.teardown_in_progress {
            return false;
        }
        self.cycle_active = true;
        self.terminate_requested = false;
        true
    }
}
