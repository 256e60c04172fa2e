//! Adaptive transmit trigger, ticked once per stored capture.
//!
//! ```text
//!  threshold = fast   while attempts_since_success <= fast_slow_switch
//!            = slow   otherwise
//! ```
//!
//! After boot the counter is pre-loaded so the first cycle starts after
//! `trigger_first` captures instead of a full `trigger_fast`.

use crate::config::SystemConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Keep capturing.
    Wait,
    /// Start a transmit cycle.
    StartCycle,
    /// Fired while a cycle is running that has sent packets since the
    /// last check.
    CycleProgressing,
    /// A cycle is still running and sent nothing since the last firing.
    TerminateStuck,
}

impl TriggerAction {
    /// The threshold was reached on this capture.
    pub fn fired(self) -> bool {
        self != Self::Wait
    }
}

#[derive(Debug, Clone)]
pub struct TransmitTrigger {
    counter: u16,
    fast: u16,
    slow: u16,
    switch_after: u32,
    /// Packets sent when progress was last confirmed.
    packets_at_check: u32,
}

impl TransmitTrigger {
    pub fn new(cfg: &SystemConfig) -> Self {
        Self {
            counter: cfg.trigger_fast.saturating_sub(cfg.trigger_first),
            fast: cfg.trigger_fast,
            slow: cfg.trigger_slow,
            switch_after: u32::from(cfg.fast_slow_switch),
            packets_at_check: 0,
        }
    }

    pub fn threshold(&self, attempts_since_success: u32) -> u16 {
        if attempts_since_success <= self.switch_after {
            self.fast
        } else {
            self.slow
        }
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Count one capture. When the threshold is reached the counter resets
    /// and the caller is told what to do with the pipeline.
    pub fn on_capture(
        &mut self,
        attempts_since_success: u32,
        cycle_active: bool,
        packets_sent: u32,
    ) -> TriggerAction {
        self.counter = self.counter.saturating_add(1);
        if self.counter < self.threshold(attempts_since_success) {
            return TriggerAction::Wait;
        }
        self.counter = 0;

        if !cycle_active {
            return TriggerAction::StartCycle;
        }
        if packets_sent > self.packets_at_check {
            self.packets_at_check = packets_sent;
            TriggerAction::CycleProgressing
        } else {
            TriggerAction::TerminateStuck
        }
    }
}
