//! Capture path: FIFO-watermark interrupt latch and the capture task.
//!
//! ```text
//!  ISR:  stamp = uptime_ms as u32; ready = true
//!  task: ready? ──▶ read_fifo ──▶ Slot{seq, ts_now, ts_prev} ──▶ ring.append
//! ```
//!
//! The interrupt side only touches two atomics. The task extends the 32-bit
//! stamp back to a full uptime against the current clock, so the latch is
//! valid for captures up to ~49 days old.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::rc::Rc;

use log::{debug, warn};

use crate::app::ports::{FlashDevice, SensorPort};
use crate::config::SystemConfig;
use crate::error::{AppendError, SensorError};
use crate::ring::{AppendOutcome, RingBuffer};
use crate::slot::{SampleBuf, Slot};
use crate::stats::StatsCell;

/// Timestamp latch shared between the FIFO interrupt and the capture task.
pub struct FifoIrq {
    stamp_ms: AtomicU32,
    ready: AtomicBool,
}

impl Default for FifoIrq {
    fn default() -> Self {
        Self::new()
    }
}

impl FifoIrq {
    pub const fn new() -> Self {
        Self {
            stamp_ms: AtomicU32::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Interrupt context: record when the FIFO watermark was hit.
    pub fn on_interrupt(&self, uptime_ms: i64) {
        self.stamp_ms.store(uptime_ms as u32, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Consume a pending interrupt, returning its full uptime stamp.
    pub fn take(&self, now_ms: i64) -> Option<i64> {
        if !self.ready.swap(false, Ordering::Acquire) {
            return None;
        }
        let stamp = self.stamp_ms.load(Ordering::Relaxed);
        Some(now_ms - i64::from((now_ms as u32).wrapping_sub(stamp)))
    }
}

/// What one capture poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// No interrupt pending.
    Idle,
    /// The FIFO was drained but held no samples.
    Empty,
    Stored(AppendOutcome),
    Dropped(AppendError),
    SensorFailed(SensorError),
}

impl CaptureOutcome {
    /// A FIFO block was captured, whether or not it reached flash.
    pub fn captured(&self) -> bool {
        matches!(self, Self::Stored(_) | Self::Dropped(_))
    }
}

pub struct Capture<S: SensorPort> {
    sensor: S,
    irq: &'static FifoIrq,
    stats: Rc<StatsCell>,
    buf: SampleBuf,
    next_seq: u32,
    last_ts_ms: Option<i64>,
    fifo_period_ms: i64,
}

impl<S: SensorPort> Capture<S> {
    pub fn new(sensor: S, irq: &'static FifoIrq, cfg: &SystemConfig, stats: Rc<StatsCell>) -> Self {
        Self {
            sensor,
            irq,
            stats,
            buf: SampleBuf::new(),
            next_seq: 0,
            last_ts_ms: None,
            fifo_period_ms: i64::from(cfg.fifo_period_ms),
        }
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Take a pending interrupt, drain the FIFO and store the block.
    pub async fn poll<D: FlashDevice>(&mut self, now_ms: i64, ring: &RingBuffer<D>) -> CaptureOutcome {
        let Some(ts_now) = self.irq.take(now_ms) else {
            return CaptureOutcome::Idle;
        };

        match self.sensor.read_fifo(&mut self.buf) {
            Ok(0) => return CaptureOutcome::Empty,
            Ok(_) => {}
            Err(e) => {
                warn!("Capture: FIFO read failed ({})", e);
                self.stats.bump(|s| s.sensor_errors += 1);
                return CaptureOutcome::SensorFailed(e);
            }
        }

        let slot = self.build_slot(ts_now);
        match ring.append(&slot).await {
            Ok(out) => {
                debug!(
                    "Capture: block {} ({} samples) at pos {}",
                    slot.seq,
                    slot.count(),
                    out.position
                );
                CaptureOutcome::Stored(out)
            }
            Err(e) => CaptureOutcome::Dropped(e),
        }
    }

    /// Wrap the drained samples. The first block after boot has no
    /// predecessor, so it assumes one nominal FIFO period.
    fn build_slot(&mut self, ts_now: i64) -> Slot {
        let ts_prev = self
            .last_ts_ms
            .unwrap_or(ts_now - self.fifo_period_ms);
        self.last_ts_ms = Some(ts_now);
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        Slot {
            seq,
            samples: self.buf.clone(),
            ts_now_ms: ts_now,
            ts_prev_ms: ts_prev,
        }
    }
}
