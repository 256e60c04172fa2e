//! Batch Assembler: collects pending slots for one uplink message.
//!
//! Scans backward from the newest write. The gap between a scan position
//! and the write cursor is inclusive:
//!
//! ```text
//! gap(pos) = ((pos - write) mod N) + 1
//! ```
//!
//! Each step, in order:
//!
//! 1. `gap <= margin`: the scan reached the protected zone ahead of the
//!    cursor. Stop, `done`.
//! 2. Batch holds `max_slots_per_batch` positions: stop, not done.
//! 3. `pos` ends a pending word, the whole word is outside the margin and
//!    empty: jump back one word.
//! 4. Test the bit at `pos`; if pending, read and interpolate the slot.
//!    Step back one position.
//!
//! The buffer lock is taken per step and never held across a flash read.
//! A lock timeout ends the batch early instead of skipping a position, so
//! the released range only ever covers positions the scan really consumed.

pub mod interpolate;

use log::{debug, warn};

use crate::app::ports::FlashDevice;
use crate::config::SystemConfig;
use crate::ring::RingBuffer;
use crate::ring::pending::{SparseBitSet, WORD_BITS};
use crate::slot::{Sample, Slot};

/// A sample with its reconstructed capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedSample {
    pub sample: Sample,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Oldest and newest positions consumed, if any.
    range: Option<(usize, usize)>,
    /// Positions consumed, readable or not.
    pub slots: usize,
    /// Samples in scan order: newest slot first, oldest sample first within a slot.
    pub samples: Vec<TimedSample>,
    /// The scan reached the safety margin; nothing older is pending.
    pub done: bool,
    /// At least one pending slot could not be read.
    pub flash_error: bool,
    /// The scan stopped on a buffer-lock timeout.
    pub lock_error: bool,
}

impl Batch {
    pub fn range(&self) -> Option<(usize, usize)> {
        self.range
    }

    pub fn start(&self) -> Option<usize> {
        self.range.map(|(start, _)| start)
    }

    pub fn end(&self) -> Option<usize> {
        self.range.map(|(_, end)| end)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Positions were consumed but none of them yielded a sample.
    pub fn is_unreadable(&self) -> bool {
        self.range.is_some() && self.samples.is_empty()
    }

    fn consume(&mut self, position: usize) {
        self.range = Some(match self.range {
            // scanning backward: each new position is older
            Some((_, end)) => (position, end),
            None => (position, position),
        });
        self.slots += 1;
    }

    fn push_slot(&mut self, slot: &Slot) {
        let times = interpolate::timestamps(slot.ts_prev_ms, slot.ts_now_ms, slot.count());
        self.samples.extend(
            slot.samples
                .iter()
                .zip(times)
                .map(|(&sample, ts_ms)| TimedSample { sample, ts_ms }),
        );
    }
}

pub struct BatchAssembler {
    max_slots: usize,
}

impl BatchAssembler {
    pub fn new(cfg: &SystemConfig) -> Self {
        Self {
            max_slots: cfg.max_slots_per_batch as usize,
        }
    }

    pub async fn assemble<D: FlashDevice>(&self, ring: &RingBuffer<D>) -> Batch {
        let mut batch = Batch::default();
        let n = ring.slots();
        let margin = ring.margin();

        let Ok(write) = ring.write_location().await else {
            warn!("Batch: buffer lock timeout before scan");
            batch.lock_error = true;
            return batch;
        };

        let mut pos = (write + n - 1) % n;
        loop {
            let gap = (pos + n - write) % n + 1;
            if gap <= margin {
                batch.done = true;
                break;
            }
            if batch.slots >= self.max_slots {
                break;
            }

            let Ok((pending, word_empty)) = ring
                .inspect(|s| (s.is_pending(pos), s.word_is_empty_at(pos)))
                .await
            else {
                warn!("Batch: buffer lock timeout at pos {}, stopping", pos);
                batch.lock_error = true;
                break;
            };

            if SparseBitSet::is_last_in_word(pos) && gap >= margin + WORD_BITS && word_empty {
                pos = (pos + n - WORD_BITS) % n;
                continue;
            }

            if pending {
                batch.consume(pos);
                match ring.store().read(pos).await {
                    Ok(slot) => batch.push_slot(&slot),
                    Err(e) => {
                        warn!("Batch: slot at pos {} unreadable ({})", pos, e);
                        batch.flash_error = true;
                    }
                }
            }
            pos = (pos + n - 1) % n;
        }

        debug!(
            "Batch: {} slots, {} samples, range {:?}, done={}",
            batch.slots,
            batch.samples.len(),
            batch.range,
            batch.done
        );
        batch
    }
}
