//! Ring Buffer Manager: the flash-backed circular capture store.
//!
//! ```text
//!        oldest undelivered               cursor (next write)
//!               │                              │
//!   ... [P][P][ ][P][P][P][P][ ][ ][ ][ ][ ][ ][W][ ]...
//!                                  ◀── margin ──▶
//! ```
//!
//! The cursor and the pending map live together in [`RingState`] behind the
//! buffer lock. An append is accepted only if no pending bit sits in the
//! window `[cursor, cursor + margin]`, so the producer can never lap data the
//! consumer has not confirmed, and the sector erased ahead of the cursor is
//! always free of undelivered slots.
//!
//! Lock order is buffer, then flash. `append` holds the buffer lock for the
//! whole operation and takes the flash lock once per device call.

pub mod pending;

use std::rc::Rc;

use log::{debug, info, warn};

use crate::app::ports::FlashDevice;
use crate::config::SystemConfig;
use crate::error::{AppendError, Error};
use crate::flash::FlashPageStore;
use crate::slot::Slot;
use crate::stats::StatsCell;
use crate::sync::{LockTimeout, TimedMutex};

use pending::SparseBitSet;

/// Cursor plus pending map. Only reachable through the buffer lock.
#[derive(Debug, Clone)]
pub struct RingState {
    cursor: usize,
    pending: SparseBitSet,
}

impl RingState {
    pub fn new(slots: usize) -> Self {
        Self {
            cursor: 0,
            pending: SparseBitSet::new(slots),
        }
    }

    pub fn slots(&self) -> usize {
        self.pending.len()
    }

    /// Position the next write will use.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_pending(&self, position: usize) -> bool {
        self.pending.bit_is_set(position)
    }

    /// Whether the pending word containing `position` is empty.
    pub fn word_is_empty_at(&self, position: usize) -> bool {
        self.pending.word_is_empty(SparseBitSet::word_of(position))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    /// Whether `[cursor, cursor + margin]` holds no undelivered slot.
    pub fn window_is_clear(&self, margin: usize) -> bool {
        !self.pending.any_in_window(self.cursor, margin + 1)
    }

    /// Mark the slot at the cursor pending and advance. Returns the new cursor.
    fn commit(&mut self) -> usize {
        self.pending.set(self.cursor);
        self.cursor = (self.cursor + 1) % self.slots();
        self.cursor
    }

    fn release(&mut self, start: usize, end: usize) {
        self.pending.clear_range(start, end);
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.pending = SparseBitSet::new(self.slots());
    }
}

/// Result of an accepted append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Position the slot was written to.
    pub position: usize,
    /// Write attempt that succeeded.
    pub attempts: u8,
    /// The sector ahead of the new cursor was erased successfully.
    pub erased_ahead: bool,
}

pub struct RingBuffer<D: FlashDevice> {
    store: FlashPageStore<D>,
    state: TimedMutex<RingState>,
    margin: usize,
    stats: Rc<StatsCell>,
}

impl<D: FlashDevice> RingBuffer<D> {
    pub fn new(store: FlashPageStore<D>, cfg: &SystemConfig, stats: Rc<StatsCell>) -> Self {
        let slots = store.geometry().slots;
        Self {
            store,
            state: TimedMutex::new(RingState::new(slots), cfg.lock_timeout()),
            margin: cfg.safety_margin as usize,
            stats,
        }
    }

    pub fn store(&self) -> &FlashPageStore<D> {
        &self.store
    }

    pub fn slots(&self) -> usize {
        self.store.geometry().slots
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// Cold boot: empty state, fresh flash counters, sector 0 erased.
    pub async fn initialize(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await.map_err(|_| Error::LockTimeout)?;
        state.reset();
        self.stats.reset_flash_health();
        self.store
            .erase_sector(0)
            .await
            .map_err(|_| Error::Init("erase of ring sector 0 failed"))?;
        info!(
            "Ring: initialized {} slots, margin {}",
            state.slots(),
            self.margin
        );
        Ok(())
    }

    /// Position the next append will write.
    pub async fn write_location(&self) -> Result<usize, LockTimeout> {
        Ok(self.state.lock().await?.cursor())
    }

    /// Run `f` against the state under the buffer lock.
    pub async fn inspect<R>(&self, f: impl FnOnce(&RingState) -> R) -> Result<R, LockTimeout> {
        let state = self.state.lock().await?;
        Ok(f(&state))
    }

    #[cfg(test)]
    pub(crate) fn hold_buffer_lock(&self) -> Option<crate::sync::Guard<'_, RingState>> {
        self.state.try_lock()
    }

    pub async fn pending_count(&self) -> Result<usize, LockTimeout> {
        self.inspect(RingState::pending_count).await
    }

    /// Persist `slot` at the cursor.
    ///
    /// On any error the cursor and pending map are unchanged and the capture
    /// is counted as dropped.
    pub async fn append(&self, slot: &Slot) -> Result<AppendOutcome, AppendError> {
        let Ok(mut state) = self.state.lock().await else {
            self.stats.bump(|s| {
                s.lock_timeouts += 1;
                s.captures_dropped += 1;
            });
            warn!("Ring: buffer lock timeout, capture {} dropped", slot.seq);
            return Err(AppendError::LockTimeout);
        };

        let position = state.cursor();
        if !state.window_is_clear(self.margin) {
            self.stats.bump(|s| {
                s.backpressure_refusals += 1;
                s.captures_dropped += 1;
            });
            warn!(
                "Ring: backpressure at pos {} ({} pending), capture {} dropped",
                position,
                state.pending_count(),
                slot.seq
            );
            return Err(AppendError::Backpressure);
        }

        let attempts = match self.store.write(position, slot).await {
            Ok(n) => n,
            Err(e) => {
                self.stats.bump(|s| s.captures_dropped += 1);
                return Err(AppendError::Flash(e));
            }
        };

        let cursor = state.commit();
        let mut erased_ahead = false;
        if self.store.geometry().is_sector_boundary(cursor) {
            match self.store.erase_sector(cursor).await {
                Ok(_) => erased_ahead = true,
                Err(e) => warn!("Ring: erase ahead at pos {} failed ({}), advancing", cursor, e),
            }
        }
        self.stats.bump(|s| s.captures_stored += 1);
        debug!("Ring: slot {} stored at pos {}", slot.seq, position);

        Ok(AppendOutcome {
            position,
            attempts,
            erased_ahead,
        })
    }

    /// Clear the pending bits of `range` (oldest, newest) after confirmed delivery.
    pub async fn release(&self, range: Option<(usize, usize)>) -> Result<(), LockTimeout> {
        let Some((start, end)) = range else {
            return Ok(());
        };
        let mut state = self.state.lock().await.inspect_err(|_| {
            self.stats.bump(|s| s.lock_timeouts += 1);
        })?;
        state.release(start, end);
        debug!("Ring: released {}..={}", start, end);
        Ok(())
    }

    /// Erase every ring sector and forget all pending data.
    /// Returns the number of sectors that failed to erase.
    pub async fn clear(&self) -> Result<usize, Error> {
        let mut state = self.state.lock().await.map_err(|_| Error::LockTimeout)?;
        let failed = self.store.erase_all().await;
        state.reset();
        info!("Ring: cleared ({} sector erase failures)", failed);
        Ok(failed)
    }
}
