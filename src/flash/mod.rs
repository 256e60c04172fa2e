//! Flash Page Store: retrying, verifying access to ring slots on NOR flash.
//!
//! Maps ring positions to flash addresses (`base + position * page`) and
//! wraps every physical call in a [`Retry`]:
//!
//! | Operation      | Verify                              | Default bound |
//! |----------------|-------------------------------------|---------------|
//! | `write`        | full-page read-back, byte compare   | 4 attempts    |
//! | `erase_sector` | sampled prefix reads 0xFF           | 3 attempts    |
//! | `read`         | page decodes as a slot              | 3 attempts    |
//!
//! The flash lock is taken for one device call at a time, never across a
//! retry loop, so the capture task is not starved by a long read scan.

pub mod retry;

use std::rc::Rc;

use core::time::Duration;

use log::{info, warn};

use crate::app::ports::FlashDevice;
use crate::config::SystemConfig;
use crate::error::{Error, FlashError};
use crate::slot::{SLOT_BYTES, Slot};
use crate::stats::StatsCell;
use crate::sync::TimedMutex;

use retry::{Attempt, Retry, RetryPolicy};

const ERASED: u8 = 0xFF;

/// Placement of the ring on the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    pub base_address: u32,
    pub slots: usize,
    pub pages_per_sector: usize,
    pub erase_verify_bytes: usize,
}

impl FlashGeometry {
    pub fn from_config(cfg: &SystemConfig) -> Self {
        Self {
            base_address: cfg.ring_base_address,
            slots: cfg.ring_slots as usize,
            pages_per_sector: cfg.pages_per_sector as usize,
            erase_verify_bytes: cfg.erase_verify_bytes as usize,
        }
    }

    pub fn page_address(&self, position: usize) -> Result<u32, FlashError> {
        if position >= self.slots {
            return Err(FlashError::OutOfRange);
        }
        Ok(self.base_address + (position * SLOT_BYTES) as u32)
    }

    /// First ring position of the sector holding `position`.
    pub fn sector_start(&self, position: usize) -> usize {
        position - position % self.pages_per_sector
    }

    pub fn is_sector_boundary(&self, position: usize) -> bool {
        position % self.pages_per_sector == 0
    }

    pub fn sectors(&self) -> usize {
        self.slots / self.pages_per_sector
    }
}

pub struct FlashPageStore<D: FlashDevice> {
    device: TimedMutex<D>,
    geometry: FlashGeometry,
    write_policy: RetryPolicy,
    erase_policy: RetryPolicy,
    read_policy: RetryPolicy,
    stats: Rc<StatsCell>,
}

impl<D: FlashDevice> FlashPageStore<D> {
    /// Bind a device to the ring geometry. Fails if the chip's page or
    /// sector size disagrees with the slot layout and configuration.
    pub fn new(device: D, cfg: &SystemConfig, stats: Rc<StatsCell>) -> Result<Self, Error> {
        let geometry = FlashGeometry::from_config(cfg);
        if D::PAGE_SIZE != SLOT_BYTES {
            return Err(Error::Init("flash page size differs from slot size"));
        }
        if D::SECTOR_SIZE != D::PAGE_SIZE * geometry.pages_per_sector {
            return Err(Error::Init("flash sector size differs from pages_per_sector"));
        }
        Ok(Self {
            device: TimedMutex::new(device, cfg.lock_timeout()),
            geometry,
            write_policy: RetryPolicy::new(
                cfg.write_max_attempts,
                Duration::from_millis(cfg.write_retry_delay_ms as u64),
                true,
            ),
            erase_policy: RetryPolicy::new(
                cfg.erase_max_attempts,
                Duration::from_millis(cfg.erase_retry_delay_ms as u64),
                true,
            ),
            read_policy: RetryPolicy::new(cfg.read_max_attempts, Duration::ZERO, false),
            stats,
        })
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    /// Program `slot` at `position`, verified by read-back.
    /// Returns the attempt number that succeeded.
    pub async fn write(&self, position: usize, slot: &Slot) -> Result<u8, FlashError> {
        let addr = self.geometry.page_address(position)?;
        let image = slot.encode();
        let image = &image;

        let outcome = Retry::new(self.write_policy, move |attempt: Attempt| async move {
            self.device
                .lock()
                .await
                .map_err(|_| FlashError::LockTimeout)?
                .page_write(addr, image)?;
            if attempt.verify {
                let mut back = [0u8; SLOT_BYTES];
                self.device
                    .lock()
                    .await
                    .map_err(|_| FlashError::LockTimeout)?
                    .page_read(addr, &mut back)?;
                if back != *image {
                    warn!("Flash: verify mismatch at 0x{:06X} (attempt {})", addr, attempt.number);
                    return Err(FlashError::VerifyMismatch);
                }
            }
            Ok(())
        })
        .run()
        .await;

        self.stats
            .bump(|s| s.writes.record(outcome.attempts, outcome.succeeded()));
        match outcome.result {
            Ok(()) => {
                if outcome.attempts > 1 {
                    info!(
                        "Flash: write pos {} ok on attempt {}",
                        position, outcome.attempts
                    );
                }
                Ok(outcome.attempts)
            }
            Err(e) => {
                warn!(
                    "Flash: write pos {} failed after {} attempts ({})",
                    position, outcome.attempts, e
                );
                Err(e)
            }
        }
    }

    /// Read and decode the slot at `position`.
    pub async fn read(&self, position: usize) -> Result<Slot, FlashError> {
        let addr = self.geometry.page_address(position)?;

        let outcome = Retry::new(self.read_policy, move |_| async move {
            let mut page = [0u8; SLOT_BYTES];
            self.device
                .lock()
                .await
                .map_err(|_| FlashError::LockTimeout)?
                .page_read(addr, &mut page)?;
            Slot::decode(&page)
        })
        .run()
        .await;

        self.stats
            .bump(|s| s.reads.record(outcome.attempts, outcome.succeeded()));
        if let Err(e) = &outcome.result {
            warn!("Flash: read pos {} failed ({})", position, e);
        }
        outcome.result
    }

    /// Erase the sector holding `position`, verified by sampling its prefix.
    pub async fn erase_sector(&self, position: usize) -> Result<u8, FlashError> {
        let start = self.geometry.sector_start(position);
        let addr = self.geometry.page_address(start)?;
        let sample = self.geometry.erase_verify_bytes.clamp(1, SLOT_BYTES);

        let outcome = Retry::new(self.erase_policy, move |attempt: Attempt| async move {
            self.device
                .lock()
                .await
                .map_err(|_| FlashError::LockTimeout)?
                .erase_sector(addr)?;
            if attempt.verify {
                let mut prefix = [0u8; SLOT_BYTES];
                self.device
                    .lock()
                    .await
                    .map_err(|_| FlashError::LockTimeout)?
                    .page_read(addr, &mut prefix[..sample])?;
                if prefix[..sample].iter().any(|&b| b != ERASED) {
                    warn!("Flash: sector 0x{:06X} not blank after erase", addr);
                    return Err(FlashError::EraseFailed);
                }
            }
            Ok(())
        })
        .run()
        .await;

        self.stats
            .bump(|s| s.erases.record(outcome.attempts, outcome.succeeded()));
        match outcome.result {
            Ok(()) => Ok(outcome.attempts),
            Err(e) => {
                warn!(
                    "Flash: erase of sector at pos {} failed after {} attempts ({})",
                    start, outcome.attempts, e
                );
                Err(e)
            }
        }
    }

    /// Erase every sector of the ring. Returns the number that failed.
    pub async fn erase_all(&self) -> usize {
        let mut failed = 0;
        for sector in 0..self.geometry.sectors() {
            if self
                .erase_sector(sector * self.geometry.pages_per_sector)
                .await
                .is_err()
            {
                failed += 1;
            }
        }
        info!(
            "Flash: erased {} sectors ({} failed)",
            self.geometry.sectors(),
            failed
        );
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::flash::SimNorFlash;
    use crate::slot::{Sample, SampleBuf};
    use futures_lite::future::block_on;

    fn cfg() -> SystemConfig {
        SystemConfig {
            ring_slots: 64,
            pages_per_sector: 16,
            safety_margin: 16,
            write_retry_delay_ms: 0,
            erase_retry_delay_ms: 0,
            ..Default::default()
        }
    }

    fn store() -> (FlashPageStore<SimNorFlash>, SimNorFlash, Rc<StatsCell>) {
        let c = cfg();
        let flash = SimNorFlash::for_ring(&c);
        let stats = Rc::new(StatsCell::new(c.lock_timeout()));
        let s = FlashPageStore::new(flash.clone(), &c, stats.clone()).unwrap();
        (s, flash, stats)
    }

    fn slot(seq: u32) -> Slot {
        let mut samples = SampleBuf::new();
        samples.push(Sample::new(1, 2, 3)).unwrap();
        Slot {
            seq,
            samples,
            ts_now_ms: 2000,
            ts_prev_ms: 0,
        }
    }

    #[test]
    fn geometry_addresses() {
        let g = FlashGeometry::from_config(&cfg());
        assert_eq!(g.page_address(0), Ok(0x1000));
        assert_eq!(g.page_address(3), Ok(0x1000 + 3 * 256));
        assert_eq!(g.page_address(64), Err(FlashError::OutOfRange));
        assert_eq!(g.sector_start(17), 16);
        assert!(g.is_sector_boundary(0));
        assert!(g.is_sector_boundary(32));
        assert!(!g.is_sector_boundary(33));
        assert_eq!(g.sectors(), 4);
    }

    #[test]
    fn write_then_read_back() {
        let (s, _, stats) = store();
        block_on(async {
            s.erase_sector(0).await.unwrap();
            assert_eq!(s.write(5, &slot(9)).await, Ok(1));
            assert_eq!(s.read(5).await.unwrap(), slot(9));
        });
        assert_eq!(stats.snapshot().unwrap().writes.histogram[0], 1);
    }

    #[test]
    fn write_into_programmed_page_fails_verification() {
        let (s, _, stats) = store();
        block_on(async {
            s.erase_sector(0).await.unwrap();
            s.write(1, &slot(1)).await.unwrap();
            assert_eq!(s.write(1, &slot(2)).await, Err(FlashError::VerifyMismatch));
        });
        let st = stats.snapshot().unwrap();
        assert_eq!(st.writes.faults, 1);
        assert_eq!(st.writes.retries, 3);
    }

    #[test]
    fn erased_page_reads_as_decode_error() {
        let (s, _, stats) = store();
        block_on(async {
            s.erase_sector(0).await.unwrap();
            assert_eq!(s.read(2).await, Err(FlashError::Decode));
        });
        assert_eq!(stats.snapshot().unwrap().reads.faults, 1);
    }

    #[test]
    fn erase_resets_programmed_pages() {
        let (s, _, _) = store();
        block_on(async {
            s.erase_sector(16).await.unwrap();
            s.write(20, &slot(1)).await.unwrap();
            s.erase_sector(31).await.unwrap();
            assert_eq!(s.read(20).await, Err(FlashError::Decode));
            assert_eq!(s.write(20, &slot(2)).await, Ok(1));
        });
    }

    #[test]
    fn transient_write_faults_are_retried() {
        let (s, flash, stats) = store();
        flash.fail_next_writes(2);
        block_on(async {
            s.erase_sector(0).await.unwrap();
            assert_eq!(s.write(0, &slot(1)).await, Ok(3));
        });
        assert_eq!(stats.snapshot().unwrap().writes.histogram[2], 1);
    }

    #[test]
    fn erase_faults_exhaust_bound() {
        let (s, flash, stats) = store();
        flash.fail_next_erases(3);
        assert_eq!(block_on(s.erase_sector(0)), Err(FlashError::EraseFailed));
        assert_eq!(stats.snapshot().unwrap().erases.faults, 1);
    }

    #[test]
    fn out_of_range_position_is_rejected() {
        let (s, _, _) = store();
        assert_eq!(block_on(s.write(64, &slot(1))), Err(FlashError::OutOfRange));
    }

    #[test]
    fn mismatched_sector_geometry_is_init_error() {
        let c = SystemConfig {
            pages_per_sector: 8,
            ring_slots: 64,
            safety_margin: 16,
            ..Default::default()
        };
        let stats = Rc::new(StatsCell::new(c.lock_timeout()));
        let r = FlashPageStore::new(SimNorFlash::<16>::for_ring(&cfg()), &c, stats);
        assert!(matches!(r, Err(Error::Init(_))));
    }
}
