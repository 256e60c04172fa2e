//! NOR flash adapters implementing [`FlashDevice`].
//!
//! - **`target_os = "espidf"`**: [`PartitionFlash`] drives a raw data
//!   partition through the `esp_partition_*` API. Ring addresses are
//!   offsets into that partition.
//! - **all targets**: [`SimNorFlash`], an in-memory chip with real NOR
//!   semantics (program can only clear bits, erase sets a whole sector to
//!   0xFF) and fault injection for the retry paths. Clones share the same
//!   memory so tests can keep a handle after moving one into the store.

use std::cell::RefCell;
use std::rc::Rc;

use log::info;

use crate::app::ports::FlashDevice;
use crate::config::SystemConfig;
use crate::error::FlashError;
use crate::slot::SLOT_BYTES;

// ───────────────────────────────────────────────────────────────
// Simulated chip
// ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimState {
    mem: Vec<u8>,
    base: u32,
    fail_writes: u32,
    garbled_verifies: u32,
    garble_next_read: bool,
    fail_reads: u32,
    fail_erases: u32,
    page_writes: u32,
    erase_log: Vec<u32>,
}

/// In-memory NOR flash with `PAGES_PER_SECTOR` x 256-byte pages per sector.
///
/// Memory starts fully programmed (0x00) so a write into a sector that was
/// never erased fails its read-back, as it would on a used chip.
#[derive(Clone)]
pub struct SimNorFlash<const PAGES_PER_SECTOR: usize = 16> {
    state: Rc<RefCell<SimState>>,
}

impl<const PPS: usize> SimNorFlash<PPS> {
    pub fn new(base: u32, len: usize) -> Self {
        info!("SimNorFlash: {} bytes at 0x{:06X}", len, base);
        Self {
            state: Rc::new(RefCell::new(SimState {
                mem: vec![0u8; len],
                base,
                ..SimState::default()
            })),
        }
    }

    /// A chip exactly covering the configured ring.
    pub fn for_ring(cfg: &SystemConfig) -> Self {
        Self::new(
            cfg.ring_base_address,
            cfg.ring_slots as usize * SLOT_BYTES,
        )
    }

    /// The next `n` page programs are rejected without touching memory.
    pub fn fail_next_writes(&self, n: u32) {
        self.state.borrow_mut().fail_writes = n;
    }

    /// The read-back after each of the next `n` page programs returns a
    /// flipped bit, as bus noise would. Stored data stays intact.
    pub fn garble_next_verifies(&self, n: u32) {
        self.state.borrow_mut().garbled_verifies = n;
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.state.borrow_mut().fail_reads = n;
    }

    pub fn fail_next_erases(&self, n: u32) {
        self.state.borrow_mut().fail_erases = n;
    }

    /// Successful page programs so far.
    pub fn page_writes(&self) -> u32 {
        self.state.borrow().page_writes
    }

    /// Addresses of every successful sector erase, in order.
    pub fn erase_log(&self) -> Vec<u32> {
        self.state.borrow().erase_log.clone()
    }

    /// Overwrite raw bytes, bypassing NOR rules (simulates corruption).
    pub fn poke(&self, addr: u32, bytes: &[u8]) {
        let mut st = self.state.borrow_mut();
        if let Some(at) = st.offset(addr, bytes.len()) {
            st.mem[at..at + bytes.len()].copy_from_slice(bytes);
        }
    }
}

impl SimState {
    fn offset(&self, addr: u32, len: usize) -> Option<usize> {
        let at = addr.checked_sub(self.base)? as usize;
        (at + len <= self.mem.len()).then_some(at)
    }
}

impl<const PPS: usize> FlashDevice for SimNorFlash<PPS> {
    const PAGE_SIZE: usize = SLOT_BYTES;
    const SECTOR_SIZE: usize = SLOT_BYTES * PPS;

    fn page_read(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashError> {
        let mut st = self.state.borrow_mut();
        if st.fail_reads > 0 {
            st.fail_reads -= 1;
            return Err(FlashError::ReadFailed);
        }
        let at = st.offset(addr, out.len()).ok_or(FlashError::OutOfRange)?;
        out.copy_from_slice(&st.mem[at..at + out.len()]);
        if std::mem::take(&mut st.garble_next_read) {
            if let Some(b) = out.first_mut() {
                *b ^= 0x01;
            }
        }
        Ok(())
    }

    fn page_write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let mut st = self.state.borrow_mut();
        if st.fail_writes > 0 {
            st.fail_writes -= 1;
            return Err(FlashError::WriteFailed);
        }
        if data.len() > Self::PAGE_SIZE {
            return Err(FlashError::WriteFailed);
        }
        let at = st.offset(addr, data.len()).ok_or(FlashError::OutOfRange)?;
        for (cell, &b) in st.mem[at..at + data.len()].iter_mut().zip(data) {
            *cell &= b;
        }
        if st.garbled_verifies > 0 {
            st.garbled_verifies -= 1;
            st.garble_next_read = true;
        }
        st.page_writes += 1;
        Ok(())
    }

    fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError> {
        let mut st = self.state.borrow_mut();
        if st.fail_erases > 0 {
            st.fail_erases -= 1;
            return Err(FlashError::EraseFailed);
        }
        let rel = addr.checked_sub(st.base).ok_or(FlashError::OutOfRange)?;
        if rel as usize % Self::SECTOR_SIZE != 0 {
            return Err(FlashError::EraseFailed);
        }
        let at = st
            .offset(addr, Self::SECTOR_SIZE)
            .ok_or(FlashError::OutOfRange)?;
        st.mem[at..at + Self::SECTOR_SIZE].fill(0xFF);
        st.erase_log.push(addr);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF raw partition
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::PartitionFlash;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_svc::sys::*;
    use log::{info, warn};

    use crate::app::ports::FlashDevice;
    use crate::error::FlashError;
    use crate::slot::SLOT_BYTES;

    /// Ring storage on a raw data partition (external SPI NOR).
    pub struct PartitionFlash {
        part: *const esp_partition_t,
    }

    impl PartitionFlash {
        /// Locate the data partition named `label` (NUL-terminated).
        pub fn open(label: &core::ffi::CStr) -> Result<Self, FlashError> {
            // SAFETY: label is a valid C string; the returned pointer refers
            // to the static partition table and lives for the whole program.
            let part = unsafe {
                esp_partition_find_first(
                    esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                    label.as_ptr(),
                )
            };
            if part.is_null() {
                warn!("PartitionFlash: partition {:?} not found", label);
                return Err(FlashError::OutOfRange);
            }
            // SAFETY: non-null pointer from esp_partition_find_first.
            let size = unsafe { (*part).size };
            info!("PartitionFlash: {:?} ({} bytes)", label, size);
            Ok(Self { part })
        }
    }

    impl FlashDevice for PartitionFlash {
        const PAGE_SIZE: usize = SLOT_BYTES;
        const SECTOR_SIZE: usize = 4096;

        fn page_read(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashError> {
            // SAFETY: `out` is valid for `out.len()` bytes; the driver bounds-checks offset.
            let ret = unsafe {
                esp_partition_read(self.part, addr as usize, out.as_mut_ptr().cast(), out.len())
            };
            if ret == ESP_OK { Ok(()) } else { Err(FlashError::ReadFailed) }
        }

        fn page_write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
            // SAFETY: `data` is valid for `data.len()` bytes.
            let ret = unsafe {
                esp_partition_write(self.part, addr as usize, data.as_ptr().cast(), data.len())
            };
            if ret == ESP_OK { Ok(()) } else { Err(FlashError::WriteFailed) }
        }

        fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError> {
            // SAFETY: offset and length are sector-aligned; the driver bounds-checks.
            let ret = unsafe {
                esp_partition_erase_range(self.part, addr as usize, Self::SECTOR_SIZE)
            };
            if ret == ESP_OK { Ok(()) } else { Err(FlashError::EraseFailed) }
        }
    }
}
