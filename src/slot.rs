//! Slot: one sensor capture as it is persisted in a single flash page.
//!
//! ```text
//!  byte  0        marker 0xA5
//!        1        sample count (0..=32)
//!        2..6     sequence number, u32 LE
//!        6..14    capture timestamp (ms), i64 LE
//!       14..22    previous capture timestamp (ms), i64 LE
//!       22..      count x (x, y, z) i16 LE
//!        ..254    0xFF padding
//!      254..256   checksum: wrapping u16 sum of bytes 0..254, LE
//! ```
//!
//! The layout is fixed-width so a full FIFO always fits one 256-byte page.
//! An erased page (all 0xFF) fails the marker check and decodes as an error.

use serde::{Deserialize, Serialize};

use crate::error::FlashError;

/// Serialized slot size; equals one flash page.
pub const SLOT_BYTES: usize = 256;

/// Accelerometer FIFO depth.
pub const MAX_SAMPLES: usize = 32;

const MARKER: u8 = 0xA5;
const ERASED: u8 = 0xFF;
const HEADER_LEN: usize = 22;
const SAMPLE_LEN: usize = 6;
const CHECKSUM_AT: usize = SLOT_BYTES - 2;

/// One accelerometer reading, raw counts per axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl Sample {
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

pub type SampleBuf = heapless::Vec<Sample, MAX_SAMPLES>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub seq: u32,
    pub samples: SampleBuf,
    /// Capture timestamp of this block.
    pub ts_now_ms: i64,
    /// Capture timestamp of the block before it.
    pub ts_prev_ms: i64,
}

impl Slot {
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Serialize into a full page image.
    pub fn encode(&self) -> [u8; SLOT_BYTES] {
        let mut page = [ERASED; SLOT_BYTES];
        page[0] = MARKER;
        page[1] = self.samples.len() as u8;
        page[2..6].copy_from_slice(&self.seq.to_le_bytes());
        page[6..14].copy_from_slice(&self.ts_now_ms.to_le_bytes());
        page[14..22].copy_from_slice(&self.ts_prev_ms.to_le_bytes());
        for (i, s) in self.samples.iter().enumerate() {
            let at = HEADER_LEN + i * SAMPLE_LEN;
            page[at..at + 2].copy_from_slice(&s.x.to_le_bytes());
            page[at + 2..at + 4].copy_from_slice(&s.y.to_le_bytes());
            page[at + 4..at + 6].copy_from_slice(&s.z.to_le_bytes());
        }
        let sum = checksum(&page[..CHECKSUM_AT]);
        page[CHECKSUM_AT..].copy_from_slice(&sum.to_le_bytes());
        page
    }

    /// Parse a page image. Erased or torn pages are rejected.
    pub fn decode(page: &[u8]) -> Result<Self, FlashError> {
        if page.len() < SLOT_BYTES || page[0] != MARKER {
            return Err(FlashError::Decode);
        }
        let count = page[1] as usize;
        if count > MAX_SAMPLES {
            return Err(FlashError::Decode);
        }
        let stored = u16::from_le_bytes([page[CHECKSUM_AT], page[CHECKSUM_AT + 1]]);
        if stored != checksum(&page[..CHECKSUM_AT]) {
            return Err(FlashError::Decode);
        }

        let seq = u32::from_le_bytes(le_array(&page[2..6]));
        let ts_now_ms = i64::from_le_bytes(le_array(&page[6..14]));
        let ts_prev_ms = i64::from_le_bytes(le_array(&page[14..22]));

        let mut samples = SampleBuf::new();
        for i in 0..count {
            let at = HEADER_LEN + i * SAMPLE_LEN;
            let axis = |o: usize| i16::from_le_bytes([page[at + o], page[at + o + 1]]);
            // count <= MAX_SAMPLES was checked above
            let _ = samples.push(Sample::new(axis(0), axis(2), axis(4)));
        }

        Ok(Self {
            seq,
            samples,
            ts_now_ms,
            ts_prev_ms,
        })
    }
}

fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
