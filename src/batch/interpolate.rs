//! Per-sample timestamps for one FIFO block.
//!
//! The sensor only timestamps the FIFO-full interrupt, so the samples of a
//! block are assumed evenly spaced between the previous block's interrupt
//! and this one. Sample `i` of `count` lands at
//!
//! ```text
//! ts(i) = (prev*1000 + ((now*1000 - prev*1000) * (i+1)) / count + 500) / 1000
//! ```
//!
//! computed in ×1000 fixed point and rounded to the nearest millisecond.
//! The last sample always lands exactly on `now`.

/// Timestamp of sample `index` out of `count` captured in `(prev_ms, now_ms]`.
pub fn sample_timestamp(prev_ms: i64, now_ms: i64, count: usize, index: usize) -> i64 {
    let prev = prev_ms * 1000;
    let span = now_ms * 1000 - prev;
    (prev + span * (index as i64 + 1) / count as i64 + 500) / 1000
}

/// Timestamps for every sample of a block, oldest first. Empty when `count == 0`.
pub fn timestamps(prev_ms: i64, now_ms: i64, count: usize) -> impl Iterator<Item = i64> {
    (0..count).map(move |i| sample_timestamp(prev_ms, now_ms, count, i))
}
