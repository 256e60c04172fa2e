//! Simulated accelerometer implementing [`SensorPort`].
//!
//! Produces a deterministic walking-gait pattern: a triangle wave on X,
//! small jitter on Y, gravity plus a bounce on Z. Every read returns one
//! full FIFO watermark of samples.

use crate::app::ports::SensorPort;
use crate::error::SensorError;
use crate::slot::{MAX_SAMPLES, Sample, SampleBuf};

/// Raw counts for 1 g at the ±8 g range.
const ONE_G: i16 = 4096;

pub struct SimAccelerometer {
    per_read: usize,
    tick: u32,
    fail_every: u32,
    reads: u32,
}

impl SimAccelerometer {
    pub fn new(per_read: usize) -> Self {
        Self {
            per_read: per_read.min(MAX_SAMPLES),
            tick: 0,
            fail_every: 0,
            reads: 0,
        }
    }

    /// Every `n`-th read fails with a bus error. 0 disables.
    pub fn with_failures(mut self, n: u32) -> Self {
        self.fail_every = n;
        self
    }

    fn next_sample(&mut self) -> Sample {
        let phase = (self.tick % 64) as i16;
        let tri = if phase < 32 { phase } else { 64 - phase };
        self.tick = self.tick.wrapping_add(1);
        Sample::new(
            (tri - 16) * 64,
            (self.tick.wrapping_mul(7) % 11) as i16 - 5,
            ONE_G + (tri - 16) * 16,
        )
    }
}

impl SensorPort for SimAccelerometer {
    fn read_fifo(&mut self, out: &mut SampleBuf) -> Result<usize, SensorError> {
        out.clear();
        self.reads = self.reads.wrapping_add(1);
        if self.fail_every > 0 && self.reads % self.fail_every == 0 {
            return Err(SensorError::Bus);
        }
        for _ in 0..self.per_read {
            let s = self.next_sample();
            let _ = out.push(s);
        }
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_one_watermark() {
        let mut s = SimAccelerometer::new(30);
        let mut buf = SampleBuf::new();
        assert_eq!(s.read_fifo(&mut buf), Ok(30));
        assert!(buf.iter().all(|v| v.z > ONE_G / 2));
    }

    #[test]
    fn per_read_is_capped_at_fifo_depth() {
        let mut s = SimAccelerometer::new(100);
        let mut buf = SampleBuf::new();
        assert_eq!(s.read_fifo(&mut buf), Ok(MAX_SAMPLES));
    }

    #[test]
    fn scripted_failures() {
        let mut s = SimAccelerometer::new(4).with_failures(2);
        let mut buf = SampleBuf::new();
        assert!(s.read_fifo(&mut buf).is_ok());
        assert_eq!(s.read_fifo(&mut buf), Err(SensorError::Bus));
        assert!(buf.is_empty());
    }
}
