//! MC36xx-family 3-axis accelerometer in FIFO-watermark mode.
//!
//! The part buffers samples in its on-chip FIFO and raises INTN when the
//! level reaches the configured threshold. The ISR only stamps the time
//! (see [`crate::capture::FifoIrq`]); this driver does the I2C work from
//! the capture task:
//!
//! ```text
//!  FIFO level (0x0A) ──▶ n x burst read XOUT..ZOUT (6 bytes) ──▶ clear INTR
//! ```
//!
//! Generic over `embedded_hal::i2c::I2c`, so it runs against the ESP-IDF
//! I2C driver on target and against a register-map mock in tests.

use embedded_hal::i2c::I2c;
use log::{info, warn};

use crate::app::ports::SensorPort;
use crate::error::SensorError;
use crate::slot::{MAX_SAMPLES, Sample, SampleBuf};

/// 7-bit bus address with the address pin tied low.
pub const DEFAULT_ADDRESS: u8 = 0x4C;

const REG_XOUT_LSB: u8 = 0x02;
const REG_INTR_STATUS: u8 = 0x09;
const REG_FIFO_LEVEL: u8 = 0x0A;
const REG_MODE_C: u8 = 0x10;
const REG_FIFO_C: u8 = 0x16;
const REG_INTR_C: u8 = 0x17;

const MODE_STANDBY: u8 = 0x01;
const MODE_CWAKE: u8 = 0x05;
const FIFO_THRESHOLD_ENABLE: u8 = 1 << 6;
const INTR_FIFO_THRESHOLD: u8 = 1 << 6;
const FIFO_LEVEL_MASK: u8 = 0x3F;

pub struct FifoAccelerometer<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> FifoAccelerometer<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Configure FIFO threshold mode and start continuous sampling.
    pub fn init(&mut self, threshold: u8) -> Result<(), SensorError> {
        let threshold = threshold.min(MAX_SAMPLES as u8) & FIFO_LEVEL_MASK;
        self.write_reg(REG_MODE_C, MODE_STANDBY)?;
        self.write_reg(REG_FIFO_C, FIFO_THRESHOLD_ENABLE | threshold)?;
        self.write_reg(REG_INTR_C, INTR_FIFO_THRESHOLD)?;
        self.write_reg(REG_MODE_C, MODE_CWAKE)?;
        info!("Accel: FIFO threshold {} at 0x{:02X}", threshold, self.address);
        Ok(())
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[reg, value])
            .map_err(|_| SensorError::Bus)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, SensorError> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[reg], &mut buf)
            .map_err(|_| SensorError::Bus)?;
        Ok(buf[0])
    }

    fn read_sample(&mut self) -> Result<Sample, SensorError> {
        let mut raw = [0u8; 6];
        self.i2c
            .write_read(self.address, &[REG_XOUT_LSB], &mut raw)
            .map_err(|_| SensorError::Bus)?;
        Ok(Sample::new(
            i16::from_le_bytes([raw[0], raw[1]]),
            i16::from_le_bytes([raw[2], raw[3]]),
            i16::from_le_bytes([raw[4], raw[5]]),
        ))
    }
}

impl<I2C: I2c> SensorPort for FifoAccelerometer<I2C> {
    fn read_fifo(&mut self, out: &mut SampleBuf) -> Result<usize, SensorError> {
        out.clear();
        let level = (self.read_reg(REG_FIFO_LEVEL)? & FIFO_LEVEL_MASK) as usize;
        if level > MAX_SAMPLES {
            warn!("Accel: FIFO level {} exceeds {}", level, MAX_SAMPLES);
            // drain the interrupt so the next watermark fires
            let _ = self.read_reg(REG_INTR_STATUS);
            return Err(SensorError::Overrun);
        }
        for _ in 0..level {
            let sample = self.read_sample()?;
            // level <= MAX_SAMPLES was checked above
            let _ = out.push(sample);
        }
        // reading INTR_STATUS and writing it back clears INTN
        let status = self.read_reg(REG_INTR_STATUS)?;
        self.write_reg(REG_INTR_STATUS, status)?;
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use std::collections::VecDeque;

    struct RegisterMap {
        regs: [u8; 0x40],
        fifo: VecDeque<[u8; 6]>,
        writes: Vec<(u8, u8)>,
        fail: bool,
    }

    impl Default for RegisterMap {
        fn default() -> Self {
            Self {
                regs: [0; 0x40],
                fifo: VecDeque::new(),
                writes: Vec::new(),
                fail: false,
            }
        }
    }

    impl ErrorType for RegisterMap {
        type Error = ErrorKind;
    }

    impl I2c for RegisterMap {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.fail || address != DEFAULT_ADDRESS {
                return Err(ErrorKind::Other);
            }
            let mut pointer = 0u8;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        pointer = bytes[0];
                        if let Some(&value) = bytes.get(1) {
                            self.regs[pointer as usize] = value;
                            self.writes.push((pointer, value));
                        }
                    }
                    Operation::Read(buf) => {
                        if pointer == REG_XOUT_LSB {
                            let sample = self.fifo.pop_front().unwrap_or_default();
                            buf.copy_from_slice(&sample);
                            self.regs[REG_FIFO_LEVEL as usize] = self.fifo.len() as u8;
                        } else {
                            buf[0] = self.regs[pointer as usize];
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn raw(x: i16, y: i16, z: i16) -> [u8; 6] {
        let mut r = [0u8; 6];
        r[0..2].copy_from_slice(&x.to_le_bytes());
        r[2..4].copy_from_slice(&y.to_le_bytes());
        r[4..6].copy_from_slice(&z.to_le_bytes());
        r
    }

    #[test]
    fn init_programs_threshold_mode() {
        let mut accel = FifoAccelerometer::new(RegisterMap::default(), DEFAULT_ADDRESS);
        accel.init(30).unwrap();
        let bus = accel.release();
        assert_eq!(
            bus.writes,
            vec![
                (REG_MODE_C, MODE_STANDBY),
                (REG_FIFO_C, FIFO_THRESHOLD_ENABLE | 30),
                (REG_INTR_C, INTR_FIFO_THRESHOLD),
                (REG_MODE_C, MODE_CWAKE),
            ]
        );
    }

    #[test]
    fn drains_fifo_level_samples() {
        let mut bus = RegisterMap::default();
        bus.fifo.extend([raw(1, -2, 512), raw(3, 4, -512)]);
        bus.regs[REG_FIFO_LEVEL as usize] = 2;
        bus.regs[REG_INTR_STATUS as usize] = INTR_FIFO_THRESHOLD;

        let mut accel = FifoAccelerometer::new(bus, DEFAULT_ADDRESS);
        let mut out = SampleBuf::new();
        assert_eq!(accel.read_fifo(&mut out), Ok(2));
        assert_eq!(out[0], Sample::new(1, -2, 512));
        assert_eq!(out[1], Sample::new(3, 4, -512));

        let bus = accel.release();
        assert!(bus.writes.contains(&(REG_INTR_STATUS, INTR_FIFO_THRESHOLD)));
    }

    #[test]
    fn impossible_level_is_overrun() {
        let mut bus = RegisterMap::default();
        bus.regs[REG_FIFO_LEVEL as usize] = 40;
        let mut accel = FifoAccelerometer::new(bus, DEFAULT_ADDRESS);
        let mut out = SampleBuf::new();
        assert_eq!(accel.read_fifo(&mut out), Err(SensorError::Overrun));
        assert!(out.is_empty());
    }

    #[test]
    fn bus_error_maps_to_sensor_error() {
        let bus = RegisterMap {
            fail: true,
            ..Default::default()
        };
        let mut accel = FifoAccelerometer::new(bus, DEFAULT_ADDRESS);
        let mut out = SampleBuf::new();
        assert_eq!(accel.read_fifo(&mut out), Err(SensorError::Bus));
    }
}
