//! Unified error types for the wearlog core.
//!
//! Every subsystem has its own small `Copy` error enum so failures can be
//! counted and logged without allocation. All of them convert into the
//! top-level [`Error`], which is what the boot path and the binary see.
//!
//! Only [`Error::Init`] is ever fatal: the remaining variants are handled
//! at the component boundary and surface as counters.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A flash page/sector operation failed after its retries.
    Flash(FlashError),
    /// A capture could not be stored in the ring.
    Append(AppendError),
    /// The publish transport failed or timed out.
    Publish(PublishError),
    /// The network link could not be brought up.
    Link(LinkError),
    /// The accelerometer could not be read.
    Sensor(SensorError),
    /// A shared lock was not acquired within its bound.
    LockTimeout,
    /// Boot-time initialisation failed. The only restart-worthy error.
    Init(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash(e) => write!(f, "flash: {e}"),
            Self::Append(e) => write!(f, "append: {e}"),
            Self::Publish(e) => write!(f, "publish: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::LockTimeout => write!(f, "lock timeout"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Flash errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// The device rejected a page program.
    WriteFailed,
    /// Page read back differs from what was written.
    VerifyMismatch,
    /// Sector erase failed or the sampled prefix is not blank.
    EraseFailed,
    /// The device rejected a page read.
    ReadFailed,
    /// Page contents do not decode as a slot (erased or torn page).
    Decode,
    /// Slot does not fit in one page.
    Encode,
    /// Position outside the ring.
    OutOfRange,
    /// Flash lock not acquired within its bound.
    LockTimeout,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed => write!(f, "page write failed"),
            Self::VerifyMismatch => write!(f, "read-back verify mismatch"),
            Self::EraseFailed => write!(f, "sector erase failed"),
            Self::ReadFailed => write!(f, "page read failed"),
            Self::Decode => write!(f, "page does not hold a valid slot"),
            Self::Encode => write!(f, "slot does not fit in a page"),
            Self::OutOfRange => write!(f, "position out of range"),
            Self::LockTimeout => write!(f, "flash lock timeout"),
        }
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

// ---------------------------------------------------------------------------
// Ring append errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendError {
    /// The write position is inside the unconfirmed tail plus margin.
    Backpressure,
    /// Buffer lock not acquired within its bound.
    LockTimeout,
    /// The page write exhausted its retries.
    Flash(FlashError),
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backpressure => write!(f, "ring full of undelivered data"),
            Self::LockTimeout => write!(f, "buffer lock timeout"),
            Self::Flash(e) => write!(f, "{e}"),
        }
    }
}

impl From<AppendError> for Error {
    fn from(e: AppendError) -> Self {
        Self::Append(e)
    }
}

// ---------------------------------------------------------------------------
// Network errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// The client could not be started.
    StartFailed,
    /// The broker connection was not established in time.
    ConnectTimeout,
    /// The publish was rejected or the connection dropped.
    Failed,
    /// No acknowledgment within the ack timeout.
    Timeout,
    /// Payload could not be encoded.
    Encode,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartFailed => write!(f, "client start failed"),
            Self::ConnectTimeout => write!(f, "broker connect timeout"),
            Self::Failed => write!(f, "publish failed"),
            Self::Timeout => write!(f, "acknowledgment timeout"),
            Self::Encode => write!(f, "payload encode failed"),
        }
    }
}

impl From<PublishError> for Error {
    fn from(e: PublishError) -> Self {
        Self::Publish(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Network selection was rejected by the radio stack.
    SelectFailed,
    /// The link did not come up in time.
    Timeout,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectFailed => write!(f, "network select failed"),
            Self::Timeout => write!(f, "link up timeout"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// I2C transaction failed.
    Bus,
    /// FIFO reported more samples than it can hold.
    Overrun,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => write!(f, "I2C bus error"),
            Self::Overrun => write!(f, "FIFO overrun"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

impl From<crate::sync::LockTimeout> for Error {
    fn from(_: crate::sync::LockTimeout) -> Self {
        Self::LockTimeout
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_errors_display_with_prefix() {
        let e: Error = AppendError::Flash(FlashError::VerifyMismatch).into();
        assert_eq!(e.to_string(), "append: read-back verify mismatch");
        let e: Error = PublishError::Timeout.into();
        assert_eq!(e.to_string(), "publish: acknowledgment timeout");
    }

    #[test]
    fn init_is_distinct_from_config() {
        assert_ne!(Error::Init("flash"), Error::Config("flash"));
    }
}
