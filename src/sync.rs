//! Bounded-wait synchronisation shared by the capture and transmit tasks.
//!
//! Every lock in the core is a [`TimedMutex`]: acquisition either succeeds
//! within the configured bound or reports [`LockTimeout`], which callers
//! treat as a soft failure (skip the operation, bump a counter). Nothing
//! in the core blocks indefinitely.
//!
//! All tasks run on a single `edge_executor::LocalExecutor`, so the raw
//! mutex is [`NoopRawMutex`]. Interrupt context never touches these locks;
//! it talks to the capture task through atomics (see [`crate::capture`]).

use core::fmt;
use core::future::Future;
use core::time::Duration;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};

/// A bounded wait ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

/// A [`TimedMutex`] was not acquired within its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeout;

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock not acquired within bound")
    }
}

/// Race `fut` against a reactor timer.
pub async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, Elapsed> {
    futures_lite::future::or(async { Ok(fut.await) }, async {
        async_io_mini::Timer::after(timeout).await;
        Err(Elapsed)
    })
    .await
}

/// Cooperative delay on the reactor timer.
pub async fn sleep(duration: Duration) {
    async_io_mini::Timer::after(duration).await;
}

pub type Guard<'a, T> = MutexGuard<'a, NoopRawMutex, T>;

/// Async mutex whose every acquisition is bounded.
pub struct TimedMutex<T> {
    inner: Mutex<NoopRawMutex, T>,
    timeout: Duration,
}

impl<T> TimedMutex<T> {
    pub const fn new(value: T, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(value),
            timeout,
        }
    }

    /// Acquire, waiting at most the configured timeout.
    pub async fn lock(&self) -> Result<Guard<'_, T>, LockTimeout> {
        if let Ok(guard) = self.inner.try_lock() {
            return Ok(guard);
        }
        with_timeout(self.timeout, self.inner.lock())
            .await
            .map_err(|_| LockTimeout)
    }

    /// Acquire only if free right now. Used for best-effort updates.
    pub fn try_lock(&self) -> Option<Guard<'_, T>> {
        self.inner.try_lock().ok()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
