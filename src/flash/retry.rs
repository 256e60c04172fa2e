//! Bounded retry wrapper shared by page write, page read and sector erase.
//!
//! A [`Retry`] pairs an operation closure with a [`RetryPolicy`]. The
//! closure is handed an [`Attempt`] describing which try this is and
//! whether it must verify its own effect (read-back compare, blank check).
//! The wrapper owns the loop, the inter-attempt delay, and reports how many
//! attempts were spent so callers can feed the attempt histograms.

use core::future::Future;
use core::time::Duration;

use crate::sync::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first. Always >= 1.
    pub max_attempts: u8,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
    /// Whether each attempt must confirm its effect before reporting ok.
    pub verify: bool,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u8, delay: Duration, verify: bool) -> Self {
        Self {
            max_attempts,
            delay,
            verify,
        }
    }
}

/// Context passed to the operation on every try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u8,
    pub verify: bool,
}

/// Result of a retried operation plus the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u8,
}

impl<T, E> Outcome<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Retry<Op> {
    policy: RetryPolicy,
    op: Op,
}

impl<Op> Retry<Op> {
    pub fn new(policy: RetryPolicy, op: Op) -> Self {
        Self { policy, op }
    }

    /// Run until the operation succeeds or the policy is exhausted.
    /// The last error is returned on exhaustion.
    pub async fn run<T, E, Fut>(mut self) -> Outcome<T, E>
    where
        Op: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.policy.max_attempts.max(1);
        let mut number = 1;
        loop {
            let attempt = Attempt {
                number,
                verify: self.policy.verify,
            };
            match (self.op)(attempt).await {
                Ok(value) => {
                    return Outcome {
                        result: Ok(value),
                        attempts: number,
                    };
                }
                Err(e) if number >= max => {
                    return Outcome {
                        result: Err(e),
                        attempts: number,
                    };
                }
                Err(_) => {
                    if !self.policy.delay.is_zero() {
                        sleep(self.policy.delay).await;
                    }
                    number += 1;
                }
            }
        }
    }
}
