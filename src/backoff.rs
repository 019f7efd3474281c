//! Reconnect backoff policy.
//!
//! # Formula
//!
//! `delay = min(cap, base * (attempt^2 + 1))`, with `attempt` starting at 0
//! for the first retry. With the reference parameters (500ms base, 30s cap):
//!
//! - attempt 0: 500ms
//! - attempt 1: 1s
//! - attempt 2: 2.5s
//! - attempt 3: 5s
//! - attempt 7: 25s
//! - attempt 8+: 30s (capped)

use std::time::Duration;

use crate::constants::{BACKOFF_BASE, BACKOFF_CAP};

/// Quadratic backoff with an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BACKOFF_BASE, BACKOFF_CAP)
    }
}

impl BackoffPolicy {
    /// Create a policy with the given base unit and cap.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Wait before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = u64::from(attempt);
        let factor = attempt.saturating_mul(attempt).saturating_add(1);
        let base_ms = self.base.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;
        Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
    }

    /// Base unit.
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Upper bound.
    #[must_use]
    pub fn cap(&self) -> Duration {
        self.cap
    }
}

/// Delay for `attempt` under the reference policy (500ms base, 30s cap).
#[must_use]
pub fn delay(attempt: u32) -> Duration {
    BackoffPolicy::default().delay(attempt)
}
