//! Rate-limited warnings
//!
//! A decoder emitting malformed records once per packet would otherwise
//! flood the log. Each warning class gets a small per-second budget;
//! warnings over budget are counted and reported with the next one allowed.

use governor::{DefaultDirectRateLimiter, Quota};
use once_cell::sync::Lazy;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

/// Warnings about fields that cannot be rendered into a topic or payload
pub static FIELD_WARNINGS: Lazy<WarnThrottle> = Lazy::new(|| WarnThrottle::per_second(5));

/// Warnings about payloads that exceed their size bound
pub static PAYLOAD_WARNINGS: Lazy<WarnThrottle> = Lazy::new(|| WarnThrottle::per_second(5));

/// Warnings about publishes dropped by a full queue or a failing client
pub static PUBLISH_WARNINGS: Lazy<WarnThrottle> = Lazy::new(|| WarnThrottle::per_second(5));

pub struct WarnThrottle {
    limiter: DefaultDirectRateLimiter,
    suppressed: AtomicU64,
}

impl WarnThrottle {
    pub fn per_second(burst: u32) -> Self {
        let rate = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: DefaultDirectRateLimiter::direct(Quota::per_second(rate)),
            suppressed: AtomicU64::new(0),
        }
    }

    /// True when a warning may be logged now; otherwise counts it as suppressed
    pub fn allow(&self) -> bool {
        if self.limiter.check().is_ok() {
            true
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Number of warnings suppressed since the last call
    pub fn take_suppressed(&self) -> u64 {
        self.suppressed.swap(0, Ordering::Relaxed)
    }
}
