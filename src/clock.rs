//! Wall-clock seam.
//!
//! Freshness decisions are wall-clock based, so the clock is injected rather
//! than read ambiently. Production uses [`SystemClock`]; tests drive
//! [`ManualClock`] through the timeline scenarios.

use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

/// Source of the current time for freshness decisions and `cached_at` stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// UTC system clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Hand-driven clock with millisecond resolution.
///
/// Public because integration tests live outside the crate.
#[derive(Debug)]
pub struct ManualClock {
    unix_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            unix_ms: AtomicI64::new((start.unix_timestamp_nanos() / 1_000_000) as i64),
        }
    }

    /// Start at the UNIX epoch.
    pub fn at_epoch() -> Self {
        Self::new(OffsetDateTime::UNIX_EPOCH)
    }

    pub fn advance_ms(&self, delta: i64) {
        self.unix_ms.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_ms(&self, unix_ms: i64) {
        self.unix_ms.store(unix_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        let nanos = i128::from(self.unix_ms.load(Ordering::SeqCst)) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}
