#![forbid(unsafe_code)]

//! Time sources.
//!
//! The runtime never reads ambient time directly. Debounce deadlines use
//! [`Clock::monotonic`]; image creation timestamps use [`Clock::unix_millis`].
//! Tests and the browser host drive a [`DeterministicClock`]; native callers
//! may use [`SystemClock`].

use core::time::Duration;
use std::cell::Cell;
use std::rc::Rc;

/// Source of monotonic and wall-clock time.
pub trait Clock {
    /// Monotonic time since an arbitrary origin.
    fn monotonic(&self) -> Duration;

    /// Wall-clock milliseconds since the Unix epoch.
    fn unix_millis(&self) -> u64;
}

/// Deterministic clock controlled by the host.
///
/// Clones share the same time cell, so one handle can be given to the
/// runtime while the host keeps another to advance time.
#[derive(Debug, Default, Clone)]
pub struct DeterministicClock {
    now: Rc<Cell<Duration>>,
    epoch_millis: Rc<Cell<u64>>,
}

impl DeterministicClock {
    /// Create a clock at monotonic `0` and Unix epoch `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock whose wall time starts at `epoch_millis`.
    #[must_use]
    pub fn starting_at(epoch_millis: u64) -> Self {
        let clock = Self::new();
        clock.epoch_millis.set(epoch_millis);
        clock
    }

    /// Set current monotonic time.
    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }

    /// Advance both monotonic and wall time by `dt`.
    pub fn advance(&self, dt: Duration) {
        self.now.set(self.now.get().saturating_add(dt));
        let millis = u64::try_from(dt.as_millis()).unwrap_or(u64::MAX);
        self.epoch_millis
            .set(self.epoch_millis.get().saturating_add(millis));
    }

    /// Convenience for [`Self::advance`] in milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for DeterministicClock {
    fn monotonic(&self) -> Duration {
        self.now.get()
    }

    fn unix_millis(&self) -> u64 {
        self.epoch_millis.get()
    }
}

/// Real clock backed by `web-time`, which maps to `performance.now()` and
/// `Date.now()` on wasm32 and to `std::time` elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: web_time::Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: web_time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn unix_millis(&self) -> u64 {
        web_time::SystemTime::now()
            .duration_since(web_time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn monotonic(&self) -> Duration {
        (**self).monotonic()
    }

    fn unix_millis(&self) -> u64 {
        (**self).unix_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_clock_advances_monotonically() {
        let c = DeterministicClock::starting_at(1_000);
        assert_eq!(c.monotonic(), Duration::ZERO);
        c.advance_ms(250);
        assert_eq!(c.monotonic(), Duration::from_millis(250));
        assert_eq!(c.unix_millis(), 1_250);
    }

    #[test]
    fn clones_share_time() {
        let host = DeterministicClock::new();
        let runtime = host.clone();
        host.advance_ms(10);
        assert_eq!(runtime.monotonic(), Duration::from_millis(10));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let c = SystemClock::new();
        let a = c.monotonic();
        let b = c.monotonic();
        assert!(b >= a);
        assert!(c.unix_millis() > 0);
    }
}
