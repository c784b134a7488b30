#![forbid(unsafe_code)]

//! Log subscriber setup.
//!
//! Library code only emits `tracing` events. Boundary code (storage,
//! messaging, paste/upload) logs under [`LOG_TARGET`] so a host can filter
//! the overlay's output with `PPX_LOG=pixel_perfect=debug`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Target used by boundary-layer log lines.
pub const LOG_TARGET: &str = "pixel_perfect";

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "PPX_LOG";

/// Install a global `fmt` subscriber.
///
/// The filter comes from `PPX_LOG` if set and valid, else from
/// `default_directive`. Returns `false` if a global subscriber was already
/// installed (calling twice is harmless).
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Install a subscriber that writes through the test harness capture.
pub fn init_for_tests() -> bool {
    fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let _ = init_for_tests();
        assert!(!init("debug"));
        tracing::info!(target: LOG_TARGET, "logging initialised");
    }
}
