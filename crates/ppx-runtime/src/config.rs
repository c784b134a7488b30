#![forbid(unsafe_code)]

//! Tunables for the overlay runtime.
//!
//! Every field has a default equal to the behaviour the extension ships
//! with, so `OverlayConfig::default()` is the production configuration.
//! Hosts may override fields from a JSON string:
//!
//! ```rust,ignore
//! let config = OverlayConfig::from_json_str(r#"{"debounceMs": 250}"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Storage key for the saved-image collection.
pub const SAVED_IMAGES_KEY: &str = "savedImagesAtom";

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverlayConfig {
    /// Capacity of the saved-image collection; the oldest entry is evicted.
    pub max_images: usize,
    /// Trailing debounce for geometry-only persistence writes.
    pub debounce_ms: u64,
    /// Opacity restored by the opacity toggle, and the initial opacity.
    pub default_opacity: u8,
    /// Pixels per nudge.
    pub nudge_step: u32,
    /// Minimum overlay height produced by resizing.
    pub min_overlay_height: u32,
    /// Durable storage key for the collection.
    pub storage_key: String,
    /// Let drags leave the viewport.
    pub allow_outside_viewport: bool,
    /// Wait between injecting the content script and resending a message.
    pub inject_settle_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            max_images: 20,
            debounce_ms: 500,
            default_opacity: 50,
            nudge_step: 1,
            min_overlay_height: ppx_core::geometry::MIN_OVERLAY_HEIGHT,
            storage_key: SAVED_IMAGES_KEY.to_owned(),
            allow_outside_viewport: false,
            inject_settle_ms: 200,
        }
    }
}

impl OverlayConfig {
    /// Parse and validate a JSON override. Missing fields keep defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.max_images == 0 {
            problems.push("maxImages must be > 0".to_owned());
        }
        if self.default_opacity > 100 {
            problems.push(format!(
                "defaultOpacity must be in 0..=100, got {}",
                self.default_opacity
            ));
        }
        if self.nudge_step == 0 {
            problems.push("nudgeStep must be > 0".to_owned());
        }
        if self.storage_key.is_empty() {
            problems.push("storageKey must not be empty".to_owned());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn inject_settle(&self) -> Duration {
        Duration::from_millis(self.inject_settle_ms)
    }

    /// Resize limits derived from this configuration.
    #[must_use]
    pub fn resize_limits(&self) -> ppx_core::ResizeLimits {
        ppx_core::ResizeLimits {
            min_height: self.min_overlay_height,
            ..ppx_core::ResizeLimits::default()
        }
    }
}

/// Configuration loading error.
#[derive(Debug)]
pub enum ConfigError {
    /// Malformed JSON or wrong field types.
    Json(serde_json::Error),
    /// Well-formed but out of range.
    Invalid(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "config parse error: {e}"),
            Self::Invalid(problems) => write!(f, "invalid config: {}", problems.join("; ")),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}
