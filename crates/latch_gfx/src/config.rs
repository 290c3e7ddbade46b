//! Graphics settings

use crate::{BackendType, GfxError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings read once by [`crate::Manager::init`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    /// Tried first when its capabilities are present.
    pub preferred_backend: Option<BackendType>,
    /// Walk the candidate chain on failure. When off, only the requested
    /// backend is attempted at init and its failure is returned as is.
    pub auto_fallback: bool,
    /// Backend validation layers and verbose fallback logging.
    pub debug_mode: bool,
    /// Bound on one candidate's initialization.
    pub init_timeout_ms: u64,
    /// Bound on draining GPU work before a switch; exceeding it counts as
    /// device loss.
    pub drain_timeout_ms: u64,
    /// How long frame calls wait for a switch before failing.
    pub switch_wait_timeout_ms: u64,
    /// Treat a candidate that leaves resources degraded as failed and keep
    /// cascading. Software is always accepted.
    pub strict_rebind: bool,
    pub surface_width: u32,
    pub surface_height: u32,
    pub adaptive: AdaptivePolicy,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            preferred_backend: None,
            auto_fallback: true,
            debug_mode: false,
            init_timeout_ms: 5_000,
            drain_timeout_ms: 2_000,
            switch_wait_timeout_ms: 10_000,
            strict_rebind: false,
            surface_width: 1280,
            surface_height: 720,
            adaptive: AdaptivePolicy::default(),
        }
    }
}

impl GfxConfig {
    pub fn from_json_str(json: &str) -> Result<Self, GfxError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| GfxError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GfxError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|err| GfxError::Config(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn with_preferred(mut self, backend: BackendType) -> Self {
        self.preferred_backend = Some(backend);
        self
    }

    pub fn validate(&self) -> Result<(), GfxError> {
        if self.surface_width == 0 || self.surface_height == 0 {
            return Err(GfxError::Config("surface size must be non-zero".into()));
        }
        if self.init_timeout_ms == 0 || self.switch_wait_timeout_ms == 0 {
            return Err(GfxError::Config("timeouts must be non-zero".into()));
        }
        self.adaptive.validate()
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn switch_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_wait_timeout_ms)
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.surface_width, self.surface_height)
    }
}

/// When an [`crate::AdaptiveRenderer`] asks for a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptivePolicy {
    /// Moving-average frame time above which a frame counts as slow.
    pub frame_time_ceiling_ms: f64,
    /// Slow frames in a row before a switch is requested.
    pub consecutive_frames: u32,
    /// Samples in the moving average.
    pub average_window: usize,
    pub sample_capacity: usize,
    pub switch_on_device_lost: bool,
    /// Frames after a switch during which slow frames are not counted.
    pub cooldown_frames: u32,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            frame_time_ceiling_ms: 33.4,
            consecutive_frames: 30,
            average_window: 10,
            sample_capacity: 120,
            switch_on_device_lost: true,
            cooldown_frames: 120,
        }
    }
}

impl AdaptivePolicy {
    pub fn frame_time_ceiling(&self) -> Duration {
        Duration::from_secs_f64(self.frame_time_ceiling_ms.max(0.0) / 1000.0)
    }

    pub fn validate(&self) -> Result<(), GfxError> {
        if !self.frame_time_ceiling_ms.is_finite() || self.frame_time_ceiling_ms <= 0.0 {
            return Err(GfxError::Config(
                "adaptive.frame_time_ceiling_ms must be positive".into(),
            ));
        }
        if self.consecutive_frames == 0 || self.average_window == 0 || self.sample_capacity == 0 {
            return Err(GfxError::Config(
                "adaptive frame counts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = GfxConfig::from_json_str(
            r#"{ "preferred_backend": "vulkan", "adaptive": { "consecutive_frames": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.preferred_backend, Some(BackendType::Vulkan));
        assert!(config.auto_fallback);
        assert_eq!(config.init_timeout(), Duration::from_secs(5));
        assert_eq!(config.adaptive.consecutive_frames, 5);
        assert_eq!(config.adaptive.sample_capacity, 120);
    }

    #[test]
    fn test_unknown_backend_is_a_config_error() {
        let err = GfxConfig::from_json_str(r#"{ "preferred_backend": "glide" }"#).unwrap_err();
        assert!(matches!(err, GfxError::Config(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err =
            GfxConfig::from_json_str(r#"{ "adaptive": { "average_window": 0 } }"#).unwrap_err();
        assert!(matches!(err, GfxError::Config(_)));
    }
}
