use crate::{BackendType, ResourceHandle};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by backends, the orchestrator and the manager.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GfxError {
    /// Probed capabilities do not cover the backend's requirements.
    #[error("{backend} is missing required capabilities: {}", .missing.join(", "))]
    CapabilityUnavailable {
        backend: BackendType,
        missing: Vec<String>,
    },

    #[error("failed to initialize {backend}: {cause}")]
    InitializationFailed { backend: BackendType, cause: String },

    #[error("{backend} device lost: {reason}")]
    DeviceLost { backend: BackendType, reason: String },

    #[error("'{operation}' is not valid outside of an open frame")]
    OutOfFrame { operation: &'static str },

    #[error("resource {handle} could not be recreated: {cause}")]
    ResourceRebindFailed { handle: ResourceHandle, cause: String },

    #[error("{backend} does not support {feature}")]
    Unsupported { backend: BackendType, feature: String },

    #[error("resource {handle} is unknown or has no native object on the live backend")]
    InvalidResource { handle: ResourceHandle },

    #[error("invalid resource description: {reason}")]
    InvalidDescription { reason: String },

    #[error("invalid command sequence: {reason}")]
    InvalidCommand { reason: String },

    #[error("no backend is live")]
    NotLive,

    #[error("backend switch did not reach a live state within {waited:?}")]
    SwitchTimeout { waited: Duration },

    /// Every candidate, including the software rasterizer, failed.
    #[error("no backend could be initialized ({})", AttemptList(.attempts))]
    Exhausted { attempts: Vec<InitAttempt> },

    #[error("configuration error: {0}")]
    Config(String),
}

impl GfxError {
    /// Errors after which the manager cannot render anymore.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GfxError::Exhausted { .. } | GfxError::SwitchTimeout { .. })
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, GfxError::DeviceLost { .. })
    }
}

/// One failed candidate during initialization or a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitAttempt {
    pub backend: BackendType,
    pub cause: String,
}

struct AttemptList<'a>(&'a [InitAttempt]);

impl fmt::Display for AttemptList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no candidates");
        }
        for (i, attempt) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", attempt.backend, attempt.cause)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_lists_every_attempt() {
        let err = GfxError::Exhausted {
            attempts: vec![
                InitAttempt {
                    backend: BackendType::Vulkan,
                    cause: "no driver".into(),
                },
                InitAttempt {
                    backend: BackendType::Software,
                    cause: "forced".into(),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("vulkan: no driver"));
        assert!(message.contains("software: forced"));
        assert!(err.is_fatal());
    }

    #[test]
    fn device_lost_is_recoverable() {
        let err = GfxError::DeviceLost {
            backend: BackendType::DirectX12,
            reason: "TDR".into(),
        };
        assert!(err.is_device_lost());
        assert!(!err.is_fatal());
    }
}
