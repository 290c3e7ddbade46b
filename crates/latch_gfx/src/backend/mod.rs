//! Rendering backend abstraction
//!
//! Every native API is driven through [`RenderBackend`]. The manager owns at
//! most one boxed instance at a time and hands it nothing but logical
//! handles; each backend keeps its own handle → native object table.

#[cfg(all(feature = "wgpu", not(target_arch = "wasm32")))]
pub mod native;
pub mod software;

#[cfg(all(feature = "wgpu", not(target_arch = "wasm32")))]
pub use native::WgpuBackend;
pub use software::SoftwareBackend;

use crate::{
    BackendType, CapabilitySet, Command, GfxError, NativeRef, Platform, ResourceDesc,
    ResourceHandle,
};
use std::time::Duration;

/// Opaque native surface handle supplied by the platform/window layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Everything a factory needs to bring up one backend instance.
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub platform: Platform,
    /// Capabilities probed right before this instance was requested.
    pub capabilities: CapabilitySet,
    pub surface: Option<SurfaceHandle>,
    pub surface_size: (u32, u32),
    /// Enable API validation layers where the backend has them.
    pub debug_mode: bool,
    /// Identifies the instance; stamped into every [`NativeRef`] it hands out.
    pub epoch: u64,
}

impl BackendContext {
    pub fn new(platform: Platform, capabilities: CapabilitySet) -> Self {
        Self {
            platform,
            capabilities,
            surface: None,
            surface_size: (1280, 720),
            debug_mode: false,
            epoch: 0,
        }
    }
}

/// One live native graphics context.
///
/// Calls arrive from a single owner at a time; implementations do not need
/// interior locking.
pub trait RenderBackend: Send {
    fn backend_type(&self) -> BackendType;

    /// Create the native object for `handle` from `desc`.
    ///
    /// Returns [`GfxError::Unsupported`] when the description needs a feature
    /// this backend lacks.
    fn create_resource(
        &mut self,
        handle: ResourceHandle,
        desc: &ResourceDesc,
    ) -> Result<NativeRef, GfxError>;

    fn destroy_resource(&mut self, handle: ResourceHandle);

    fn begin_frame(&mut self) -> Result<(), GfxError>;

    fn record_commands(&mut self, commands: &[Command]) -> Result<(), GfxError>;

    fn end_frame(&mut self) -> Result<(), GfxError>;

    /// Submit the ended frame and queue it for display.
    fn present(&mut self) -> Result<(), GfxError>;

    /// Wait for in-flight GPU work. Exceeding `timeout` is reported as
    /// [`GfxError::DeviceLost`].
    fn wait_idle(&mut self, timeout: Duration) -> Result<(), GfxError>;

    /// Recreate the swapchain at the new size.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), GfxError>;

    /// Total GPU errors observed since creation.
    fn gpu_error_count(&self) -> u64 {
        0
    }

    /// Release every native object. Safe to call more than once.
    fn destroy(&mut self);
}

/// Frame bracket state shared by the built-in backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameBracket {
    #[default]
    Idle,
    Recording,
    Ended,
}

impl FrameBracket {
    pub fn begin(&mut self) -> Result<(), GfxError> {
        match self {
            FrameBracket::Idle => {
                *self = FrameBracket::Recording;
                Ok(())
            }
            _ => Err(GfxError::OutOfFrame {
                operation: "begin_frame",
            }),
        }
    }

    pub fn require_recording(&self, operation: &'static str) -> Result<(), GfxError> {
        match self {
            FrameBracket::Recording => Ok(()),
            _ => Err(GfxError::OutOfFrame { operation }),
        }
    }

    pub fn end(&mut self) -> Result<(), GfxError> {
        self.require_recording("end_frame")?;
        *self = FrameBracket::Ended;
        Ok(())
    }

    /// Consume an ended frame for presentation.
    pub fn take_for_present(&mut self) -> Result<(), GfxError> {
        match self {
            FrameBracket::Ended => {
                *self = FrameBracket::Idle;
                Ok(())
            }
            _ => Err(GfxError::OutOfFrame {
                operation: "present",
            }),
        }
    }

    pub fn reset(&mut self) {
        *self = FrameBracket::Idle;
    }
}

/// Check that passes in `commands` are balanced and that pass-only
/// commands appear inside one.
pub fn check_pass_structure(commands: &[Command]) -> Result<(), GfxError> {
    let mut in_pass = false;
    for command in commands {
        match command {
            Command::BeginPass { .. } if in_pass => {
                return Err(GfxError::InvalidCommand {
                    reason: "render passes cannot nest".into(),
                });
            }
            Command::BeginPass { .. } => in_pass = true,
            Command::EndPass if in_pass => in_pass = false,
            Command::Dispatch { .. }
            | Command::WriteBuffer { .. }
            | Command::CopyBuffer { .. }
            | Command::Barrier
                if in_pass =>
            {
                return Err(GfxError::InvalidCommand {
                    reason: format!("'{}' is not allowed inside a render pass", command.name()),
                });
            }
            other if other.requires_pass() && !in_pass => {
                return Err(GfxError::InvalidCommand {
                    reason: format!("'{}' requires an open render pass", other.name()),
                });
            }
            _ => {}
        }
    }
    if in_pass {
        return Err(GfxError::InvalidCommand {
            reason: "render pass left open at the end of the sequence".into(),
        });
    }
    Ok(())
}
