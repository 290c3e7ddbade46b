//! Latch Graphics Backends
//!
//! Cross-platform rendering with automatic backend selection and fallbacks.
//!
//! The crate hides the native graphics APIs (Vulkan, Direct3D, Metal,
//! OpenGL/GLES, WebGPU/WebGL and a CPU software rasterizer) behind the
//! [`RenderBackend`] trait, picks one per platform by probing capabilities and
//! walking a priority chain, and can swap the live backend at runtime while
//! keeping every [`ResourceHandle`] the application holds valid.
//!
//! ```ignore
//! use latch_gfx::{GfxConfig, Manager, RenderApi};
//!
//! let manager = Manager::init(GfxConfig::default())?;
//! let renderer = manager.create_adaptive_renderer(Default::default());
//! renderer.begin_frame()?;
//! renderer.record_commands(&commands)?;
//! renderer.end_frame()?;
//! renderer.present()?;
//! ```

pub mod adaptive;
pub mod api;
pub mod backend;
pub mod capability;
pub mod command;
pub mod config;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod platform;
pub mod probe;
pub mod rebinder;
pub mod registry;
pub mod resource;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adaptive::{AdaptiveMetrics, AdaptiveRenderer, PerformanceSample, SwitchReason};
pub use api::{BackendInfo, BackendSummary, RenderApi};
pub use backend::{BackendContext, RenderBackend, SoftwareBackend, SurfaceHandle};
pub use capability::{Capability, CapabilitySet, Requirements};
pub use command::Command;
pub use config::{AdaptivePolicy, GfxConfig};
pub use error::{GfxError, InitAttempt};
pub use manager::{BackendHandle, Manager, ManagerBuilder, SwitchOutcome};
pub use orchestrator::ManagerState;
pub use platform::Platform;
pub use probe::{probe_with_software, CapabilityProbe, StaticProbe, SystemProbe};
pub use rebinder::{RebindFailure, RebindReport, ResourceRebinder};
pub use registry::{BackendDescriptor, BackendFactory, BackendRegistry, RegistryBuilder};
pub use resource::{
    BufferDesc, BufferUsage, FramebufferDesc, LogicalResource, NativeRef, PipelineDesc,
    PipelineStages, ResourceDesc, ResourceHandle, ResourceKind, ResourceStatus, ShaderDesc,
    ShaderStage, TextureDesc, TextureFormat, VertexAttribute, VertexFormat,
};

#[cfg(feature = "wgpu")]
pub use wgpu;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rendering backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BackendType {
    /// Vulkan (cross-platform)
    #[serde(rename = "vulkan")]
    Vulkan,
    /// DirectX 11 (Windows)
    #[serde(rename = "d3d11")]
    DirectX11,
    /// DirectX 12 (Windows)
    #[serde(rename = "d3d12")]
    DirectX12,
    /// Metal (macOS, iOS)
    #[serde(rename = "metal")]
    Metal,
    /// OpenGL (desktop, fallback)
    #[serde(rename = "opengl")]
    OpenGL,
    /// OpenGL ES (mobile, embedded)
    #[serde(rename = "opengles")]
    OpenGLES,
    /// WebGPU (web)
    #[serde(rename = "webgpu")]
    WebGPU,
    /// WebGL 2 (web fallback)
    #[serde(rename = "webgl")]
    WebGL,
    /// Software rasterizer (ultimate fallback)
    #[serde(rename = "software")]
    Software,
}

impl BackendType {
    pub const ALL: [BackendType; 9] = [
        BackendType::Vulkan,
        BackendType::DirectX11,
        BackendType::DirectX12,
        BackendType::Metal,
        BackendType::OpenGL,
        BackendType::OpenGLES,
        BackendType::WebGPU,
        BackendType::WebGL,
        BackendType::Software,
    ];

    /// Short lowercase identifier, also accepted by `FromStr`.
    pub fn name(self) -> &'static str {
        match self {
            BackendType::Vulkan => "vulkan",
            BackendType::DirectX11 => "d3d11",
            BackendType::DirectX12 => "d3d12",
            BackendType::Metal => "metal",
            BackendType::OpenGL => "opengl",
            BackendType::OpenGLES => "opengles",
            BackendType::WebGPU => "webgpu",
            BackendType::WebGL => "webgl",
            BackendType::Software => "software",
        }
    }

    pub fn is_software(self) -> bool {
        self == BackendType::Software
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendType {
    type Err = GfxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let backend = match normalized.as_str() {
            "vulkan" | "vk" => BackendType::Vulkan,
            "d3d11" | "dx11" | "directx11" => BackendType::DirectX11,
            "d3d12" | "dx12" | "directx12" => BackendType::DirectX12,
            "metal" | "mtl" => BackendType::Metal,
            "opengl" | "gl" => BackendType::OpenGL,
            "opengles" | "gles" => BackendType::OpenGLES,
            "webgpu" => BackendType::WebGPU,
            "webgl" | "webgl2" => BackendType::WebGL,
            "software" | "cpu" => BackendType::Software,
            _ => {
                return Err(GfxError::Config(format!("unknown backend '{s}'")));
            }
        };
        Ok(backend)
    }
}
