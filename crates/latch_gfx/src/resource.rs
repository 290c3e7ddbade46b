//! Logical resources and their backend-independent creation descriptions
//!
//! A [`ResourceHandle`] is a process-unique index owned by the application.
//! The native object behind it lives in a side table owned by the live
//! backend and is identified by a [`NativeRef`]; that table is dropped
//! wholesale when the backend is switched out, while the handle and its
//! [`ResourceDesc`] survive and are replayed against the next backend.

use crate::{BackendType, GfxError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Stable, process-unique handle to a logical GPU resource.
///
/// Handles are allocated in increasing order, so sorting them yields
/// creation order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the raw index backing this handle.
    #[inline]
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Shader,
    Pipeline,
    Framebuffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Buffer => "buffer",
            ResourceKind::Texture => "texture",
            ResourceKind::Shader => "shader",
            ResourceKind::Pipeline => "pipeline",
            ResourceKind::Framebuffer => "framebuffer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Storage,
    /// CPU readback target.
    Staging,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
    /// Initial contents, at most `size` bytes.
    pub contents: Option<Vec<u8>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Depth32Float => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_levels: u32,
    /// Usable as a framebuffer attachment.
    pub render_target: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Mesh,
    RayGeneration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderDesc {
    pub label: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    /// WGSL source.
    pub source: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(self) -> u64 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
            VertexFormat::Unorm8x4 => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u64,
    pub format: VertexFormat,
}

/// Shader stages a pipeline is assembled from. Stages reference shader
/// resources by logical handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStages {
    Render {
        vertex: ResourceHandle,
        fragment: Option<ResourceHandle>,
        vertex_stride: u64,
        attributes: Vec<VertexAttribute>,
        color_format: TextureFormat,
    },
    Compute {
        shader: ResourceHandle,
    },
    Mesh {
        mesh: ResourceHandle,
        fragment: ResourceHandle,
        color_format: TextureFormat,
    },
    RayTracing {
        ray_generation: ResourceHandle,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineDesc {
    pub label: String,
    pub stages: PipelineStages,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramebufferDesc {
    pub label: String,
    pub color: Vec<ResourceHandle>,
    pub depth: Option<ResourceHandle>,
}

/// Immutable creation description of a logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
    Shader(ShaderDesc),
    Pipeline(PipelineDesc),
    Framebuffer(FramebufferDesc),
}

impl ResourceDesc {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDesc::Buffer(_) => ResourceKind::Buffer,
            ResourceDesc::Texture(_) => ResourceKind::Texture,
            ResourceDesc::Shader(_) => ResourceKind::Shader,
            ResourceDesc::Pipeline(_) => ResourceKind::Pipeline,
            ResourceDesc::Framebuffer(_) => ResourceKind::Framebuffer,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ResourceDesc::Buffer(desc) => &desc.label,
            ResourceDesc::Texture(desc) => &desc.label,
            ResourceDesc::Shader(desc) => &desc.label,
            ResourceDesc::Pipeline(desc) => &desc.label,
            ResourceDesc::Framebuffer(desc) => &desc.label,
        }
    }

    /// Other logical resources this one is built from.
    pub fn dependencies(&self) -> Vec<ResourceHandle> {
        match self {
            ResourceDesc::Pipeline(desc) => match &desc.stages {
                PipelineStages::Render {
                    vertex, fragment, ..
                } => std::iter::once(*vertex).chain(*fragment).collect(),
                PipelineStages::Compute { shader } => vec![*shader],
                PipelineStages::Mesh { mesh, fragment, .. } => vec![*mesh, *fragment],
                PipelineStages::RayTracing { ray_generation } => vec![*ray_generation],
            },
            ResourceDesc::Framebuffer(desc) => {
                desc.color.iter().copied().chain(desc.depth).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Structural checks that do not depend on any backend.
    pub fn validate(&self) -> Result<(), GfxError> {
        let invalid = |reason: String| Err(GfxError::InvalidDescription { reason });
        match self {
            ResourceDesc::Buffer(desc) => {
                if desc.size == 0 {
                    return invalid(format!("buffer '{}' has zero size", desc.label));
                }
                if let Some(contents) = &desc.contents {
                    if contents.len() as u64 > desc.size {
                        return invalid(format!(
                            "buffer '{}' contents ({} bytes) exceed its size ({})",
                            desc.label,
                            contents.len(),
                            desc.size
                        ));
                    }
                }
            }
            ResourceDesc::Texture(desc) => {
                if desc.width == 0 || desc.height == 0 {
                    return invalid(format!("texture '{}' has a zero extent", desc.label));
                }
                if desc.mip_levels == 0 {
                    return invalid(format!("texture '{}' has no mip levels", desc.label));
                }
            }
            ResourceDesc::Shader(desc) => {
                if desc.entry_point.is_empty() {
                    return invalid(format!("shader '{}' has no entry point", desc.label));
                }
            }
            ResourceDesc::Pipeline(desc) => {
                if let PipelineStages::Render {
                    vertex_stride,
                    attributes,
                    ..
                } = &desc.stages
                {
                    for attribute in attributes {
                        if attribute.offset + attribute.format.size() > *vertex_stride {
                            return invalid(format!(
                                "pipeline '{}' attribute {} overruns the vertex stride",
                                desc.label, attribute.location
                            ));
                        }
                    }
                }
            }
            ResourceDesc::Framebuffer(desc) => {
                if desc.color.is_empty() && desc.depth.is_none() {
                    return invalid(format!("framebuffer '{}' has no attachments", desc.label));
                }
            }
        }
        Ok(())
    }
}

/// Reference to a native object inside one backend instance's side table.
///
/// `epoch` identifies the instance; a reference whose epoch differs from the
/// live instance is stale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativeRef {
    pub backend: BackendType,
    pub epoch: u64,
    pub raw: u64,
}

impl fmt::Display for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.backend, self.epoch, self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Backed by a native object on the live backend.
    Bound,
    /// The live backend could not recreate it; the handle stays valid but
    /// commands using it fail with `InvalidResource`.
    Degraded(String),
}

/// Application-visible view of a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalResource {
    pub handle: ResourceHandle,
    pub kind: ResourceKind,
    pub desc: Arc<ResourceDesc>,
    pub native: Option<NativeRef>,
    pub status: ResourceStatus,
}

impl LogicalResource {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, ResourceStatus::Degraded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader(label: &str) -> ResourceDesc {
        ResourceDesc::Shader(ShaderDesc {
            label: label.into(),
            stage: ShaderStage::Vertex,
            entry_point: "vs_main".into(),
            source: String::new(),
        })
    }

    #[test]
    fn handles_are_allocated_in_creation_order() {
        let first = ResourceHandle::allocate();
        let second = ResourceHandle::allocate();
        assert!(first < second);
        assert_ne!(first.index(), second.index());
    }

    #[test]
    fn pipeline_dependencies_list_its_shaders() {
        let vs = ResourceHandle::allocate();
        let fs = ResourceHandle::allocate();
        let desc = ResourceDesc::Pipeline(PipelineDesc {
            label: "tri".into(),
            stages: PipelineStages::Render {
                vertex: vs,
                fragment: Some(fs),
                vertex_stride: 12,
                attributes: vec![],
                color_format: TextureFormat::Rgba8Unorm,
            },
        });
        assert_eq!(desc.kind(), ResourceKind::Pipeline);
        assert_eq!(desc.dependencies(), vec![vs, fs]);
        assert!(shader("vs").dependencies().is_empty());
    }

    #[test]
    fn validate_rejects_oversized_contents() {
        let desc = ResourceDesc::Buffer(BufferDesc {
            label: "vb".into(),
            size: 4,
            usage: BufferUsage::Vertex,
            contents: Some(vec![0; 8]),
        });
        assert!(matches!(
            desc.validate(),
            Err(GfxError::InvalidDescription { .. })
        ));
    }

    #[test]
    fn validate_rejects_attribute_past_stride() {
        let desc = ResourceDesc::Pipeline(PipelineDesc {
            label: "bad".into(),
            stages: PipelineStages::Render {
                vertex: ResourceHandle::allocate(),
                fragment: None,
                vertex_stride: 8,
                attributes: vec![VertexAttribute {
                    location: 0,
                    offset: 4,
                    format: VertexFormat::Float32x2,
                }],
                color_format: TextureFormat::Rgba8Unorm,
            },
        });
        assert!(desc.validate().is_err());
    }

    #[test]
    fn empty_framebuffer_is_invalid() {
        let desc = ResourceDesc::Framebuffer(FramebufferDesc {
            label: "fb".into(),
            color: vec![],
            depth: None,
        });
        assert!(desc.validate().is_err());
    }
}
