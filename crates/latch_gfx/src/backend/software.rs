//! CPU software rasterizer backend
//!
//! The backend of last resort: it never needs a driver, so it is the tail of
//! every candidate chain. Framebuffers are plain RGBA8 byte arrays. Clears,
//! buffer uploads and copies execute on the CPU; draws are validated and
//! accounted but shading stays with the GPU backends. Compute, mesh and ray
//! tracing work is reported unsupported so resources that need it degrade
//! when the application falls back here.

use super::{check_pass_structure, BackendContext, FrameBracket, RenderBackend};
use crate::{
    BackendType, BufferUsage, Command, GfxError, NativeRef, PipelineStages, ResourceDesc,
    ResourceHandle, ShaderStage, TextureFormat,
};
use std::collections::HashMap;
use std::time::Duration;

/// Largest texture edge the rasterizer accepts.
pub const MAX_TEXTURE_SIZE: u32 = 8192;
/// Largest buffer the rasterizer will allocate, in bytes.
pub const MAX_BUFFER_SIZE: u64 = 256 << 20;

/// Counters accumulated since the backend was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub frames_presented: u64,
    pub passes: u64,
    pub draw_calls: u64,
    pub vertices: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone)]
struct Image {
    width: u32,
    height: u32,
    format: TextureFormat,
    pixels: Vec<u8>,
}

impl Image {
    fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel() as usize;
        Self {
            width,
            height,
            format,
            pixels: vec![0; len],
        }
    }

    fn clear(&mut self, color: [f32; 4]) {
        let texel: [u8; 4] = match self.format {
            TextureFormat::Depth32Float => 1.0f32.to_le_bytes(),
            TextureFormat::Bgra8Unorm => [
                unorm8(color[2]),
                unorm8(color[1]),
                unorm8(color[0]),
                unorm8(color[3]),
            ],
            _ => [
                unorm8(color[0]),
                unorm8(color[1]),
                unorm8(color[2]),
                unorm8(color[3]),
            ],
        };
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&texel);
        }
    }
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[derive(Debug)]
enum SoftObject {
    Buffer { data: Vec<u8>, usage: BufferUsage },
    Texture { image: Image, render_target: bool },
    Shader { stage: ShaderStage },
    Pipeline,
    Framebuffer {
        color: Vec<ResourceHandle>,
        depth: Option<ResourceHandle>,
    },
}

pub struct SoftwareBackend {
    epoch: u64,
    next_raw: u64,
    debug: bool,
    objects: HashMap<ResourceHandle, SoftObject>,
    bracket: FrameBracket,
    back: Image,
    front: Image,
    stats: SoftwareStats,
    destroyed: bool,
}

impl SoftwareBackend {
    pub fn new(ctx: &BackendContext) -> Self {
        let (width, height) = clamp_size(ctx.surface_size);
        tracing::debug!(width, height, epoch = ctx.epoch, "software rasterizer created");
        Self {
            epoch: ctx.epoch,
            next_raw: 1,
            debug: ctx.debug_mode,
            objects: HashMap::new(),
            bracket: FrameBracket::default(),
            back: Image::new(width, height, TextureFormat::Rgba8Unorm),
            front: Image::new(width, height, TextureFormat::Rgba8Unorm),
            stats: SoftwareStats::default(),
            destroyed: false,
        }
    }

    pub fn stats(&self) -> SoftwareStats {
        self.stats
    }

    pub fn size(&self) -> (u32, u32) {
        (self.front.width, self.front.height)
    }

    /// Last presented image, RGBA8, row-major.
    pub fn front_buffer(&self) -> &[u8] {
        &self.front.pixels
    }

    /// Current contents of a buffer resource.
    pub fn buffer_contents(&self, handle: ResourceHandle) -> Option<&[u8]> {
        match self.objects.get(&handle) {
            Some(SoftObject::Buffer { data, .. }) => Some(data),
            _ => None,
        }
    }

    fn ensure_alive(&self) -> Result<(), GfxError> {
        if self.destroyed {
            Err(GfxError::DeviceLost {
                backend: BackendType::Software,
                reason: "backend was destroyed".into(),
            })
        } else {
            Ok(())
        }
    }

    fn unsupported(feature: impl Into<String>) -> GfxError {
        GfxError::Unsupported {
            backend: BackendType::Software,
            feature: feature.into(),
        }
    }

    fn build_object(&self, desc: &ResourceDesc) -> Result<SoftObject, GfxError> {
        match desc {
            ResourceDesc::Buffer(buffer) => {
                if buffer.size > MAX_BUFFER_SIZE {
                    return Err(Self::unsupported(format!(
                        "{}-byte buffers",
                        buffer.size
                    )));
                }
                let mut data = vec![0; buffer.size as usize];
                if let Some(contents) = &buffer.contents {
                    data[..contents.len()].copy_from_slice(contents);
                }
                Ok(SoftObject::Buffer {
                    data,
                    usage: buffer.usage,
                })
            }
            ResourceDesc::Texture(texture) => {
                if texture.width > MAX_TEXTURE_SIZE || texture.height > MAX_TEXTURE_SIZE {
                    return Err(Self::unsupported(format!(
                        "{}x{} textures",
                        texture.width, texture.height
                    )));
                }
                if texture.format == TextureFormat::Rgba16Float {
                    return Err(Self::unsupported("rgba16float textures"));
                }
                Ok(SoftObject::Texture {
                    image: Image::new(texture.width, texture.height, texture.format),
                    render_target: texture.render_target,
                })
            }
            ResourceDesc::Shader(shader) => match shader.stage {
                ShaderStage::Vertex | ShaderStage::Fragment => {
                    Ok(SoftObject::Shader { stage: shader.stage })
                }
                other => Err(Self::unsupported(format!("{other:?} shaders"))),
            },
            ResourceDesc::Pipeline(pipeline) => match &pipeline.stages {
                PipelineStages::Render {
                    vertex, fragment, ..
                } => {
                    self.expect_shader(*vertex, ShaderStage::Vertex)?;
                    if let Some(fragment) = fragment {
                        self.expect_shader(*fragment, ShaderStage::Fragment)?;
                    }
                    Ok(SoftObject::Pipeline)
                }
                PipelineStages::Compute { .. } => Err(Self::unsupported("compute pipelines")),
                PipelineStages::Mesh { .. } => Err(Self::unsupported("mesh shading pipelines")),
                PipelineStages::RayTracing { .. } => {
                    Err(Self::unsupported("ray tracing pipelines"))
                }
            },
            ResourceDesc::Framebuffer(framebuffer) => {
                for attachment in framebuffer.color.iter().chain(framebuffer.depth.iter()) {
                    match self.objects.get(attachment) {
                        Some(SoftObject::Texture {
                            render_target: true,
                            ..
                        }) => {}
                        Some(_) => {
                            return Err(GfxError::InvalidDescription {
                                reason: format!(
                                    "framebuffer '{}' attachment {attachment} is not a render target",
                                    framebuffer.label
                                ),
                            })
                        }
                        None => return Err(GfxError::InvalidResource { handle: *attachment }),
                    }
                }
                Ok(SoftObject::Framebuffer {
                    color: framebuffer.color.clone(),
                    depth: framebuffer.depth,
                })
            }
        }
    }

    fn expect_shader(&self, handle: ResourceHandle, stage: ShaderStage) -> Result<(), GfxError> {
        match self.objects.get(&handle) {
            Some(SoftObject::Shader { stage: found }) if *found == stage => Ok(()),
            Some(_) => Err(GfxError::InvalidDescription {
                reason: format!("resource {handle} is not a {stage:?} shader"),
            }),
            None => Err(GfxError::InvalidResource { handle }),
        }
    }

    fn buffer_len(&self, handle: ResourceHandle) -> Result<u64, GfxError> {
        match self.objects.get(&handle) {
            Some(SoftObject::Buffer { data, .. }) => Ok(data.len() as u64),
            _ => Err(GfxError::InvalidResource { handle }),
        }
    }

    /// Reject the whole sequence before touching any pixel.
    fn validate(&self, commands: &[Command]) -> Result<(), GfxError> {
        check_pass_structure(commands)?;
        let mut pipeline_bound = false;
        for command in commands {
            match command {
                Command::BeginPass {
                    target: Some(target),
                    ..
                } => match self.objects.get(target) {
                    Some(SoftObject::Framebuffer { .. }) => {}
                    _ => return Err(GfxError::InvalidResource { handle: *target }),
                },
                Command::SetPipeline(pipeline) => match self.objects.get(pipeline) {
                    Some(SoftObject::Pipeline) => pipeline_bound = true,
                    _ => return Err(GfxError::InvalidResource { handle: *pipeline }),
                },
                Command::SetVertexBuffer { buffer, .. } => match self.objects.get(buffer) {
                    Some(SoftObject::Buffer {
                        usage: BufferUsage::Vertex,
                        ..
                    }) => {}
                    _ => return Err(GfxError::InvalidResource { handle: *buffer }),
                },
                Command::Draw { .. } if !pipeline_bound => {
                    return Err(GfxError::InvalidCommand {
                        reason: "draw without a bound pipeline".into(),
                    });
                }
                Command::Dispatch { .. } => return Err(Self::unsupported("compute dispatch")),
                Command::WriteBuffer {
                    buffer,
                    offset,
                    data,
                } => {
                    let len = self.buffer_len(*buffer)?;
                    if offset
                        .checked_add(data.len() as u64)
                        .map_or(true, |end| end > len)
                    {
                        return Err(GfxError::InvalidCommand {
                            reason: format!("write past the end of buffer {buffer}"),
                        });
                    }
                }
                Command::CopyBuffer { src, dst, size } => {
                    if *size > self.buffer_len(*src)? || *size > self.buffer_len(*dst)? {
                        return Err(GfxError::InvalidCommand {
                            reason: format!("copy of {size} bytes overruns {src} or {dst}"),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn execute(&mut self, command: &Command) {
        match command {
            Command::BeginPass { target, clear } => {
                self.stats.passes += 1;
                let Some(color) = clear else {
                    return;
                };
                match target {
                    None => self.back.clear(*color),
                    Some(target) => self.clear_framebuffer(*target, *color),
                }
            }
            Command::Draw {
                vertices,
                instances,
            } => {
                self.stats.draw_calls += 1;
                self.stats.vertices += vertices.len() as u64 * instances.len() as u64;
            }
            Command::WriteBuffer {
                buffer,
                offset,
                data,
            } => {
                if let Some(SoftObject::Buffer { data: target, .. }) = self.objects.get_mut(buffer) {
                    let start = *offset as usize;
                    target[start..start + data.len()].copy_from_slice(data);
                    self.stats.bytes_written += data.len() as u64;
                }
            }
            Command::CopyBuffer { src, dst, size } => {
                let bytes = match self.objects.get(src) {
                    Some(SoftObject::Buffer { data, .. }) => data[..*size as usize].to_vec(),
                    _ => return,
                };
                if let Some(SoftObject::Buffer { data, .. }) = self.objects.get_mut(dst) {
                    data[..bytes.len()].copy_from_slice(&bytes);
                    self.stats.bytes_written += bytes.len() as u64;
                }
            }
            Command::EndPass
            | Command::SetPipeline(_)
            | Command::SetVertexBuffer { .. }
            | Command::Dispatch { .. }
            | Command::Barrier => {}
        }
    }

    fn clear_framebuffer(&mut self, framebuffer: ResourceHandle, color: [f32; 4]) {
        let attachments: Vec<ResourceHandle> = match self.objects.get(&framebuffer) {
            Some(SoftObject::Framebuffer { color, depth }) => {
                color.iter().copied().chain(*depth).collect()
            }
            _ => return,
        };
        for attachment in attachments {
            if let Some(SoftObject::Texture { image, .. }) = self.objects.get_mut(&attachment) {
                image.clear(color);
            }
        }
    }
}

fn clamp_size((width, height): (u32, u32)) -> (u32, u32) {
    (
        width.clamp(1, MAX_TEXTURE_SIZE),
        height.clamp(1, MAX_TEXTURE_SIZE),
    )
}

impl RenderBackend for SoftwareBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn create_resource(
        &mut self,
        handle: ResourceHandle,
        desc: &ResourceDesc,
    ) -> Result<NativeRef, GfxError> {
        self.ensure_alive()?;
        let object = self.build_object(desc)?;
        if self.debug {
            tracing::debug!(%handle, kind = %desc.kind(), label = desc.label(), "software resource created");
        }
        self.objects.insert(handle, object);
        let raw = self.next_raw;
        self.next_raw += 1;
        Ok(NativeRef {
            backend: BackendType::Software,
            epoch: self.epoch,
            raw,
        })
    }

    fn destroy_resource(&mut self, handle: ResourceHandle) {
        self.objects.remove(&handle);
    }

    fn begin_frame(&mut self) -> Result<(), GfxError> {
        self.ensure_alive()?;
        self.bracket.begin()
    }

    fn record_commands(&mut self, commands: &[Command]) -> Result<(), GfxError> {
        self.ensure_alive()?;
        self.bracket.require_recording("record_commands")?;
        self.validate(commands)?;
        for command in commands {
            self.execute(command);
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), GfxError> {
        self.ensure_alive()?;
        self.bracket.end()
    }

    fn present(&mut self) -> Result<(), GfxError> {
        self.ensure_alive()?;
        self.bracket.take_for_present()?;
        std::mem::swap(&mut self.back, &mut self.front);
        self.stats.frames_presented += 1;
        Ok(())
    }

    fn wait_idle(&mut self, _timeout: Duration) -> Result<(), GfxError> {
        // Every command already ran synchronously on the calling thread.
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), GfxError> {
        self.ensure_alive()?;
        let (width, height) = clamp_size((width, height));
        self.back = Image::new(width, height, TextureFormat::Rgba8Unorm);
        self.front = Image::new(width, height, TextureFormat::Rgba8Unorm);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.objects.clear();
        self.bracket.reset();
        self.destroyed = true;
        tracing::debug!(epoch = self.epoch, "software rasterizer destroyed");
    }
}
