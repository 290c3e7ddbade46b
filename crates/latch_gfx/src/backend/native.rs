//! Native GPU backends driven through wgpu
//!
//! One implementation serves every hardware API: the backend restricts its
//! wgpu instance to the single native API its [`BackendType`] names, so a
//! `Vulkan` backend really talks to the Vulkan driver, `DirectX12` to D3D12
//! and so on. Rendering goes to an offscreen swapchain texture; surface
//! presentation belongs to the window layer.

use super::{check_pass_structure, BackendContext, FrameBracket, RenderBackend};
use crate::{
    BackendType, BufferDesc, BufferUsage, Command, FramebufferDesc, GfxError, NativeRef,
    PipelineDesc, PipelineStages, ResourceDesc, ResourceHandle, ShaderDesc, ShaderStage,
    TextureDesc, TextureFormat, VertexFormat,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SWAPCHAIN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// wgpu backend bits that drive `backend`, if wgpu has a path for it.
pub fn wgpu_backends(backend: BackendType) -> Option<wgpu::Backends> {
    match backend {
        BackendType::Vulkan => Some(wgpu::Backends::VULKAN),
        BackendType::DirectX12 => Some(wgpu::Backends::DX12),
        BackendType::Metal => Some(wgpu::Backends::METAL),
        BackendType::OpenGL | BackendType::OpenGLES | BackendType::WebGL => {
            Some(wgpu::Backends::GL)
        }
        BackendType::WebGPU => Some(wgpu::Backends::BROWSER_WEBGPU),
        BackendType::DirectX11 | BackendType::Software => None,
    }
}

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
    }
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    use wgpu::BufferUsages as U;
    match usage {
        BufferUsage::Vertex => U::VERTEX | U::COPY_DST | U::COPY_SRC,
        BufferUsage::Index => U::INDEX | U::COPY_DST | U::COPY_SRC,
        BufferUsage::Uniform => U::UNIFORM | U::COPY_DST | U::COPY_SRC,
        BufferUsage::Storage => U::STORAGE | U::COPY_DST | U::COPY_SRC,
        BufferUsage::Staging => U::MAP_READ | U::COPY_DST,
    }
}

fn align_to_copy(size: u64) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    size.div_ceil(align) * align
}

/// Whether `len` bytes at `offset` form an aligned write inside a buffer of `size` bytes.
fn write_fits(offset: u64, len: u64, size: u64) -> bool {
    offset % wgpu::COPY_BUFFER_ALIGNMENT == 0
        && len % wgpu::COPY_BUFFER_ALIGNMENT == 0
        && offset.checked_add(len).is_some_and(|end| end <= size)
}

struct Swapchain {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl Swapchain {
    fn new(device: &wgpu::Device, (width, height): (u32, u32)) -> Self {
        let max = device.limits().max_texture_dimension_2d;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("latch swapchain"),
            size: wgpu::Extent3d {
                width: width.clamp(1, max),
                height: height.clamp(1, max),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SWAPCHAIN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

enum GpuObject {
    Buffer {
        buffer: wgpu::Buffer,
        size: u64,
    },
    Texture {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        format: TextureFormat,
        render_target: bool,
    },
    Shader {
        module: wgpu::ShaderModule,
        stage: ShaderStage,
        entry_point: String,
    },
    RenderPipeline(wgpu::RenderPipeline),
    ComputePipeline(wgpu::ComputePipeline),
    Framebuffer {
        color: Vec<ResourceHandle>,
        depth: Option<ResourceHandle>,
    },
}

/// Written from wgpu callbacks, read on the owning thread.
#[derive(Default)]
struct DeviceHealth {
    lost: AtomicBool,
    reason: Mutex<Option<String>>,
    errors: AtomicU64,
}

pub struct WgpuBackend {
    kind: BackendType,
    epoch: u64,
    next_raw: u64,
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    swapchain: Swapchain,
    objects: HashMap<ResourceHandle, GpuObject>,
    bracket: FrameBracket,
    encoder: Option<wgpu::CommandEncoder>,
    pending: Option<wgpu::CommandBuffer>,
    bound_compute: Option<ResourceHandle>,
    health: Arc<DeviceHealth>,
    destroyed: bool,
}

impl WgpuBackend {
    pub fn new(kind: BackendType, ctx: &BackendContext) -> Result<Self, GfxError> {
        let init_failed = |cause: String| GfxError::InitializationFailed {
            backend: kind,
            cause,
        };
        let backends = wgpu_backends(kind)
            .ok_or_else(|| init_failed("wgpu has no driver path for this api".into()))?;

        let flags = if ctx.debug_mode {
            wgpu::InstanceFlags::debugging()
        } else {
            wgpu::InstanceFlags::default()
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            flags,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| init_failed("no compatible adapter".into()))?;
        let adapter_info = adapter.get_info();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("latch device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|err| init_failed(err.to_string()))?;

        let health = Arc::new(DeviceHealth::default());
        let lost = Arc::clone(&health);
        device.set_device_lost_callback(move |reason, message| {
            lost.lost.store(true, Ordering::Release);
            if let Ok(mut slot) = lost.reason.lock() {
                *slot = Some(format!("{reason:?}: {message}"));
            }
        });
        let errors = Arc::clone(&health);
        device.on_uncaptured_error(Box::new(move |error| {
            errors.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(backend = %kind, %error, "uncaptured gpu error");
        }));

        let swapchain = Swapchain::new(&device, ctx.surface_size);
        tracing::info!(
            backend = %kind,
            adapter = %adapter_info.name,
            driver = %adapter_info.driver,
            "wgpu device ready"
        );

        Ok(Self {
            kind,
            epoch: ctx.epoch,
            next_raw: 1,
            adapter_info,
            device,
            queue,
            swapchain,
            objects: HashMap::new(),
            bracket: FrameBracket::default(),
            encoder: None,
            pending: None,
            bound_compute: None,
            health,
            destroyed: false,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn check_lost(&self) -> Result<(), GfxError> {
        if self.destroyed {
            return Err(GfxError::DeviceLost {
                backend: self.kind,
                reason: "backend was destroyed".into(),
            });
        }
        if !self.health.lost.load(Ordering::Acquire) {
            return Ok(());
        }
        let reason = self
            .health
            .reason
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| "device reported lost".into());
        Err(GfxError::DeviceLost {
            backend: self.kind,
            reason,
        })
    }

    fn unsupported(&self, feature: impl Into<String>) -> GfxError {
        GfxError::Unsupported {
            backend: self.kind,
            feature: feature.into(),
        }
    }

    fn build_object(&self, desc: &ResourceDesc) -> Result<GpuObject, GfxError> {
        match desc {
            ResourceDesc::Buffer(buffer) => Ok(self.create_buffer(buffer)),
            ResourceDesc::Texture(texture) => self.create_texture(texture),
            ResourceDesc::Shader(shader) => self.create_shader(shader),
            ResourceDesc::Pipeline(pipeline) => self.create_pipeline(pipeline),
            ResourceDesc::Framebuffer(framebuffer) => self.create_framebuffer(framebuffer),
        }
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GpuObject {
        let size = align_to_copy(desc.size);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size,
            usage: buffer_usages(desc.usage),
            mapped_at_creation: desc.contents.is_some(),
        });
        if let Some(contents) = &desc.contents {
            buffer.slice(..).get_mapped_range_mut()[..contents.len()].copy_from_slice(contents);
            buffer.unmap();
        }
        GpuObject::Buffer { buffer, size }
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<GpuObject, GfxError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(self.unsupported(format!(
                "{}x{} textures (limit {max})",
                desc.width, desc.height
            )));
        }
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuObject::Texture {
            texture,
            view,
            format: desc.format,
            render_target: desc.render_target,
        })
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<GpuObject, GfxError> {
        if matches!(desc.stage, ShaderStage::Mesh | ShaderStage::RayGeneration) {
            return Err(self.unsupported(format!("{:?} shaders", desc.stage)));
        }
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });
        Ok(GpuObject::Shader {
            module,
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
        })
    }

    fn shader(
        &self,
        handle: ResourceHandle,
        stage: ShaderStage,
    ) -> Result<(&wgpu::ShaderModule, &str), GfxError> {
        match self.objects.get(&handle) {
            Some(GpuObject::Shader {
                module,
                stage: found,
                entry_point,
            }) if *found == stage => Ok((module, entry_point.as_str())),
            Some(_) => Err(GfxError::InvalidDescription {
                reason: format!("resource {handle} is not a {stage:?} shader"),
            }),
            None => Err(GfxError::InvalidResource { handle }),
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<GpuObject, GfxError> {
        match &desc.stages {
            PipelineStages::Render {
                vertex,
                fragment,
                vertex_stride,
                attributes,
                color_format,
            } => {
                let (vertex_module, vertex_entry) = self.shader(*vertex, ShaderStage::Vertex)?;
                let attributes: Vec<wgpu::VertexAttribute> = attributes
                    .iter()
                    .map(|attribute| wgpu::VertexAttribute {
                        format: vertex_format(attribute.format),
                        offset: attribute.offset,
                        shader_location: attribute.location,
                    })
                    .collect();
                let buffers = if attributes.is_empty() {
                    Vec::new()
                } else {
                    vec![wgpu::VertexBufferLayout {
                        array_stride: *vertex_stride,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }]
                };
                let targets = [Some(wgpu::ColorTargetState {
                    format: texture_format(*color_format),
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })];
                let fragment = match fragment {
                    Some(handle) => {
                        let (module, entry_point) = self.shader(*handle, ShaderStage::Fragment)?;
                        Some(wgpu::FragmentState {
                            module,
                            entry_point: Some(entry_point),
                            compilation_options: Default::default(),
                            targets: &targets,
                        })
                    }
                    None => None,
                };
                let pipeline = self
                    .device
                    .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some(&desc.label),
                        layout: None,
                        vertex: wgpu::VertexState {
                            module: vertex_module,
                            entry_point: Some(vertex_entry),
                            compilation_options: Default::default(),
                            buffers: &buffers,
                        },
                        primitive: wgpu::PrimitiveState::default(),
                        depth_stencil: None,
                        multisample: wgpu::MultisampleState::default(),
                        fragment,
                        multiview: None,
                        cache: None,
                    });
                Ok(GpuObject::RenderPipeline(pipeline))
            }
            PipelineStages::Compute { shader } => {
                let (module, entry_point) = self.shader(*shader, ShaderStage::Compute)?;
                let pipeline = self
                    .device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(&desc.label),
                        layout: None,
                        module,
                        entry_point: Some(entry_point),
                        compilation_options: Default::default(),
                        cache: None,
                    });
                Ok(GpuObject::ComputePipeline(pipeline))
            }
            PipelineStages::Mesh { .. } => Err(self.unsupported("mesh shading pipelines")),
            PipelineStages::RayTracing { .. } => Err(self.unsupported("ray tracing pipelines")),
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<GpuObject, GfxError> {
        let attachments = desc
            .color
            .iter()
            .map(|handle| (*handle, false))
            .chain(desc.depth.map(|handle| (handle, true)));
        for (handle, want_depth) in attachments {
            match self.objects.get(&handle) {
                Some(GpuObject::Texture {
                    render_target: true,
                    format,
                    ..
                }) if format.is_depth() == want_depth => {}
                Some(_) => {
                    return Err(GfxError::InvalidDescription {
                        reason: format!(
                            "framebuffer '{}' attachment {handle} has the wrong usage or format",
                            desc.label
                        ),
                    })
                }
                None => return Err(GfxError::InvalidResource { handle }),
            }
        }
        Ok(GpuObject::Framebuffer {
            color: desc.color.clone(),
            depth: desc.depth,
        })
    }

    fn buffer(&self, handle: ResourceHandle) -> Result<(&wgpu::Buffer, u64), GfxError> {
        match self.objects.get(&handle) {
            Some(GpuObject::Buffer { buffer, size }) => Ok((buffer, *size)),
            _ => Err(GfxError::InvalidResource { handle }),
        }
    }

    fn texture_view(&self, handle: ResourceHandle) -> Result<&wgpu::TextureView, GfxError> {
        match self.objects.get(&handle) {
            Some(GpuObject::Texture { view, .. }) => Ok(view),
            _ => Err(GfxError::InvalidResource { handle }),
        }
    }

    /// Resolve every handle and check alignment before anything is encoded,
    /// so a rejected sequence leaves the frame's encoder untouched.
    fn validate(&self, commands: &[Command]) -> Result<(), GfxError> {
        check_pass_structure(commands)?;
        let mut in_pass = false;
        let mut compute_bound = self.bound_compute.is_some();
        for command in commands {
            match command {
                Command::BeginPass { target, .. } => {
                    in_pass = true;
                    if let Some(target) = target {
                        self.pass_targets(Some(*target))?;
                    }
                }
                Command::EndPass => in_pass = false,
                Command::SetPipeline(handle) => match (self.objects.get(handle), in_pass) {
                    (Some(GpuObject::RenderPipeline(_)), true) => {}
                    (Some(GpuObject::ComputePipeline(_)), false) => compute_bound = true,
                    _ => return Err(GfxError::InvalidResource { handle: *handle }),
                },
                Command::SetVertexBuffer { buffer, .. } => {
                    self.buffer(*buffer)?;
                }
                Command::Dispatch { .. } if !compute_bound => {
                    return Err(GfxError::InvalidCommand {
                        reason: "dispatch without a bound compute pipeline".into(),
                    });
                }
                Command::WriteBuffer {
                    buffer,
                    offset,
                    data,
                } => {
                    let (_, size) = self.buffer(*buffer)?;
                    let len = data.len() as u64;
                    if !write_fits(*offset, len, size) {
                        return Err(GfxError::InvalidCommand {
                            reason: format!("misaligned or out-of-bounds write to {buffer}"),
                        });
                    }
                }
                Command::CopyBuffer { src, dst, size } => {
                    let (_, src_size) = self.buffer(*src)?;
                    let (_, dst_size) = self.buffer(*dst)?;
                    if size % wgpu::COPY_BUFFER_ALIGNMENT != 0 || *size > src_size.min(dst_size) {
                        return Err(GfxError::InvalidCommand {
                            reason: format!("misaligned or out-of-bounds copy {src} -> {dst}"),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn pass_targets(
        &self,
        target: Option<ResourceHandle>,
    ) -> Result<(Vec<&wgpu::TextureView>, Option<&wgpu::TextureView>), GfxError> {
        let Some(target) = target else {
            return Ok((vec![&self.swapchain.view], None));
        };
        match self.objects.get(&target) {
            Some(GpuObject::Framebuffer { color, depth }) => {
                let color = color
                    .iter()
                    .map(|handle| self.texture_view(*handle))
                    .collect::<Result<Vec<_>, _>>()?;
                let depth = depth.map(|handle| self.texture_view(handle)).transpose()?;
                Ok((color, depth))
            }
            _ => Err(GfxError::InvalidResource { handle: target }),
        }
    }

    fn encode(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        commands: &[Command],
    ) -> Result<(), GfxError> {
        let mut index = 0;
        while index < commands.len() {
            match &commands[index] {
                Command::BeginPass { target, clear } => {
                    let end = commands[index..]
                        .iter()
                        .position(|command| matches!(command, Command::EndPass))
                        .map(|offset| index + offset)
                        .ok_or_else(|| GfxError::InvalidCommand {
                            reason: "render pass left open".into(),
                        })?;
                    self.encode_pass(encoder, *target, *clear, &commands[index + 1..end])?;
                    index = end + 1;
                    continue;
                }
                Command::SetPipeline(handle) => self.bound_compute = Some(*handle),
                Command::Dispatch { x, y, z } => {
                    let pipeline = match self.bound_compute.and_then(|h| self.objects.get(&h)) {
                        Some(GpuObject::ComputePipeline(pipeline)) => pipeline,
                        _ => {
                            return Err(GfxError::InvalidCommand {
                                reason: "dispatch without a bound compute pipeline".into(),
                            })
                        }
                    };
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("latch compute"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(pipeline);
                    pass.dispatch_workgroups(*x, *y, *z);
                }
                Command::WriteBuffer {
                    buffer,
                    offset,
                    data,
                } => {
                    if data.is_empty() {
                        index += 1;
                        continue;
                    }
                    let (target, _) = self.buffer(*buffer)?;
                    // Staged through the encoder so the write stays ordered
                    // with the commands around it.
                    let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("latch upload"),
                        size: data.len() as u64,
                        usage: wgpu::BufferUsages::COPY_SRC,
                        mapped_at_creation: true,
                    });
                    staging.slice(..).get_mapped_range_mut().copy_from_slice(data);
                    staging.unmap();
                    encoder.copy_buffer_to_buffer(&staging, 0, target, *offset, data.len() as u64);
                }
                Command::CopyBuffer { src, dst, size } => {
                    let (src, _) = self.buffer(*src)?;
                    let (dst, _) = self.buffer(*dst)?;
                    encoder.copy_buffer_to_buffer(src, 0, dst, 0, *size);
                }
                // wgpu tracks hazards between passes itself.
                Command::Barrier => {}
                other => {
                    return Err(GfxError::InvalidCommand {
                        reason: format!("'{}' outside a render pass", other.name()),
                    })
                }
            }
            index += 1;
        }
        Ok(())
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: Option<ResourceHandle>,
        clear: Option<[f32; 4]>,
        commands: &[Command],
    ) -> Result<(), GfxError> {
        let (color_views, depth_view) = self.pass_targets(target)?;
        let load = match clear {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
            .iter()
            .map(|&view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment =
            depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: if clear.is_some() {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("latch pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        for command in commands {
            match command {
                Command::SetPipeline(handle) => match self.objects.get(handle) {
                    Some(GpuObject::RenderPipeline(pipeline)) => pass.set_pipeline(pipeline),
                    _ => return Err(GfxError::InvalidResource { handle: *handle }),
                },
                Command::SetVertexBuffer { slot, buffer } => {
                    let (buffer, _) = self.buffer(*buffer)?;
                    pass.set_vertex_buffer(*slot, buffer.slice(..));
                }
                Command::Draw {
                    vertices,
                    instances,
                } => pass.draw(vertices.clone(), instances.clone()),
                other => {
                    return Err(GfxError::InvalidCommand {
                        reason: format!("'{}' inside a render pass", other.name()),
                    })
                }
            }
        }
        Ok(())
    }

    fn release(object: GpuObject) {
        match object {
            GpuObject::Buffer { buffer, .. } => buffer.destroy(),
            GpuObject::Texture { texture, .. } => texture.destroy(),
            _ => {}
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn backend_type(&self) -> BackendType {
        self.kind
    }

    fn create_resource(
        &mut self,
        handle: ResourceHandle,
        desc: &ResourceDesc,
    ) -> Result<NativeRef, GfxError> {
        self.check_lost()?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = self.build_object(desc);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let object = built?;
        if let Some(error) = validation {
            Self::release(object);
            return Err(self.unsupported(format!("{} '{}': {error}", desc.kind(), desc.label())));
        }

        if let Some(previous) = self.objects.insert(handle, object) {
            Self::release(previous);
        }
        let raw = self.next_raw;
        self.next_raw += 1;
        Ok(NativeRef {
            backend: self.kind,
            epoch: self.epoch,
            raw,
        })
    }

    fn destroy_resource(&mut self, handle: ResourceHandle) {
        if let Some(object) = self.objects.remove(&handle) {
            Self::release(object);
        }
        if self.bound_compute == Some(handle) {
            self.bound_compute = None;
        }
    }

    fn begin_frame(&mut self) -> Result<(), GfxError> {
        self.check_lost()?;
        self.bracket.begin()?;
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("latch frame"),
                }),
        );
        Ok(())
    }

    fn record_commands(&mut self, commands: &[Command]) -> Result<(), GfxError> {
        self.check_lost()?;
        self.bracket.require_recording("record_commands")?;
        self.validate(commands)?;
        let mut encoder = self.encoder.take().ok_or(GfxError::OutOfFrame {
            operation: "record_commands",
        })?;
        let result = self.encode(&mut encoder, commands);
        self.encoder = Some(encoder);
        result
    }

    fn end_frame(&mut self) -> Result<(), GfxError> {
        self.check_lost()?;
        self.bracket.end()?;
        self.pending = self.encoder.take().map(wgpu::CommandEncoder::finish);
        Ok(())
    }

    fn present(&mut self) -> Result<(), GfxError> {
        self.bracket.take_for_present()?;
        self.check_lost()?;
        if let Some(commands) = self.pending.take() {
            self.queue.submit(std::iter::once(commands));
        }
        self.check_lost()
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<(), GfxError> {
        if self.destroyed {
            return Ok(());
        }
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        self.queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));

        let deadline = Instant::now() + timeout;
        while !done.load(Ordering::Acquire) {
            self.check_lost()?;
            if Instant::now() >= deadline {
                return Err(GfxError::DeviceLost {
                    backend: self.kind,
                    reason: format!("gpu work did not drain within {timeout:?}"),
                });
            }
            let _ = self.device.poll(wgpu::Maintain::Poll);
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), GfxError> {
        self.check_lost()?;
        let previous = std::mem::replace(&mut self.swapchain, Swapchain::new(&self.device, (width, height)));
        previous.texture.destroy();
        Ok(())
    }

    fn gpu_error_count(&self) -> u64 {
        self.health.errors.load(Ordering::Relaxed)
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.encoder = None;
        self.pending = None;
        self.bound_compute = None;
        for (_, object) in self.objects.drain() {
            Self::release(object);
        }
        self.swapchain.texture.destroy();
        self.device.destroy();
        self.bracket.reset();
        self.destroyed = true;
        tracing::debug!(backend = %self.kind, epoch = self.epoch, "wgpu device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_hardware_api_but_d3d11_maps_to_wgpu() {
        for backend in BackendType::ALL {
            let mapped = wgpu_backends(backend).is_some();
            let expected = !matches!(backend, BackendType::DirectX11 | BackendType::Software);
            assert_eq!(mapped, expected, "{backend}");
        }
    }

    #[test]
    fn buffer_sizes_round_up_to_copy_alignment() {
        assert_eq!(align_to_copy(1), 4);
        assert_eq!(align_to_copy(4), 4);
        assert_eq!(align_to_copy(10), 12);
    }

    #[test]
    fn writes_past_the_end_are_rejected_without_overflow() {
        assert!(write_fits(0, 16, 16));
        assert!(write_fits(12, 4, 16));
        assert!(!write_fits(16, 4, 16));
        assert!(!write_fits(2, 4, 16));
        assert!(!write_fits(u64::MAX - 3, 4, 16));
        assert!(!write_fits(u64::MAX & !3, 8, u64::MAX));
    }
}
