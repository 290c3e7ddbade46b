//! Latch Graphics Runtime
//!
//! Headless driver for the backend manager: brings up the best backend for
//! this machine, renders a vertex-colored triangle for a number of frames,
//! logs adaptive metrics, then forces a switch to the software rasterizer
//! and keeps rendering with the same resource handles.
//!
//! Usage: `latch [config.json] [frames]`

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use latch_gfx::{
    AdaptivePolicy, BackendType, BufferDesc, BufferUsage, Command, GfxConfig, Manager,
    PipelineDesc, PipelineStages, RenderApi, ResourceDesc, ResourceHandle, ShaderDesc,
    ShaderStage, TextureFormat, VertexAttribute, VertexFormat,
};

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct Vertex {
    position: [f32; 2],
    color: [f32; 3],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, 0.5],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [-0.5, -0.5],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [0.5, -0.5],
        color: [0.0, 0.0, 1.0],
    },
];

const TRIANGLE_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) color: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec3<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color, 1.0);
}
"#;

struct Scene {
    vertices: ResourceHandle,
    pipeline: ResourceHandle,
}

fn create_scene(api: &impl RenderApi) -> Result<Scene> {
    let vertices = api.create_resource(ResourceDesc::Buffer(BufferDesc {
        label: "triangle.vertices".into(),
        size: std::mem::size_of_val(&TRIANGLE) as u64,
        usage: BufferUsage::Vertex,
        contents: Some(bytemuck::cast_slice(&TRIANGLE).to_vec()),
    }))?;
    let shader = |stage, entry_point: &str| {
        ResourceDesc::Shader(ShaderDesc {
            label: format!("triangle.{entry_point}"),
            stage,
            entry_point: entry_point.into(),
            source: TRIANGLE_SHADER.into(),
        })
    };
    let vertex = api.create_resource(shader(ShaderStage::Vertex, "vs_main"))?;
    let fragment = api.create_resource(shader(ShaderStage::Fragment, "fs_main"))?;
    let pipeline = api.create_resource(ResourceDesc::Pipeline(PipelineDesc {
        label: "triangle".into(),
        stages: PipelineStages::Render {
            vertex,
            fragment: Some(fragment),
            vertex_stride: std::mem::size_of::<Vertex>() as u64,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    offset: 0,
                    format: VertexFormat::Float32x2,
                },
                VertexAttribute {
                    location: 1,
                    offset: 8,
                    format: VertexFormat::Float32x3,
                },
            ],
            color_format: TextureFormat::Rgba8Unorm,
        },
    }))?;
    Ok(Scene { vertices, pipeline })
}

fn render_frame(api: &impl RenderApi, scene: &Scene) -> Result<()> {
    api.begin_frame()?;
    api.record_commands(&[
        Command::BeginPass {
            target: None,
            clear: Some([0.05, 0.05, 0.08, 1.0]),
        },
        Command::SetPipeline(scene.pipeline),
        Command::SetVertexBuffer {
            slot: 0,
            buffer: scene.vertices,
        },
        Command::Draw {
            vertices: 0..3,
            instances: 0..1,
        },
        Command::EndPass,
    ])?;
    api.end_frame()?;
    api.present()?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => GfxConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => GfxConfig::default(),
    };
    let frames: u64 = match args.next() {
        Some(frames) => frames.parse().context("frame count must be a number")?,
        None => 300,
    };

    tracing::info!("Latch Graphics v{}", latch_gfx::VERSION);
    let manager = Manager::init(config).context("no graphics backend could be initialized")?;
    if let Some(info) = manager.backend_info() {
        tracing::info!(summary = %serde_json::to_string(&info.summary())?, "backend ready");
    }

    let renderer = manager.create_adaptive_renderer(AdaptivePolicy::default());
    let scene = create_scene(&renderer)?;

    for frame in 1..=frames {
        render_frame(&renderer, &scene)?;
        if frame % 60 == 0 {
            let metrics = renderer.metrics();
            tracing::info!(
                frame,
                backend = ?metrics.backend,
                fps = metrics.rolling_fps,
                switches = metrics.switch_count,
                "frame metrics"
            );
        }
    }

    if manager.current_backend() != Some(BackendType::Software) {
        tracing::info!("forcing a switch to the software rasterizer");
        if !manager.switch_backend(BackendType::Software) {
            anyhow::bail!("switch to the software rasterizer failed");
        }
        if let Some(report) = manager.last_rebind_report() {
            tracing::info!(report = %serde_json::to_string(&report)?, "rebind report");
        }
        for _ in 0..10 {
            render_frame(&renderer, &scene)?;
        }
    }

    let metrics = renderer.metrics();
    tracing::info!(
        frames = metrics.frames,
        average_ms = metrics.average_frame_time.as_secs_f64() * 1000.0,
        switches = manager.switch_count(),
        "shutting down"
    );
    manager.deinit();
    Ok(())
}
