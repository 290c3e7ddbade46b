//! End-to-end fallback behaviour with scripted backends

use latch_gfx::orchestrator::build_candidate_chain;
use latch_gfx::testing::{scripted_descriptor, BackendEvent, CallLog, Gate, Script};
use latch_gfx::{
    AdaptivePolicy, BackendRegistry, BackendType, BufferDesc, BufferUsage, CapabilitySet, Command,
    GfxConfig, GfxError, Manager, ManagerState, PipelineDesc, PipelineStages, Platform, RenderApi,
    ResourceDesc, ResourceKind, ResourceStatus, ShaderDesc, ShaderStage, StaticProbe,
    SwitchReason, TextureDesc, TextureFormat, VertexAttribute, VertexFormat,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn registry(scripts: Vec<(BackendType, Script)>, log: &CallLog) -> BackendRegistry {
    scripts
        .into_iter()
        .fold(BackendRegistry::builder(), |builder, (id, script)| {
            builder.register(scripted_descriptor(id, script, log))
        })
        .build()
}

fn caps(apis: &[BackendType]) -> CapabilitySet {
    apis.iter()
        .fold(CapabilitySet::software(), |set, api| set.with_api(*api))
}

fn start(
    config: GfxConfig,
    platform: Platform,
    apis: &[BackendType],
    scripts: Vec<(BackendType, Script)>,
    log: &CallLog,
) -> Result<Manager, GfxError> {
    Manager::builder(config)
        .registry(registry(scripts, log))
        .probe(StaticProbe::new(caps(apis)))
        .platform(platform)
        .init()
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

fn vertex_buffer(label: &str) -> ResourceDesc {
    ResourceDesc::Buffer(BufferDesc {
        label: label.into(),
        size: 48,
        usage: BufferUsage::Vertex,
        contents: Some((0u8..48).collect()),
    })
}

fn shader(label: &str, stage: ShaderStage) -> ResourceDesc {
    ResourceDesc::Shader(ShaderDesc {
        label: label.into(),
        stage,
        entry_point: "main".into(),
        source: "@vertex fn main() {}".into(),
    })
}

/// Collects formatted log output for one thread.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[test]
fn test_every_platform_chain_ends_in_software() {
    let registry = BackendRegistry::with_defaults();
    for platform in Platform::ALL {
        let chain = registry.chain_for(platform);
        assert!(!chain.is_empty());
        assert_eq!(chain.last(), Some(&BackendType::Software), "{platform}");

        let filtered =
            build_candidate_chain(&registry, platform, &CapabilitySet::software(), None, false);
        assert_eq!(filtered, vec![BackendType::Software], "{platform}");
    }
}

#[test]
fn test_incapable_candidate_is_never_initialized() {
    let log = CallLog::default();
    let manager = start(
        GfxConfig::default(),
        Platform::Linux,
        &[BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::default()),
            (BackendType::OpenGL, Script::default()),
        ],
        &log,
    )
    .unwrap();
    assert_eq!(manager.state(), ManagerState::Live(BackendType::OpenGL));
    assert_eq!(log.attempts(), vec![BackendType::OpenGL]);
}

#[test]
fn test_n_failures_land_on_candidate_n_plus_one() {
    let log = CallLog::default();
    let apis = [
        BackendType::DirectX12,
        BackendType::Vulkan,
        BackendType::DirectX11,
        BackendType::OpenGL,
    ];
    let manager = start(
        GfxConfig::default(),
        Platform::Windows,
        &apis,
        vec![
            (BackendType::DirectX12, Script::failing()),
            (BackendType::Vulkan, Script::failing()),
            (BackendType::DirectX11, Script::failing()),
            (BackendType::OpenGL, Script::default()),
        ],
        &log,
    )
    .unwrap();
    assert_eq!(manager.current_backend(), Some(BackendType::OpenGL));
    assert_eq!(log.attempts(), apis.to_vec());
}

#[test]
fn test_preferred_vulkan_absent_resolves_to_opengl() {
    let log = CallLog::default();
    let manager = start(
        GfxConfig::default().with_preferred(BackendType::Vulkan),
        Platform::Linux,
        &[BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::default()),
            (BackendType::OpenGL, Script::default()),
            (BackendType::Software, Script::default()),
        ],
        &log,
    )
    .unwrap();
    assert_eq!(manager.current_backend(), Some(BackendType::OpenGL));
    assert_eq!(
        manager.candidate_chain(),
        vec![BackendType::OpenGL, BackendType::Software]
    );
    assert_eq!(log.inits(BackendType::Vulkan), 0);
}

#[test]
fn test_device_lost_on_d3d12_switches_exactly_once() {
    let log = CallLog::default();
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let manager = start(
        GfxConfig::default(),
        Platform::Windows,
        &[BackendType::DirectX12, BackendType::Vulkan],
        vec![
            (BackendType::DirectX12, Script::default().lose_device_on_present(1)),
            (BackendType::Vulkan, Script::default()),
        ],
        &log,
    )
    .unwrap();
    let renderer = manager.create_adaptive_renderer(AdaptivePolicy::default());
    log.clear();

    tracing::subscriber::with_default(subscriber, || {
        renderer.begin_frame().unwrap();
        renderer.end_frame().unwrap();
        renderer.present().unwrap();
    });

    assert_eq!(manager.switch_count(), 1);
    assert_eq!(renderer.metrics().switch_count, 1);
    assert_eq!(manager.current_backend(), Some(BackendType::Vulkan));
    assert_eq!(log.attempts(), vec![BackendType::Vulkan]);
    assert!(captured.text().contains("DeviceLost"));

    // The next frame runs on the new backend.
    renderer.begin_frame().unwrap();
    renderer.end_frame().unwrap();
    renderer.present().unwrap();
    assert_eq!(
        log.count(|event| *event == BackendEvent::Presented(BackendType::Vulkan)),
        1
    );
}

#[test]
fn test_primary_backend_recovers_from_device_loss() {
    let log = CallLog::default();
    let manager = start(
        GfxConfig::default(),
        Platform::Windows,
        &[BackendType::DirectX12, BackendType::Vulkan],
        vec![
            (BackendType::DirectX12, Script::default().lose_device_on_present(2)),
            (BackendType::Vulkan, Script::default()),
        ],
        &log,
    )
    .unwrap();
    let backend = manager.primary_backend();
    for _ in 0..3 {
        backend.begin_frame().unwrap();
        backend.record_commands(&[Command::Barrier]).unwrap();
        backend.end_frame().unwrap();
        backend.present().unwrap();
    }
    assert_eq!(manager.switch_count(), 1);
    assert_eq!(backend.backend_info().map(|info| info.id), Some(BackendType::Vulkan));
}

#[test]
fn test_device_loss_surfaces_without_auto_fallback() {
    let log = CallLog::default();
    let config = GfxConfig {
        auto_fallback: false,
        ..GfxConfig::default()
    };
    let manager = start(
        config,
        Platform::Linux,
        &[BackendType::Vulkan],
        vec![(BackendType::Vulkan, Script::default().lose_device_on_present(1))],
        &log,
    )
    .unwrap();
    let backend = manager.primary_backend();
    backend.begin_frame().unwrap();
    backend.end_frame().unwrap();
    assert!(matches!(backend.present(), Err(GfxError::DeviceLost { .. })));
    assert_eq!(manager.switch_count(), 0);
}

#[test]
fn test_software_failure_is_exhausted() {
    let log = CallLog::default();
    let result = start(
        GfxConfig::default(),
        Platform::Linux,
        &[BackendType::Vulkan],
        vec![
            (BackendType::Vulkan, Script::failing()),
            (BackendType::Software, Script::failing()),
        ],
        &log,
    );
    match result {
        Err(GfxError::Exhausted { attempts }) => {
            let tried: Vec<_> = attempts.iter().map(|attempt| attempt.backend).collect();
            assert_eq!(tried, vec![BackendType::Vulkan, BackendType::Software]);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn test_without_auto_fallback_only_requested_is_tried() {
    let log = CallLog::default();
    let config = GfxConfig {
        auto_fallback: false,
        preferred_backend: Some(BackendType::Vulkan),
        ..GfxConfig::default()
    };
    let result = start(
        config,
        Platform::Linux,
        &[BackendType::Vulkan, BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::failing()),
            (BackendType::OpenGL, Script::default()),
        ],
        &log,
    );
    assert!(matches!(
        result,
        Err(GfxError::InitializationFailed {
            backend: BackendType::Vulkan,
            ..
        })
    ));
    assert_eq!(log.attempts(), vec![BackendType::Vulkan]);
}

#[test]
fn test_switch_keeps_every_handle_resolvable() {
    let log = CallLog::default();
    let manager = start(
        GfxConfig::default(),
        Platform::Linux,
        &[BackendType::Vulkan, BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::default()),
            (
                BackendType::OpenGL,
                Script::default().unsupported(ResourceKind::Shader),
            ),
        ],
        &log,
    )
    .unwrap();
    let api = manager.primary_backend();

    let vertices = api.create_resource(vertex_buffer("triangle")).unwrap();
    let albedo = api
        .create_resource(ResourceDesc::Texture(TextureDesc {
            label: "albedo".into(),
            width: 64,
            height: 64,
            format: TextureFormat::Rgba8Unorm,
            mip_levels: 1,
            render_target: false,
        }))
        .unwrap();
    let vs = api
        .create_resource(shader("triangle.vs", ShaderStage::Vertex))
        .unwrap();
    let pipeline = api
        .create_resource(ResourceDesc::Pipeline(PipelineDesc {
            label: "triangle".into(),
            stages: PipelineStages::Render {
                vertex: vs,
                fragment: None,
                vertex_stride: 12,
                attributes: vec![VertexAttribute {
                    location: 0,
                    offset: 0,
                    format: VertexFormat::Float32x3,
                }],
                color_format: TextureFormat::Rgba8Unorm,
            },
        }))
        .unwrap();

    assert!(manager.switch_backend(BackendType::OpenGL));
    assert_eq!(manager.current_backend(), Some(BackendType::OpenGL));

    for handle in [vertices, albedo, vs, pipeline] {
        assert!(manager.resolve(handle).is_some(), "{handle} lost");
    }
    assert_eq!(manager.resolve(vertices).unwrap().status, ResourceStatus::Bound);
    assert_eq!(manager.resolve(albedo).unwrap().status, ResourceStatus::Bound);
    assert!(manager.resolve(vs).unwrap().is_degraded());
    assert!(manager.resolve(pipeline).unwrap().is_degraded());

    let report = manager.last_rebind_report().unwrap();
    assert_eq!(report.rebound, 2);
    let degraded: Vec<_> = report.failures.iter().map(|failure| failure.handle).collect();
    assert_eq!(degraded, vec![vs, pipeline]);

    // Whatever the new backend recreated, it received byte-for-byte.
    let original = log.created(BackendType::Vulkan);
    let replayed = log.created(BackendType::OpenGL);
    assert_eq!(replayed.len(), 2);
    for entry in &replayed {
        assert!(original.contains(entry));
    }
}

#[test]
fn test_strict_rebind_moves_past_degrading_candidate() {
    let log = CallLog::default();
    let config = GfxConfig {
        strict_rebind: true,
        ..GfxConfig::default()
    };
    let manager = start(
        config,
        Platform::Linux,
        &[BackendType::Vulkan, BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::default()),
            (
                BackendType::OpenGL,
                Script::default().unsupported(ResourceKind::Buffer),
            ),
            (BackendType::Software, Script::default()),
        ],
        &log,
    )
    .unwrap();
    let handle = manager.create_resource(vertex_buffer("quad")).unwrap();

    assert!(!manager.switch_backend(BackendType::OpenGL));
    assert_eq!(manager.current_backend(), Some(BackendType::Software));
    assert_eq!(manager.resolve(handle).unwrap().status, ResourceStatus::Bound);
    assert_eq!(
        log.count(|event| *event == BackendEvent::Destroyed(BackendType::OpenGL)),
        1
    );
}

#[test]
fn test_concurrent_switch_requests_coalesce() {
    let log = CallLog::default();
    let gate = Gate::new();
    let manager = start(
        GfxConfig::default(),
        Platform::Linux,
        &[BackendType::Vulkan, BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::default()),
            (BackendType::OpenGL, Script::default().gated(&gate)),
        ],
        &log,
    )
    .unwrap();
    let renderer = Arc::new(manager.create_adaptive_renderer(AdaptivePolicy::default()));

    let first = {
        let renderer = Arc::clone(&renderer);
        thread::spawn(move || renderer.request_switch(SwitchReason::SlowFrames))
    };
    wait_until(|| manager.state() == ManagerState::Initializing(BackendType::OpenGL));

    assert!(!renderer.request_switch(SwitchReason::SlowFrames));
    assert!(!renderer.request_switch(SwitchReason::DeviceLost));
    assert!(!manager.switch_backend(BackendType::Software));

    let frame = {
        let renderer = Arc::clone(&renderer);
        thread::spawn(move || renderer.begin_frame())
    };
    gate.open();
    assert!(first.join().unwrap());
    assert_eq!(frame.join().unwrap(), Ok(()));

    assert_eq!(manager.switch_count(), 1);
    assert_eq!(renderer.metrics().switch_count, 1);
    assert_eq!(log.inits(BackendType::OpenGL), 1);
    assert_eq!(log.count(|event| *event == BackendEvent::BeginFrame(BackendType::OpenGL)), 1);
}

#[test]
fn test_stuck_switch_times_out_frame_calls() {
    let log = CallLog::default();
    let gate = Gate::new();
    let config = GfxConfig {
        switch_wait_timeout_ms: 30,
        ..GfxConfig::default()
    };
    let manager = start(
        config,
        Platform::Linux,
        &[BackendType::Vulkan, BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::default()),
            (BackendType::OpenGL, Script::default().gated(&gate)),
        ],
        &log,
    )
    .unwrap();

    let switcher = {
        let manager = manager.clone();
        thread::spawn(move || manager.switch_backend(BackendType::OpenGL))
    };
    wait_until(|| manager.is_switching());

    let result = manager.begin_frame();
    assert!(matches!(result, Err(GfxError::SwitchTimeout { .. })));
    assert!(result.unwrap_err().is_fatal());

    gate.open();
    assert!(switcher.join().unwrap());
}

#[test]
fn test_switch_finishing_after_deinit_stays_shut_down() {
    let log = CallLog::default();
    let gate = Gate::new();
    let config = GfxConfig {
        switch_wait_timeout_ms: 30,
        ..GfxConfig::default()
    };
    let manager = start(
        config,
        Platform::Linux,
        &[BackendType::Vulkan, BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::default()),
            (BackendType::OpenGL, Script::default().gated(&gate)),
        ],
        &log,
    )
    .unwrap();
    let handle = manager.create_resource(vertex_buffer("quad")).unwrap();

    let switcher = {
        let manager = manager.clone();
        thread::spawn(move || manager.switch_to(BackendType::OpenGL))
    };
    wait_until(|| manager.state() == ManagerState::Initializing(BackendType::OpenGL));

    manager.deinit();
    assert_eq!(manager.state(), ManagerState::Shutdown);

    gate.open();
    assert_eq!(switcher.join().unwrap(), Err(GfxError::NotLive));

    assert_eq!(manager.state(), ManagerState::Shutdown);
    assert_eq!(manager.current_backend(), None);
    assert!(manager.resolve(handle).is_none());
    assert_eq!(manager.resource_count(), 0);
    assert_eq!(log.inits(BackendType::OpenGL), 1);
    assert_eq!(
        log.count(|event| *event == BackendEvent::Destroyed(BackendType::OpenGL)),
        1
    );
    assert!(matches!(manager.begin_frame(), Err(GfxError::NotLive)));
}

#[test]
fn test_drain_timeout_does_not_block_switch() {
    let log = CallLog::default();
    let config = GfxConfig {
        drain_timeout_ms: 10,
        ..GfxConfig::default()
    };
    let manager = start(
        config,
        Platform::Linux,
        &[BackendType::Vulkan, BackendType::OpenGL],
        vec![
            (BackendType::Vulkan, Script::default().drain_hangs()),
            (BackendType::OpenGL, Script::default()),
        ],
        &log,
    )
    .unwrap();
    assert!(manager.switch_backend(BackendType::OpenGL));
    assert_eq!(
        log.count(|event| *event == BackendEvent::Destroyed(BackendType::Vulkan)),
        1
    );
}

#[test]
fn test_misuse_is_out_of_frame() {
    let log = CallLog::default();
    let manager = start(
        GfxConfig::default(),
        Platform::Linux,
        &[],
        vec![(BackendType::Software, Script::default())],
        &log,
    )
    .unwrap();
    let api = manager.primary_backend();
    assert!(matches!(
        api.record_commands(&[Command::Barrier]),
        Err(GfxError::OutOfFrame { .. })
    ));
    assert!(matches!(api.end_frame(), Err(GfxError::OutOfFrame { .. })));
    api.begin_frame().unwrap();
    assert!(matches!(api.begin_frame(), Err(GfxError::OutOfFrame { .. })));
    assert!(matches!(api.present(), Err(GfxError::OutOfFrame { .. })));
}

#[test]
fn test_identical_descriptions_are_deduplicated() {
    let log = CallLog::default();
    let manager = start(
        GfxConfig::default(),
        Platform::Linux,
        &[],
        vec![(BackendType::Software, Script::default())],
        &log,
    )
    .unwrap();
    let first = manager.create_resource(vertex_buffer("quad")).unwrap();
    let second = manager.create_resource(vertex_buffer("quad")).unwrap();
    let other = manager.create_resource(vertex_buffer("other")).unwrap();
    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(log.created(BackendType::Software).len(), 2);

    manager.destroy_resource(first).unwrap();
    assert!(manager.resolve(first).is_some());
    manager.destroy_resource(first).unwrap();
    assert!(manager.resolve(first).is_none());
    assert_eq!(
        manager.destroy_resource(first),
        Err(GfxError::InvalidResource { handle: first })
    );
}

#[test]
fn test_software_backend_renders_end_to_end() {
    let manager = Manager::builder(GfxConfig::default())
        .probe(StaticProbe::software_only())
        .platform(Platform::Linux)
        .init()
        .unwrap();
    assert_eq!(manager.current_backend(), Some(BackendType::Software));

    let renderer = manager.create_adaptive_renderer(AdaptivePolicy::default());
    let vertices = renderer.create_resource(vertex_buffer("triangle")).unwrap();
    let vs = renderer
        .create_resource(shader("triangle.vs", ShaderStage::Vertex))
        .unwrap();
    let pipeline = renderer
        .create_resource(ResourceDesc::Pipeline(PipelineDesc {
            label: "triangle".into(),
            stages: PipelineStages::Render {
                vertex: vs,
                fragment: None,
                vertex_stride: 12,
                attributes: Vec::new(),
                color_format: TextureFormat::Rgba8Unorm,
            },
        }))
        .unwrap();

    for _ in 0..3 {
        renderer.begin_frame().unwrap();
        renderer
            .record_commands(&[
                Command::BeginPass {
                    target: None,
                    clear: Some([0.1, 0.2, 0.3, 1.0]),
                },
                Command::SetPipeline(pipeline),
                Command::SetVertexBuffer {
                    slot: 0,
                    buffer: vertices,
                },
                Command::Draw {
                    vertices: 0..3,
                    instances: 0..1,
                },
                Command::EndPass,
            ])
            .unwrap();
        renderer.end_frame().unwrap();
        renderer.present().unwrap();
    }
    let metrics = renderer.metrics();
    assert_eq!(metrics.frames, 3);
    assert_eq!(metrics.backend, Some(BackendType::Software));
    assert_eq!(renderer.samples().len(), 3);

    manager.deinit();
    assert_eq!(manager.state(), ManagerState::Shutdown);
    assert!(renderer.backend_info().is_none());
}
