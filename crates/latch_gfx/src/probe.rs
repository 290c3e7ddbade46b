//! Capability probing
//!
//! Probes report which native APIs have a usable driver and what the best
//! device behind them can do. Results are recomputed on every call; the
//! manager probes at init and again before each backend switch.

use crate::{BackendType, Capability, CapabilitySet, Platform};

/// Source of [`CapabilitySet`]s.
pub trait CapabilityProbe: Send + Sync {
    fn probe(&self, platform: Platform) -> CapabilitySet;
}

impl<F> CapabilityProbe for F
where
    F: Fn(Platform) -> CapabilitySet + Send + Sync,
{
    fn probe(&self, platform: Platform) -> CapabilitySet {
        self(platform)
    }
}

/// Run `probe` and add the software rasterizer, which is present everywhere.
pub fn probe_with_software(probe: &dyn CapabilityProbe, platform: Platform) -> CapabilitySet {
    let mut capabilities = probe.probe(platform);
    capabilities.insert(Capability::Api(BackendType::Software));
    if capabilities.max_texture_size == 0 {
        capabilities.max_texture_size = crate::backend::software::MAX_TEXTURE_SIZE;
    }
    tracing::debug!(
        %platform,
        device = %capabilities.device_name,
        apis = ?capabilities.apis().collect::<Vec<_>>(),
        max_texture_size = capabilities.max_texture_size,
        "capabilities probed"
    );
    capabilities
}

/// Always reports the same set. Used for headless runs and tests.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    capabilities: CapabilitySet,
}

impl StaticProbe {
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self { capabilities }
    }

    /// Only the software rasterizer.
    pub fn software_only() -> Self {
        Self::new(CapabilitySet::software())
    }
}

impl CapabilityProbe for StaticProbe {
    fn probe(&self, _platform: Platform) -> CapabilitySet {
        self.capabilities.clone()
    }
}

/// Asks the installed drivers through wgpu adapter enumeration.
///
/// No devices are created. Without the `wgpu` feature, or on wasm where
/// adapters cannot be enumerated synchronously, only software is reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl CapabilityProbe for SystemProbe {
    #[cfg(all(feature = "wgpu", not(target_arch = "wasm32")))]
    fn probe(&self, _platform: Platform) -> CapabilitySet {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let mut capabilities = CapabilitySet::software();
        let mut best: Option<wgpu::AdapterInfo> = None;

        for adapter in instance.enumerate_adapters(wgpu::Backends::all()) {
            let info = adapter.get_info();
            let apis = apis_for(info.backend);
            tracing::debug!(
                adapter = %info.name,
                backend = ?info.backend,
                device_type = ?info.device_type,
                "adapter found"
            );
            if apis.is_empty() {
                continue;
            }
            for api in apis {
                capabilities.insert(Capability::Api(*api));
            }

            let downlevel = adapter.get_downlevel_capabilities();
            if downlevel
                .flags
                .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
            {
                capabilities.insert(Capability::Compute);
            }
            if adapter.features().contains(wgpu::Features::RAY_QUERY) {
                capabilities.insert(Capability::RayTracing);
            }
            let max_texture = adapter.limits().max_texture_dimension_2d;
            capabilities.max_texture_size = capabilities.max_texture_size.max(max_texture);

            let better = match &best {
                None => true,
                Some(current) => {
                    device_type_score(info.device_type) > device_type_score(current.device_type)
                }
            };
            if better {
                best = Some(info);
            }
        }

        if let Some(info) = best {
            capabilities.device_name = info.name;
            capabilities.driver_version = if info.driver_info.is_empty() {
                info.driver
            } else {
                format!("{} {}", info.driver, info.driver_info)
            };
        }
        capabilities
    }

    #[cfg(not(all(feature = "wgpu", not(target_arch = "wasm32"))))]
    fn probe(&self, _platform: Platform) -> CapabilitySet {
        CapabilitySet::software()
    }
}

/// Our API ids served by one wgpu adapter backend. A GL adapter drives both
/// desktop GL and GLES contexts.
#[cfg(all(feature = "wgpu", not(target_arch = "wasm32")))]
fn apis_for(backend: wgpu::Backend) -> &'static [BackendType] {
    match backend {
        wgpu::Backend::Vulkan => &[BackendType::Vulkan],
        wgpu::Backend::Metal => &[BackendType::Metal],
        wgpu::Backend::Dx12 => &[BackendType::DirectX12],
        wgpu::Backend::Gl => &[BackendType::OpenGL, BackendType::OpenGLES],
        wgpu::Backend::BrowserWebGpu => &[BackendType::WebGPU],
        _ => &[],
    }
}

#[cfg(all(feature = "wgpu", not(target_arch = "wasm32")))]
fn device_type_score(device_type: wgpu::DeviceType) -> u8 {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => 4,
        wgpu::DeviceType::IntegratedGpu => 3,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Cpu => 1,
        wgpu::DeviceType::Other => 0,
    }
}
