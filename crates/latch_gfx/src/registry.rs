//! Backend registry
//!
//! Descriptors are fixed when the registry is built. The registry itself is
//! read-only afterwards and can be shared between threads.

use crate::backend::{BackendContext, RenderBackend, SoftwareBackend};
use crate::{BackendType, GfxError, Platform, Requirements};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Brings up one backend instance.
pub type BackendFactory =
    Arc<dyn Fn(&BackendContext) -> Result<Box<dyn RenderBackend>, GfxError> + Send + Sync>;

/// How to recognise, rank and create one backend.
#[derive(Clone)]
pub struct BackendDescriptor {
    pub id: BackendType,
    /// Lower rank is tried earlier. Platforms without a rank never list it.
    pub ranks: BTreeMap<Platform, u8>,
    pub requirements: Requirements,
    pub factory: BackendFactory,
}

impl BackendDescriptor {
    pub fn new<F>(id: BackendType, factory: F) -> Self
    where
        F: Fn(&BackendContext) -> Result<Box<dyn RenderBackend>, GfxError> + Send + Sync + 'static,
    {
        Self {
            id,
            ranks: BTreeMap::new(),
            requirements: Requirements::api(id),
            factory: Arc::new(factory),
        }
    }

    pub fn with_rank(mut self, platform: Platform, rank: u8) -> Self {
        self.ranks.insert(platform, rank);
        self
    }

    /// Rank on every platform whose default chain lists `id`.
    pub fn with_default_ranks(mut self) -> Self {
        for platform in Platform::ALL {
            if let Some(rank) = platform.default_rank(self.id) {
                self.ranks.insert(platform, rank);
            }
        }
        self
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn rank(&self, platform: Platform) -> Option<u8> {
        self.ranks.get(&platform).copied()
    }

    /// The CPU rasterizer. Never fails to initialize.
    pub fn software() -> Self {
        Self::new(BackendType::Software, |ctx| {
            Ok(Box::new(SoftwareBackend::new(ctx)) as Box<dyn RenderBackend>)
        })
        .with_default_ranks()
    }

    /// The built-in descriptor for `id`.
    pub fn builtin(id: BackendType) -> Self {
        match id {
            BackendType::Software => Self::software(),
            BackendType::DirectX11 => Self::new(id, |_| {
                Err(GfxError::InitializationFailed {
                    backend: BackendType::DirectX11,
                    cause: "no Direct3D 11 driver path in this build".into(),
                })
            })
            .with_default_ranks(),
            _ => Self::new(id, move |ctx| native_factory(id, ctx)).with_default_ranks(),
        }
    }
}

#[cfg(all(feature = "wgpu", not(target_arch = "wasm32")))]
fn native_factory(id: BackendType, ctx: &BackendContext) -> Result<Box<dyn RenderBackend>, GfxError> {
    let backend = crate::backend::WgpuBackend::new(id, ctx)?;
    Ok(Box::new(backend))
}

#[cfg(not(all(feature = "wgpu", not(target_arch = "wasm32"))))]
fn native_factory(id: BackendType, _ctx: &BackendContext) -> Result<Box<dyn RenderBackend>, GfxError> {
    Err(GfxError::InitializationFailed {
        backend: id,
        cause: "built without native backends".into(),
    })
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("id", &self.id)
            .field("ranks", &self.ranks)
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: BTreeMap<BackendType, BackendDescriptor>,
}

impl RegistryBuilder {
    /// Add `descriptor`, replacing any earlier one with the same id.
    pub fn register(mut self, descriptor: BackendDescriptor) -> Self {
        if self.descriptors.contains_key(&descriptor.id) {
            tracing::debug!(backend = %descriptor.id, "replacing backend descriptor");
        }
        self.descriptors.insert(descriptor.id, descriptor);
        self
    }

    pub fn build(mut self) -> BackendRegistry {
        self.descriptors
            .entry(BackendType::Software)
            .or_insert_with(BackendDescriptor::software);
        BackendRegistry {
            descriptors: self.descriptors,
        }
    }
}

/// Every backend this process can create. Always contains software.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    descriptors: BTreeMap<BackendType, BackendDescriptor>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BackendRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// All built-in backends with their default ranks.
    pub fn with_defaults() -> Self {
        BackendType::ALL
            .into_iter()
            .fold(Self::builder(), |builder, id| {
                builder.register(BackendDescriptor::builtin(id))
            })
            .build()
    }

    pub fn get(&self, id: BackendType) -> Option<&BackendDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn contains(&self, id: BackendType) -> bool {
        self.descriptors.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = BackendType> + '_ {
        self.descriptors.keys().copied()
    }

    /// Ranked backends for `platform`, best first, software last.
    pub fn chain_for(&self, platform: Platform) -> Vec<BackendType> {
        let mut ranked: Vec<(u8, BackendType)> = self
            .descriptors
            .values()
            .filter(|descriptor| !descriptor.id.is_software())
            .filter_map(|descriptor| descriptor.rank(platform).map(|rank| (rank, descriptor.id)))
            .collect();
        ranked.sort();
        ranked
            .into_iter()
            .map(|(_, id)| id)
            .chain(std::iter::once(BackendType::Software))
            .collect()
    }

    /// Run `id`'s factory on the calling thread.
    pub fn create(
        &self,
        id: BackendType,
        ctx: &BackendContext,
    ) -> Result<Box<dyn RenderBackend>, GfxError> {
        let descriptor = self.get(id).ok_or_else(|| GfxError::InitializationFailed {
            backend: id,
            cause: "backend is not registered".into(),
        })?;
        (descriptor.factory)(ctx)
    }
}
