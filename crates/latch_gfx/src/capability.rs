//! Capability sets reported by probes and required by backend descriptors

use crate::{BackendType, GfxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A named hardware/driver feature gating backend eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// A usable driver for the given native API is installed.
    Api(BackendType),
    Compute,
    RayTracing,
    MeshShaders,
    Instancing,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Api(backend) => write!(f, "{backend} api"),
            Capability::Compute => f.write_str("compute shaders"),
            Capability::RayTracing => f.write_str("ray tracing"),
            Capability::MeshShaders => f.write_str("mesh shaders"),
            Capability::Instancing => f.write_str("instancing"),
        }
    }
}

/// Capability probe result
///
/// Recomputed on every probe and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub capabilities: BTreeSet<Capability>,
    pub max_texture_size: u32,
    pub device_name: String,
    pub driver_version: String,
}

impl CapabilitySet {
    pub fn new(device_name: impl Into<String>, driver_version: impl Into<String>) -> Self {
        Self {
            capabilities: BTreeSet::new(),
            max_texture_size: 0,
            device_name: device_name.into(),
            driver_version: driver_version.into(),
        }
    }

    /// What the CPU rasterizer offers on every platform.
    pub fn software() -> Self {
        Self::new("latch software rasterizer", crate::VERSION)
            .with(Capability::Api(BackendType::Software))
            .with(Capability::Instancing)
            .with_max_texture_size(crate::backend::software::MAX_TEXTURE_SIZE)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_api(self, backend: BackendType) -> Self {
        self.with(Capability::Api(backend))
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.capabilities.remove(&capability);
        self
    }

    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn has_api(&self, backend: BackendType) -> bool {
        self.supports(Capability::Api(backend))
    }

    /// Native APIs reported present.
    pub fn apis(&self) -> impl Iterator<Item = BackendType> + '_ {
        self.capabilities.iter().filter_map(|capability| match capability {
            Capability::Api(backend) => Some(*backend),
            _ => None,
        })
    }

    /// Requirements not covered by this set, described for logging.
    pub fn missing(&self, requirements: &Requirements) -> Vec<String> {
        let mut missing: Vec<String> = requirements
            .capabilities
            .difference(&self.capabilities)
            .map(|capability| capability.to_string())
            .collect();
        if requirements.min_texture_size > self.max_texture_size {
            missing.push(format!(
                "max texture size {} (have {})",
                requirements.min_texture_size, self.max_texture_size
            ));
        }
        missing
    }

    pub fn satisfies(&self, requirements: &Requirements) -> bool {
        requirements.capabilities.is_subset(&self.capabilities)
            && requirements.min_texture_size <= self.max_texture_size
    }

    /// `Ok` when `backend`'s requirements are covered, otherwise
    /// [`GfxError::CapabilityUnavailable`] naming what is missing.
    pub fn check(&self, backend: BackendType, requirements: &Requirements) -> Result<(), GfxError> {
        if self.satisfies(requirements) {
            Ok(())
        } else {
            Err(GfxError::CapabilityUnavailable {
                backend,
                missing: self.missing(requirements),
            })
        }
    }
}

/// Capabilities a backend needs before it is worth initializing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub capabilities: BTreeSet<Capability>,
    pub min_texture_size: u32,
}

impl Requirements {
    pub fn none() -> Self {
        Self::default()
    }

    /// Require a driver for `backend`'s native API.
    pub fn api(backend: BackendType) -> Self {
        Self::none().with(Capability::Api(backend))
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn min_texture_size(mut self, size: u32) -> Self {
        self.min_texture_size = size;
        self
    }
}
