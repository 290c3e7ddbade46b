//! Backend-independent resource table
//!
//! Maps every logical handle to its creation description. The native
//! reference column belongs to whichever backend is live and is rewritten
//! wholesale by [`ResourceRebinder::rebind`] after a switch.

use crate::backend::RenderBackend;
use crate::{
    BackendType, GfxError, LogicalResource, NativeRef, ResourceDesc, ResourceHandle,
    ResourceKind, ResourceStatus,
};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entry {
    desc: Arc<ResourceDesc>,
    native: Option<NativeRef>,
    status: ResourceStatus,
    refs: u32,
}

/// A resource the new backend could not recreate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebindFailure {
    pub handle: ResourceHandle,
    pub kind: ResourceKind,
    pub cause: String,
}

/// Result of replaying the table against one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebindReport {
    pub backend: BackendType,
    pub rebound: usize,
    pub failures: Vec<RebindFailure>,
}

impl RebindReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures as [`GfxError::ResourceRebindFailed`] values.
    pub fn errors(&self) -> Vec<GfxError> {
        self.failures
            .iter()
            .map(|failure| GfxError::ResourceRebindFailed {
                handle: failure.handle,
                cause: failure.cause.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct ResourceRebinder {
    entries: DashMap<ResourceHandle, Entry>,
    by_desc: DashMap<Arc<ResourceDesc>, ResourceHandle>,
}

impl ResourceRebinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: ResourceHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Take another reference on the resource created from `desc`, if any.
    pub fn acquire_existing(&self, desc: &ResourceDesc) -> Option<ResourceHandle> {
        let handle = *self.by_desc.get(desc)?;
        let mut entry = self.entries.get_mut(&handle)?;
        entry.refs += 1;
        Some(handle)
    }

    pub fn insert(&self, handle: ResourceHandle, desc: Arc<ResourceDesc>, native: NativeRef) {
        self.by_desc.insert(Arc::clone(&desc), handle);
        self.entries.insert(
            handle,
            Entry {
                desc,
                native: Some(native),
                status: ResourceStatus::Bound,
                refs: 1,
            },
        );
    }

    /// Drop one reference. Returns `Ok(true)` when it was the last and the
    /// entry is gone.
    pub fn release(&self, handle: ResourceHandle) -> Result<bool, GfxError> {
        let removed = {
            let mut entry = self
                .entries
                .get_mut(&handle)
                .ok_or(GfxError::InvalidResource { handle })?;
            entry.refs -= 1;
            entry.refs == 0
        };
        if removed {
            if let Some((_, entry)) = self.entries.remove(&handle) {
                self.by_desc.remove(&entry.desc);
            }
        }
        Ok(removed)
    }

    pub fn resolve(&self, handle: ResourceHandle) -> Option<LogicalResource> {
        self.entries.get(&handle).map(|entry| LogicalResource {
            handle,
            kind: entry.desc.kind(),
            desc: Arc::clone(&entry.desc),
            native: entry.native,
            status: entry.status.clone(),
        })
    }

    /// Every description in creation order.
    pub fn snapshot(&self) -> Vec<(ResourceHandle, Arc<ResourceDesc>)> {
        let mut snapshot: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(&entry.desc)))
            .collect();
        snapshot.sort_by_key(|(handle, _)| *handle);
        snapshot
    }

    /// Forget every native reference. Called once the owning backend is gone.
    pub fn invalidate_natives(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.native = None;
        }
    }

    pub fn degraded(&self) -> Vec<ResourceHandle> {
        let mut handles: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| matches!(entry.status, ResourceStatus::Degraded(_)))
            .map(|entry| *entry.key())
            .collect();
        handles.sort();
        handles
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.by_desc.clear();
    }

    /// Recreate `snapshot` on `backend` in creation order.
    ///
    /// Resources the backend cannot satisfy, and resources built from them,
    /// are marked degraded and reported; the rebind carries on. Device loss
    /// aborts it.
    pub fn rebind(
        &self,
        snapshot: &[(ResourceHandle, Arc<ResourceDesc>)],
        backend: &mut dyn RenderBackend,
    ) -> Result<RebindReport, GfxError> {
        self.invalidate_natives();
        let mut bound = BTreeSet::new();
        let mut report = RebindReport {
            backend: backend.backend_type(),
            rebound: 0,
            failures: Vec::new(),
        };

        for (handle, desc) in snapshot {
            let unavailable = desc
                .dependencies()
                .into_iter()
                .find(|dependency| !bound.contains(dependency));
            let outcome = match unavailable {
                Some(dependency) => Err(format!("depends on unavailable resource {dependency}")),
                None => match backend.create_resource(*handle, desc) {
                    Ok(native) => Ok(native),
                    Err(err) if err.is_device_lost() => return Err(err),
                    Err(err) => Err(err.to_string()),
                },
            };

            let Some(mut entry) = self.entries.get_mut(handle) else {
                // Destroyed since the snapshot was taken.
                if outcome.is_ok() {
                    backend.destroy_resource(*handle);
                }
                continue;
            };
            match outcome {
                Ok(native) => {
                    entry.native = Some(native);
                    entry.status = ResourceStatus::Bound;
                    bound.insert(*handle);
                    report.rebound += 1;
                }
                Err(cause) => {
                    tracing::warn!(
                        %handle,
                        kind = %desc.kind(),
                        backend = %report.backend,
                        %cause,
                        "resource degraded"
                    );
                    entry.native = None;
                    entry.status = ResourceStatus::Degraded(cause.clone());
                    report.failures.push(RebindFailure {
                        handle: *handle,
                        kind: desc.kind(),
                        cause,
                    });
                }
            }
        }

        tracing::info!(
            backend = %report.backend,
            rebound = report.rebound,
            degraded = report.failures.len(),
            "resources rebound"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendContext;
    use crate::testing::{BackendEvent, CallLog, Script, ScriptedBackend};
    use crate::{
        BufferDesc, BufferUsage, CapabilitySet, PipelineDesc, PipelineStages, Platform, ShaderDesc,
        ShaderStage, TextureFormat,
    };

    fn native(raw: u64) -> NativeRef {
        NativeRef {
            backend: BackendType::Vulkan,
            epoch: 1,
            raw,
        }
    }

    fn buffer(label: &str) -> Arc<ResourceDesc> {
        Arc::new(ResourceDesc::Buffer(BufferDesc {
            label: label.into(),
            size: 16,
            usage: BufferUsage::Vertex,
            contents: None,
        }))
    }

    fn scripted(script: Script, log: &CallLog) -> ScriptedBackend {
        let ctx = BackendContext::new(Platform::Linux, CapabilitySet::software());
        ScriptedBackend::new(BackendType::OpenGL, &ctx, script, log.clone()).unwrap()
    }

    #[test]
    fn test_identical_descriptions_share_a_handle() {
        let rebinder = ResourceRebinder::new();
        let handle = ResourceHandle::allocate();
        rebinder.insert(handle, buffer("quad"), native(1));

        assert_eq!(rebinder.acquire_existing(&buffer("quad")), Some(handle));
        assert_eq!(rebinder.acquire_existing(&buffer("other")), None);

        assert_eq!(rebinder.release(handle), Ok(false));
        assert_eq!(rebinder.release(handle), Ok(true));
        assert!(rebinder.resolve(handle).is_none());
        assert_eq!(
            rebinder.release(handle),
            Err(GfxError::InvalidResource { handle })
        );
    }

    #[test]
    fn test_rebind_degrades_dependents_of_unsupported() {
        let rebinder = ResourceRebinder::new();
        let shader = ResourceHandle::allocate();
        let pipeline = ResourceHandle::allocate();
        let vertices = ResourceHandle::allocate();
        rebinder.insert(
            shader,
            Arc::new(ResourceDesc::Shader(ShaderDesc {
                label: "cs".into(),
                stage: ShaderStage::Compute,
                entry_point: "main".into(),
                source: String::new(),
            })),
            native(1),
        );
        rebinder.insert(
            pipeline,
            Arc::new(ResourceDesc::Pipeline(PipelineDesc {
                label: "particles".into(),
                stages: PipelineStages::Compute { shader },
            })),
            native(2),
        );
        rebinder.insert(vertices, buffer("vertices"), native(3));

        let log = CallLog::default();
        let mut backend = scripted(Script::default().unsupported(ResourceKind::Shader), &log);
        let report = rebinder.rebind(&rebinder.snapshot(), &mut backend).unwrap();

        assert_eq!(report.rebound, 1);
        let failed: Vec<_> = report.failures.iter().map(|failure| failure.handle).collect();
        assert_eq!(failed, vec![shader, pipeline]);
        assert_eq!(rebinder.degraded(), vec![shader, pipeline]);

        let resolved = rebinder.resolve(vertices).unwrap();
        assert_eq!(resolved.status, ResourceStatus::Bound);
        assert_eq!(resolved.native.map(|native| native.backend), Some(BackendType::OpenGL));
        assert!(rebinder.resolve(pipeline).unwrap().native.is_none());
    }

    #[test]
    fn test_rebind_replays_in_creation_order() {
        let rebinder = ResourceRebinder::new();
        let handles: Vec<_> = (0..4).map(|_| ResourceHandle::allocate()).collect();
        // Inserted out of order on purpose.
        for (i, handle) in handles.iter().enumerate().rev() {
            rebinder.insert(*handle, buffer(&format!("b{i}")), native(i as u64));
        }

        let log = CallLog::default();
        let mut backend = scripted(Script::default(), &log);
        rebinder.rebind(&rebinder.snapshot(), &mut backend).unwrap();

        let replayed: Vec<_> = log
            .created(BackendType::OpenGL)
            .into_iter()
            .map(|(handle, _)| handle)
            .collect();
        assert_eq!(replayed, handles);
    }

    #[test]
    fn test_device_loss_aborts_rebind() {
        let rebinder = ResourceRebinder::new();
        rebinder.insert(ResourceHandle::allocate(), buffer("a"), native(1));

        let log = CallLog::default();
        let mut backend = scripted(Script::default(), &log);
        backend.destroy();
        let err = rebinder.rebind(&rebinder.snapshot(), &mut backend).unwrap_err();
        assert!(err.is_device_lost());
        assert_eq!(log.count(|event| matches!(event, BackendEvent::Created { .. })), 0);
    }

    #[test]
    fn test_texture_formats_survive_snapshot() {
        let rebinder = ResourceRebinder::new();
        let handle = ResourceHandle::allocate();
        let desc = Arc::new(ResourceDesc::Texture(crate::TextureDesc {
            label: "albedo".into(),
            width: 4,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
            mip_levels: 1,
            render_target: false,
        }));
        rebinder.insert(handle, Arc::clone(&desc), native(1));
        let snapshot = rebinder.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0].1, &desc));
    }
}
