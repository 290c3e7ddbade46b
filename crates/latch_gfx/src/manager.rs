//! Backend manager
//!
//! Owns the single live backend and runs the switch transaction:
//! halt new frames, drain, snapshot, destroy, re-probe, initialize down the
//! restricted chain, replay resources, resume. Frame calls issued while a
//! switch runs wait for it to finish, up to `switch_wait_timeout_ms`.

use crate::backend::{BackendContext, RenderBackend, SurfaceHandle};
use crate::orchestrator::{
    build_candidate_chain, initialize_chain, restricted_chain, ChainDriver,
};
use crate::probe::probe_with_software;
use crate::{
    AdaptivePolicy, AdaptiveRenderer, BackendInfo, BackendRegistry, BackendType, CapabilityProbe,
    CapabilitySet, Command, GfxConfig, GfxError, InitAttempt, LogicalResource, ManagerState,
    Platform, RebindReport, RenderApi, ResourceDesc, ResourceHandle, ResourceRebinder,
    SwitchReason, SystemProbe,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// What a switch request ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchOutcome {
    /// Already live on the requested backend.
    Unchanged,
    /// Another switch was in flight; this request was dropped.
    Coalesced,
    Switched {
        from: BackendType,
        to: BackendType,
        report: RebindReport,
    },
}

impl SwitchOutcome {
    /// Whether `target` is live as a result of this request.
    pub fn reached(&self, target: BackendType, current: Option<BackendType>) -> bool {
        match self {
            SwitchOutcome::Unchanged => current == Some(target),
            SwitchOutcome::Coalesced => false,
            SwitchOutcome::Switched { to, .. } => *to == target,
        }
    }
}

struct Core {
    state: ManagerState,
    backend: Option<Box<dyn RenderBackend>>,
    chain: Vec<BackendType>,
    capabilities: CapabilitySet,
    epoch: u64,
    /// Between a successful `begin_frame` and the matching `present`.
    frame_open: bool,
    /// The open frame was lost; its remaining calls are no-ops.
    frame_dropped: bool,
    /// A switch is waiting for the open frame; new frames wait too.
    halting: bool,
    surface_size: (u32, u32),
    switch_count: u64,
    last_report: Option<RebindReport>,
    last_attempts: Vec<InitAttempt>,
}

impl Core {
    fn backend_mut(&mut self) -> Result<&mut (dyn RenderBackend + 'static), GfxError> {
        self.backend.as_deref_mut().ok_or(GfxError::NotLive)
    }

    fn drop_frame(&mut self) {
        if self.frame_open {
            self.frame_open = false;
            self.frame_dropped = true;
        }
    }
}

struct Shared {
    config: GfxConfig,
    platform: Platform,
    surface: Option<SurfaceHandle>,
    registry: BackendRegistry,
    probe: Box<dyn CapabilityProbe>,
    rebinder: ResourceRebinder,
    core: Mutex<Core>,
    changed: Condvar,
    epochs: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `state` unless the manager has been shut down.
    fn set_state(&self, state: ManagerState) {
        {
            let mut core = self.lock();
            if core.state == ManagerState::Shutdown {
                return;
            }
            core.state = state;
        }
        self.changed.notify_all();
    }

    /// Block until a backend is live. `begin` calls also wait out a switch
    /// that is still letting the open frame finish.
    fn wait_live(&self, begin: bool) -> Result<MutexGuard<'_, Core>, GfxError> {
        let waited = self.config.switch_wait_timeout();
        let (core, wait) = self
            .changed
            .wait_timeout_while(self.lock(), waited, |core| {
                core.state.is_transitional() || (begin && core.halting)
            })
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            return Err(GfxError::SwitchTimeout { waited });
        }
        match core.state {
            ManagerState::Live(_) => Ok(core),
            ManagerState::Exhausted => Err(GfxError::Exhausted {
                attempts: core.last_attempts.clone(),
            }),
            _ => Err(GfxError::NotLive),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut backend) = core.backend.take() {
            tracing::debug!(backend = %backend.backend_type(), "manager dropped without deinit");
            backend.destroy();
        }
        self.rebinder.clear();
    }
}

/// Feeds manager state into the candidate walk and, during a switch,
/// replays resources onto each candidate before accepting it.
struct CascadeDriver<'a> {
    shared: &'a Shared,
    capabilities: &'a CapabilitySet,
    snapshot: Option<&'a [(ResourceHandle, Arc<ResourceDesc>)]>,
    epoch: u64,
}

impl ChainDriver for CascadeDriver<'_> {
    type Accepted = Option<RebindReport>;

    fn on_candidate(&mut self, id: BackendType) {
        tracing::info!(backend = %id, "initializing backend candidate");
        self.shared.set_state(ManagerState::Initializing(id));
    }

    fn context(&mut self, _id: BackendType) -> BackendContext {
        self.epoch = self.shared.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        BackendContext {
            platform: self.shared.platform,
            capabilities: self.capabilities.clone(),
            surface: self.shared.surface,
            surface_size: self.shared.lock().surface_size,
            debug_mode: self.shared.config.debug_mode,
            epoch: self.epoch,
        }
    }

    fn accept(
        &mut self,
        id: BackendType,
        backend: &mut dyn RenderBackend,
    ) -> Result<Option<RebindReport>, GfxError> {
        let Some(snapshot) = self.snapshot else {
            return Ok(None);
        };
        let report = self.shared.rebinder.rebind(snapshot, backend)?;
        if self.shared.config.strict_rebind && !report.is_complete() && !id.is_software() {
            return Err(GfxError::InitializationFailed {
                backend: id,
                cause: format!("{} resources could not be recreated", report.failures.len()),
            });
        }
        Ok(Some(report))
    }
}

pub struct ManagerBuilder {
    config: GfxConfig,
    registry: Option<BackendRegistry>,
    probe: Option<Box<dyn CapabilityProbe>>,
    platform: Option<Platform>,
    surface: Option<SurfaceHandle>,
}

impl ManagerBuilder {
    pub fn registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn probe(mut self, probe: impl CapabilityProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn surface(mut self, surface: SurfaceHandle) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Probe, pick a backend and bring it up.
    pub fn init(self) -> Result<Manager, GfxError> {
        self.config.validate()?;
        let surface_size = self.config.surface_size();
        let shared = Arc::new(Shared {
            platform: self.platform.unwrap_or_else(Platform::current),
            surface: self.surface,
            registry: self.registry.unwrap_or_default(),
            probe: self.probe.unwrap_or_else(|| Box::new(SystemProbe)),
            rebinder: ResourceRebinder::new(),
            core: Mutex::new(Core {
                state: ManagerState::Uninitialized,
                backend: None,
                chain: Vec::new(),
                capabilities: CapabilitySet::default(),
                epoch: 0,
                frame_open: false,
                frame_dropped: false,
                halting: false,
                surface_size,
                switch_count: 0,
                last_report: None,
                last_attempts: Vec::new(),
            }),
            changed: Condvar::new(),
            epochs: AtomicU64::new(0),
            config: self.config,
        });
        let manager = Manager { shared };
        manager.start()?;
        Ok(manager)
    }
}

/// Shared handle to the graphics backend manager.
///
/// Clones refer to the same manager. The live backend is torn down by
/// [`Manager::deinit`] or when the last clone is dropped.
#[derive(Clone)]
pub struct Manager {
    shared: Arc<Shared>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("platform", &self.shared.platform)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Initialize with the system probe and the built-in backends.
    pub fn init(config: GfxConfig) -> Result<Self, GfxError> {
        Self::builder(config).init()
    }

    pub fn builder(config: GfxConfig) -> ManagerBuilder {
        ManagerBuilder {
            config,
            registry: None,
            probe: None,
            platform: None,
            surface: None,
        }
    }

    fn start(&self) -> Result<(), GfxError> {
        let shared = &*self.shared;
        let config = &shared.config;
        shared.set_state(ManagerState::Probing);

        let capabilities = probe_with_software(&*shared.probe, shared.platform);
        let chain = build_candidate_chain(
            &shared.registry,
            shared.platform,
            &capabilities,
            config.preferred_backend,
            config.debug_mode,
        );
        tracing::info!(platform = %shared.platform, chain = ?chain, "candidate chain built");

        let candidates = if config.auto_fallback {
            chain.clone()
        } else {
            let requested = config.preferred_backend.unwrap_or_else(|| {
                shared
                    .registry
                    .chain_for(shared.platform)
                    .first()
                    .copied()
                    .unwrap_or(BackendType::Software)
            });
            if let Some(descriptor) = shared.registry.get(requested) {
                if let Err(err) = capabilities.check(requested, &descriptor.requirements) {
                    shared.set_state(ManagerState::Exhausted);
                    return Err(GfxError::InitializationFailed {
                        backend: requested,
                        cause: err.to_string(),
                    });
                }
            }
            vec![requested]
        };

        {
            let mut core = shared.lock();
            core.chain = chain;
            core.capabilities = capabilities.clone();
        }

        let mut driver = CascadeDriver {
            shared,
            capabilities: &capabilities,
            snapshot: None,
            epoch: 0,
        };
        let result = initialize_chain(
            &shared.registry,
            &candidates,
            &capabilities,
            config.init_timeout(),
            &mut driver,
        );
        let epoch = driver.epoch;

        let mut core = shared.lock();
        match result {
            Ok(success) => {
                tracing::info!(
                    backend = %success.id,
                    device = %capabilities.device_name,
                    failed_candidates = success.attempts.len(),
                    "graphics backend live"
                );
                core.backend = Some(success.backend);
                core.state = ManagerState::Live(success.id);
                core.epoch = epoch;
                core.last_attempts = success.attempts;
                drop(core);
                shared.changed.notify_all();
                Ok(())
            }
            Err(GfxError::Exhausted { attempts }) if !config.auto_fallback => {
                core.state = ManagerState::Exhausted;
                let failure = attempts
                    .first()
                    .map(|attempt| GfxError::InitializationFailed {
                        backend: attempt.backend,
                        cause: attempt.cause.clone(),
                    })
                    .unwrap_or(GfxError::NotLive);
                core.last_attempts = attempts;
                tracing::error!(error = %failure, "requested backend failed and fallback is disabled");
                Err(failure)
            }
            Err(err) => {
                core.state = ManagerState::Exhausted;
                if let GfxError::Exhausted { attempts } = &err {
                    core.last_attempts = attempts.clone();
                }
                tracing::error!(error = %err, "graphics initialization exhausted");
                Err(err)
            }
        }
    }

    /// Consumer handle forwarding to whichever backend is live.
    pub fn primary_backend(&self) -> BackendHandle {
        BackendHandle {
            manager: self.clone(),
        }
    }

    pub fn create_adaptive_renderer(&self, policy: AdaptivePolicy) -> AdaptiveRenderer {
        AdaptiveRenderer::new(self.clone(), policy)
    }

    pub fn config(&self) -> &GfxConfig {
        &self.shared.config
    }

    pub fn platform(&self) -> Platform {
        self.shared.platform
    }

    pub fn state(&self) -> ManagerState {
        self.shared.lock().state
    }

    pub fn is_switching(&self) -> bool {
        let core = self.shared.lock();
        core.state.is_transitional() || core.halting
    }

    pub fn current_backend(&self) -> Option<BackendType> {
        self.state().live_backend()
    }

    pub fn backend_info(&self) -> Option<BackendInfo> {
        let core = self.shared.lock();
        core.state.live_backend().map(|id| BackendInfo {
            id,
            capabilities: core.capabilities.clone(),
            platform: self.shared.platform,
            epoch: core.epoch,
        })
    }

    /// Candidate chain computed at init.
    pub fn candidate_chain(&self) -> Vec<BackendType> {
        self.shared.lock().chain.clone()
    }

    /// The chain entry after the live backend.
    pub fn next_candidate(&self) -> Option<BackendType> {
        let core = self.shared.lock();
        let current = core.state.live_backend()?;
        match core.chain.iter().position(|&id| id == current) {
            Some(index) => core.chain.get(index + 1).copied(),
            None if current.is_software() => None,
            None => Some(BackendType::Software),
        }
    }

    pub fn switch_count(&self) -> u64 {
        self.shared.lock().switch_count
    }

    pub fn last_rebind_report(&self) -> Option<RebindReport> {
        self.shared.lock().last_report.clone()
    }

    /// GPU errors reported by the live backend instance.
    pub fn gpu_error_count(&self) -> u64 {
        self.shared
            .lock()
            .backend
            .as_ref()
            .map_or(0, |backend| backend.gpu_error_count())
    }

    pub fn resolve(&self, handle: ResourceHandle) -> Option<LogicalResource> {
        self.shared.rebinder.resolve(handle)
    }

    pub fn resource_count(&self) -> usize {
        self.shared.rebinder.len()
    }

    /// Switch to `id`. Returns whether `id` is live afterwards; failures are
    /// logged. See [`Manager::switch_to`] for the details.
    pub fn switch_backend(&self, id: BackendType) -> bool {
        match self.switch_to(id) {
            Ok(outcome) => outcome.reached(id, self.current_backend()),
            Err(err) => {
                tracing::error!(target_backend = %id, error = %err, "backend switch failed");
                false
            }
        }
    }

    /// Run the switch transaction towards `target`.
    ///
    /// If the target cannot be brought up the rest of its chain is tried,
    /// ending in software. Only [`GfxError::Exhausted`] leaves the manager
    /// without a backend.
    pub fn switch_to(&self, target: BackendType) -> Result<SwitchOutcome, GfxError> {
        self.switch_for(target, SwitchReason::Explicit)
    }

    pub(crate) fn switch_for(
        &self,
        target: BackendType,
        reason: SwitchReason,
    ) -> Result<SwitchOutcome, GfxError> {
        let shared = &*self.shared;
        let drain = shared.config.drain_timeout();

        let (current, old) = {
            let core = shared.lock();
            let current = match core.state {
                ManagerState::Live(current) => current,
                state if state.is_transitional() => return Ok(SwitchOutcome::Coalesced),
                ManagerState::Exhausted => {
                    return Err(GfxError::Exhausted {
                        attempts: core.last_attempts.clone(),
                    })
                }
                _ => return Err(GfxError::NotLive),
            };
            if core.halting {
                return Ok(SwitchOutcome::Coalesced);
            }
            // A lost device is rebuilt even when it is already the target.
            if current == target && reason != SwitchReason::DeviceLost {
                return Ok(SwitchOutcome::Unchanged);
            }

            let mut core = core;
            core.halting = true;
            let (mut core, wait) = shared
                .changed
                .wait_timeout_while(core, drain, |core| core.frame_open)
                .unwrap_or_else(PoisonError::into_inner);
            core.halting = false;
            if core.state == ManagerState::Shutdown {
                drop(core);
                shared.changed.notify_all();
                return Err(GfxError::NotLive);
            }
            if wait.timed_out() {
                tracing::warn!(backend = %current, "abandoning the open frame for a switch");
                core.drop_frame();
            }
            core.state = ManagerState::SwitchingOut(current);
            let old = core.backend.take();
            drop(core);
            shared.changed.notify_all();
            (current, old)
        };

        tracing::info!(from = %current, to = %target, ?reason, "switching backend");
        if let Some(mut old) = old {
            if let Err(err) = old.wait_idle(drain) {
                tracing::warn!(backend = %current, error = %err, "drain failed, treating as device loss");
            }
            old.destroy();
        }
        shared.rebinder.invalidate_natives();
        let snapshot = shared.rebinder.snapshot();

        let capabilities = probe_with_software(&*shared.probe, shared.platform);
        let chain = shared.lock().chain.clone();
        let candidates = restricted_chain(target, current, &chain);

        let mut driver = CascadeDriver {
            shared,
            capabilities: &capabilities,
            snapshot: Some(&snapshot),
            epoch: 0,
        };
        let result = initialize_chain(
            &shared.registry,
            &candidates,
            &capabilities,
            shared.config.init_timeout(),
            &mut driver,
        );
        let epoch = driver.epoch;

        let mut core = shared.lock();
        if core.state == ManagerState::Shutdown {
            drop(core);
            if let Ok(mut success) = result {
                tracing::warn!(backend = %success.id, "manager shut down during switch, discarding backend");
                success.backend.destroy();
            }
            shared.rebinder.clear();
            shared.changed.notify_all();
            return Err(GfxError::NotLive);
        }
        let outcome = match result {
            Ok(success) => {
                let report = success.accepted.unwrap_or(RebindReport {
                    backend: success.id,
                    rebound: 0,
                    failures: Vec::new(),
                });
                core.backend = Some(success.backend);
                core.state = ManagerState::Live(success.id);
                core.epoch = epoch;
                core.capabilities = capabilities;
                core.switch_count += 1;
                core.last_report = Some(report.clone());
                core.last_attempts = success.attempts;
                tracing::info!(
                    from = %current,
                    to = %success.id,
                    rebound = report.rebound,
                    degraded = report.failures.len(),
                    "backend switch complete"
                );
                Ok(SwitchOutcome::Switched {
                    from: current,
                    to: success.id,
                    report,
                })
            }
            Err(err) => {
                core.state = ManagerState::Exhausted;
                if let GfxError::Exhausted { attempts } = &err {
                    core.last_attempts = attempts.clone();
                }
                shared.rebinder.invalidate_natives();
                tracing::error!(from = %current, error = %err, "backend switch exhausted every candidate");
                Err(err)
            }
        };
        drop(core);
        shared.changed.notify_all();
        outcome
    }

    /// Recover from device loss on `lost` by moving to the next candidate.
    pub(crate) fn switch_after_loss(&self, lost: BackendType) -> Result<SwitchOutcome, GfxError> {
        let target = self.next_candidate().unwrap_or(BackendType::Software);
        tracing::warn!(backend = %lost, next = %target, "recovering from device loss");
        self.switch_for(target, SwitchReason::DeviceLost)
    }

    fn recover(&self, result: Result<(), GfxError>) -> Result<(), GfxError> {
        match result {
            Err(GfxError::DeviceLost { backend, reason }) if self.shared.config.auto_fallback => {
                tracing::warn!(%backend, %reason, "DeviceLost");
                self.switch_after_loss(backend).map(|_| ())
            }
            other => other,
        }
    }

    pub(crate) fn create_resource_raw(&self, desc: ResourceDesc) -> Result<ResourceHandle, GfxError> {
        desc.validate()?;
        let rebinder = &self.shared.rebinder;
        let mut core = self.shared.wait_live(false)?;
        if let Some(handle) = rebinder.acquire_existing(&desc) {
            tracing::trace!(%handle, "reusing identical resource");
            return Ok(handle);
        }
        if let Some(handle) = desc
            .dependencies()
            .into_iter()
            .find(|dependency| !rebinder.contains(*dependency))
        {
            return Err(GfxError::InvalidResource { handle });
        }

        let handle = ResourceHandle::allocate();
        match core.backend_mut()?.create_resource(handle, &desc) {
            Ok(native) => {
                tracing::debug!(%handle, kind = %desc.kind(), label = desc.label(), %native, "resource created");
                rebinder.insert(handle, Arc::new(desc), native);
                Ok(handle)
            }
            Err(err) => {
                if err.is_device_lost() {
                    core.drop_frame();
                }
                Err(err)
            }
        }
    }

    /// Create a logical resource on the live backend, or take another
    /// reference to an identical one.
    pub fn create_resource(&self, desc: ResourceDesc) -> Result<ResourceHandle, GfxError> {
        match self.create_resource_raw(desc.clone()) {
            Err(GfxError::DeviceLost { backend, reason }) if self.shared.config.auto_fallback => {
                tracing::warn!(%backend, %reason, "DeviceLost");
                self.switch_after_loss(backend)?;
                self.create_resource_raw(desc)
            }
            other => other,
        }
    }

    pub fn destroy_resource(&self, handle: ResourceHandle) -> Result<(), GfxError> {
        let mut core = self.shared.wait_live(false)?;
        if self.shared.rebinder.release(handle)? {
            core.backend_mut()?.destroy_resource(handle);
            tracing::debug!(%handle, "resource released");
        }
        Ok(())
    }

    fn frame_call(
        &self,
        f: impl FnOnce(&mut dyn RenderBackend) -> Result<(), GfxError>,
    ) -> Result<(), GfxError> {
        let mut core = self.shared.wait_live(false)?;
        if core.frame_dropped {
            return Ok(());
        }
        let result = f(core.backend_mut()?);
        if matches!(&result, Err(err) if err.is_device_lost()) {
            core.drop_frame();
            drop(core);
            self.shared.changed.notify_all();
        }
        result
    }

    pub(crate) fn begin_frame_raw(&self) -> Result<(), GfxError> {
        let mut core = self.shared.wait_live(true)?;
        core.frame_dropped = false;
        let result = core.backend_mut()?.begin_frame();
        match &result {
            Ok(()) => core.frame_open = true,
            Err(err) if err.is_device_lost() => core.frame_dropped = true,
            Err(_) => {}
        }
        result
    }

    pub(crate) fn record_commands_raw(&self, commands: &[Command]) -> Result<(), GfxError> {
        self.frame_call(|backend| backend.record_commands(commands))
    }

    pub(crate) fn end_frame_raw(&self) -> Result<(), GfxError> {
        self.frame_call(|backend| backend.end_frame())
    }

    /// Present the open frame. `Ok(false)` means the frame was dropped
    /// after device loss and nothing reached the display.
    pub(crate) fn present_raw(&self) -> Result<bool, GfxError> {
        let mut core = self.shared.wait_live(false)?;
        if core.frame_dropped {
            core.frame_dropped = false;
            return Ok(false);
        }
        let result = core.backend_mut()?.present();
        if result.is_ok() || matches!(&result, Err(err) if err.is_device_lost()) {
            core.frame_open = false;
            drop(core);
            self.shared.changed.notify_all();
        }
        result.map(|()| true)
    }

    pub fn begin_frame(&self) -> Result<(), GfxError> {
        let result = self.begin_frame_raw();
        self.recover(result)
    }

    pub fn record_commands(&self, commands: &[Command]) -> Result<(), GfxError> {
        let result = self.record_commands_raw(commands);
        self.recover(result)
    }

    pub fn end_frame(&self) -> Result<(), GfxError> {
        let result = self.end_frame_raw();
        self.recover(result)
    }

    pub fn present(&self) -> Result<(), GfxError> {
        let result = self.present_raw().map(|_| ());
        self.recover(result)
    }

    /// Recreate the swapchain. The size is remembered for backends created
    /// by later switches.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), GfxError> {
        let (width, height) = (width.max(1), height.max(1));
        let result = {
            let mut core = self.shared.wait_live(false)?;
            core.surface_size = (width, height);
            core.backend_mut()?.resize(width, height)
        };
        self.recover(result)
    }

    /// Destroy the live backend and every logical resource.
    pub fn deinit(&self) {
        let shared = &*self.shared;
        let backend = {
            let (mut core, _) = shared
                .changed
                .wait_timeout_while(shared.lock(), shared.config.switch_wait_timeout(), |core| {
                    core.state.is_transitional()
                })
                .unwrap_or_else(PoisonError::into_inner);
            if core.state == ManagerState::Shutdown {
                return;
            }
            core.state = ManagerState::Shutdown;
            core.frame_open = false;
            core.frame_dropped = false;
            core.halting = false;
            core.backend.take()
        };
        shared.changed.notify_all();

        if let Some(mut backend) = backend {
            let id = backend.backend_type();
            if let Err(err) = backend.wait_idle(shared.config.drain_timeout()) {
                tracing::warn!(backend = %id, error = %err, "drain failed during shutdown");
            }
            backend.destroy();
            tracing::info!(backend = %id, "graphics backend shut down");
        }
        shared.rebinder.clear();
    }
}

/// [`RenderApi`] over the manager's live backend. Device loss is recovered
/// by switching to the next candidate when `auto_fallback` is on.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    manager: Manager,
}

impl BackendHandle {
    pub fn manager(&self) -> &Manager {
        &self.manager
    }
}

impl RenderApi for BackendHandle {
    fn create_resource(&self, desc: ResourceDesc) -> Result<ResourceHandle, GfxError> {
        self.manager.create_resource(desc)
    }

    fn destroy_resource(&self, handle: ResourceHandle) -> Result<(), GfxError> {
        self.manager.destroy_resource(handle)
    }

    fn begin_frame(&self) -> Result<(), GfxError> {
        self.manager.begin_frame()
    }

    fn record_commands(&self, commands: &[Command]) -> Result<(), GfxError> {
        self.manager.record_commands(commands)
    }

    fn end_frame(&self) -> Result<(), GfxError> {
        self.manager.end_frame()
    }

    fn present(&self) -> Result<(), GfxError> {
        self.manager.present()
    }

    fn backend_info(&self) -> Option<BackendInfo> {
        self.manager.backend_info()
    }
}
