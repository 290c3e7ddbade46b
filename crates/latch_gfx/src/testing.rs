//! Scripted backends for exercising fallback paths without a GPU
//!
//! A [`ScriptedBackend`] behaves like a well-formed backend but fails where
//! its [`Script`] says so, and records everything it is asked to do in a
//! shared [`CallLog`].

use crate::backend::{check_pass_structure, BackendContext, FrameBracket, RenderBackend};
use crate::{
    BackendDescriptor, BackendType, Command, GfxError, NativeRef, Requirements, ResourceDesc,
    ResourceHandle, ResourceKind,
};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Blocks scripted initialization until opened.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cvar) = &*self.inner;
        *open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (open, cvar) = &*self.inner;
        let guard = open.lock().unwrap_or_else(PoisonError::into_inner);
        let _open = cvar
            .wait_while(guard, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// How a scripted backend misbehaves.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fail_init: bool,
    /// Report device loss on this present (1-based) and stay lost.
    pub lose_device_on_present: Option<u64>,
    /// Report device loss on this `record_commands` call (1-based).
    pub lose_device_on_record: Option<u64>,
    pub unsupported: Vec<ResourceKind>,
    /// `wait_idle` never drains.
    pub drain_hangs: bool,
    pub init_gate: Option<Gate>,
    pub init_delay: Option<Duration>,
}

impl Script {
    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub fn lose_device_on_present(mut self, present: u64) -> Self {
        self.lose_device_on_present = Some(present);
        self
    }

    pub fn lose_device_on_record(mut self, record: u64) -> Self {
        self.lose_device_on_record = Some(record);
        self
    }

    pub fn unsupported(mut self, kind: ResourceKind) -> Self {
        self.unsupported.push(kind);
        self
    }

    pub fn drain_hangs(mut self) -> Self {
        self.drain_hangs = true;
        self
    }

    pub fn gated(mut self, gate: &Gate) -> Self {
        self.init_gate = Some(gate.clone());
        self
    }

    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Initialized {
        backend: BackendType,
        epoch: u64,
        surface_size: (u32, u32),
    },
    InitFailed(BackendType),
    /// `desc` is the JSON encoding of the description the backend received.
    Created { backend: BackendType, handle: ResourceHandle, desc: String },
    Released { backend: BackendType, handle: ResourceHandle },
    BeginFrame(BackendType),
    Recorded { backend: BackendType, commands: usize },
    EndFrame(BackendType),
    Presented(BackendType),
    DeviceLost(BackendType),
    Drained(BackendType),
    Resized { backend: BackendType, width: u32, height: u32 },
    Destroyed(BackendType),
}

/// Shared, append-only record of backend calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    events: Arc<Mutex<Vec<BackendEvent>>>,
}

impl CallLog {
    pub fn push(&self, event: BackendEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, predicate: impl Fn(&BackendEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| predicate(event))
            .count()
    }

    /// Successful initializations of `backend`.
    pub fn inits(&self, backend: BackendType) -> usize {
        self.count(|event| {
            matches!(event, BackendEvent::Initialized { backend: b, .. } if *b == backend)
        })
    }

    /// Every init attempt, successful or not, in order.
    pub fn attempts(&self) -> Vec<BackendType> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BackendEvent::Initialized { backend, .. } | BackendEvent::InitFailed(backend) => {
                    Some(backend)
                }
                _ => None,
            })
            .collect()
    }

    /// Descriptions `backend` was asked to create, in call order.
    pub fn created(&self, backend: BackendType) -> Vec<(ResourceHandle, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BackendEvent::Created {
                    backend: b,
                    handle,
                    desc,
                } if b == backend => Some((handle, desc)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

pub struct ScriptedBackend {
    kind: BackendType,
    epoch: u64,
    script: Script,
    log: CallLog,
    objects: HashMap<ResourceHandle, ResourceKind>,
    bracket: FrameBracket,
    presents: u64,
    records: u64,
    next_raw: u64,
    lost: bool,
    destroyed: bool,
}

impl ScriptedBackend {
    pub fn new(
        kind: BackendType,
        ctx: &BackendContext,
        script: Script,
        log: CallLog,
    ) -> Result<Self, GfxError> {
        if let Some(gate) = &script.init_gate {
            gate.wait();
        }
        if let Some(delay) = script.init_delay {
            std::thread::sleep(delay);
        }
        if script.fail_init {
            log.push(BackendEvent::InitFailed(kind));
            return Err(GfxError::InitializationFailed {
                backend: kind,
                cause: "scripted failure".into(),
            });
        }
        log.push(BackendEvent::Initialized {
            backend: kind,
            epoch: ctx.epoch,
            surface_size: ctx.surface_size,
        });
        Ok(Self {
            kind,
            epoch: ctx.epoch,
            script,
            log,
            objects: HashMap::new(),
            bracket: FrameBracket::default(),
            presents: 0,
            records: 0,
            next_raw: 1,
            lost: false,
            destroyed: false,
        })
    }

    fn check_alive(&self) -> Result<(), GfxError> {
        if self.lost || self.destroyed {
            return Err(GfxError::DeviceLost {
                backend: self.kind,
                reason: "scripted device loss".into(),
            });
        }
        Ok(())
    }
}

/// Descriptor whose factory builds [`ScriptedBackend`]s, ranked like the
/// built-in backend with the same id.
pub fn scripted_descriptor(id: BackendType, script: Script, log: &CallLog) -> BackendDescriptor {
    let log = log.clone();
    BackendDescriptor::new(id, move |ctx| {
        let backend = ScriptedBackend::new(id, ctx, script.clone(), log.clone())?;
        Ok(Box::new(backend) as Box<dyn RenderBackend>)
    })
    .with_default_ranks()
    .with_requirements(Requirements::api(id))
}

impl RenderBackend for ScriptedBackend {
    fn backend_type(&self) -> BackendType {
        self.kind
    }

    fn create_resource(
        &mut self,
        handle: ResourceHandle,
        desc: &ResourceDesc,
    ) -> Result<NativeRef, GfxError> {
        self.check_alive()?;
        if self.script.unsupported.contains(&desc.kind()) {
            return Err(GfxError::Unsupported {
                backend: self.kind,
                feature: format!("{} resources", desc.kind()),
            });
        }
        for dependency in desc.dependencies() {
            if !self.objects.contains_key(&dependency) {
                return Err(GfxError::InvalidResource { handle: dependency });
            }
        }
        let encoded = serde_json::to_string(desc)
            .map_err(|err| GfxError::InvalidDescription { reason: err.to_string() })?;
        self.log.push(BackendEvent::Created {
            backend: self.kind,
            handle,
            desc: encoded,
        });
        self.objects.insert(handle, desc.kind());
        let raw = self.next_raw;
        self.next_raw += 1;
        Ok(NativeRef {
            backend: self.kind,
            epoch: self.epoch,
            raw,
        })
    }

    fn destroy_resource(&mut self, handle: ResourceHandle) {
        if self.objects.remove(&handle).is_some() {
            self.log.push(BackendEvent::Released {
                backend: self.kind,
                handle,
            });
        }
    }

    fn begin_frame(&mut self) -> Result<(), GfxError> {
        self.check_alive()?;
        self.bracket.begin()?;
        self.log.push(BackendEvent::BeginFrame(self.kind));
        Ok(())
    }

    fn record_commands(&mut self, commands: &[Command]) -> Result<(), GfxError> {
        self.check_alive()?;
        self.bracket.require_recording("record_commands")?;
        self.records += 1;
        if self.script.lose_device_on_record == Some(self.records) {
            self.lost = true;
            self.log.push(BackendEvent::DeviceLost(self.kind));
            return self.check_alive();
        }
        check_pass_structure(commands)?;
        for handle in commands.iter().flat_map(Command::resources) {
            if !self.objects.contains_key(&handle) {
                return Err(GfxError::InvalidResource { handle });
            }
        }
        self.log.push(BackendEvent::Recorded {
            backend: self.kind,
            commands: commands.len(),
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), GfxError> {
        self.check_alive()?;
        self.bracket.end()?;
        self.log.push(BackendEvent::EndFrame(self.kind));
        Ok(())
    }

    fn present(&mut self) -> Result<(), GfxError> {
        self.check_alive()?;
        self.bracket.take_for_present()?;
        self.presents += 1;
        if self.script.lose_device_on_present == Some(self.presents) {
            self.lost = true;
            self.log.push(BackendEvent::DeviceLost(self.kind));
            return self.check_alive();
        }
        self.log.push(BackendEvent::Presented(self.kind));
        Ok(())
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<(), GfxError> {
        if self.script.drain_hangs {
            std::thread::sleep(timeout);
            return Err(GfxError::DeviceLost {
                backend: self.kind,
                reason: format!("gpu work did not drain within {timeout:?}"),
            });
        }
        self.log.push(BackendEvent::Drained(self.kind));
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), GfxError> {
        self.check_alive()?;
        self.log.push(BackendEvent::Resized {
            backend: self.kind,
            width,
            height,
        });
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.objects.clear();
        self.bracket.reset();
        self.destroyed = true;
        self.log.push(BackendEvent::Destroyed(self.kind));
    }
}
