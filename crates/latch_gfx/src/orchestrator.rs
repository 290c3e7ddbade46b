//! Candidate selection and the backend state machine
//!
//! ```text
//! Uninitialized -> Probing -> Initializing(c) -> Live(b) -> SwitchingOut(b)
//!                                  ^   |                        |
//!                                  |   +-> Initializing(next)   |
//!                                  +----------------------------+
//!                          ... -> Live | Exhausted;  any -> Shutdown
//! ```

use crate::backend::{BackendContext, RenderBackend};
use crate::{BackendRegistry, BackendType, CapabilitySet, GfxError, InitAttempt, Platform};
use serde::Serialize;
use std::fmt;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManagerState {
    Uninitialized,
    Probing,
    Initializing(BackendType),
    Live(BackendType),
    SwitchingOut(BackendType),
    Exhausted,
    Shutdown,
}

impl ManagerState {
    /// A switch or init is running; frame calls wait for it.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            ManagerState::Probing | ManagerState::Initializing(_) | ManagerState::SwitchingOut(_)
        )
    }

    pub fn live_backend(self) -> Option<BackendType> {
        match self {
            ManagerState::Live(backend) => Some(backend),
            _ => None,
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Uninitialized => f.write_str("uninitialized"),
            ManagerState::Probing => f.write_str("probing"),
            ManagerState::Initializing(backend) => write!(f, "initializing({backend})"),
            ManagerState::Live(backend) => write!(f, "live({backend})"),
            ManagerState::SwitchingOut(backend) => write!(f, "switching-out({backend})"),
            ManagerState::Exhausted => f.write_str("exhausted"),
            ManagerState::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Ordered candidates: the preferred backend when it is capable, then the
/// platform chain filtered by capability, then software.
///
/// Rejections are logged at debug, or info when `verbose`.
pub fn build_candidate_chain(
    registry: &BackendRegistry,
    platform: Platform,
    capabilities: &CapabilitySet,
    preferred: Option<BackendType>,
    verbose: bool,
) -> Vec<BackendType> {
    let mut chain = Vec::new();
    let consider = |id: BackendType, chain: &mut Vec<BackendType>| {
        if id.is_software() || chain.contains(&id) {
            return;
        }
        let Some(descriptor) = registry.get(id) else {
            log_rejection(verbose, id, "not registered");
            return;
        };
        match capabilities.check(id, &descriptor.requirements) {
            Ok(()) => chain.push(id),
            Err(err) => log_rejection(verbose, id, &err.to_string()),
        }
    };

    if let Some(preferred) = preferred {
        consider(preferred, &mut chain);
    }
    for id in registry.chain_for(platform) {
        consider(id, &mut chain);
    }
    chain.push(BackendType::Software);
    chain
}

fn log_rejection(verbose: bool, backend: BackendType, cause: &str) {
    if verbose {
        tracing::info!(%backend, cause, "candidate skipped");
    } else {
        tracing::debug!(%backend, cause, "candidate skipped");
    }
}

/// Candidates for a switch to `target`: the target, then whatever follows
/// it in `chain` (or follows `current` when the target is off-chain), then
/// software.
pub fn restricted_chain(
    target: BackendType,
    current: BackendType,
    chain: &[BackendType],
) -> Vec<BackendType> {
    let anchor = chain
        .iter()
        .position(|&id| id == target)
        .or_else(|| chain.iter().position(|&id| id == current));
    let rest = anchor.map(|index| &chain[index + 1..]).unwrap_or(&[]);

    let mut candidates = vec![target];
    for &id in rest {
        if !candidates.contains(&id) {
            candidates.push(id);
        }
    }
    if !candidates.contains(&BackendType::Software) {
        candidates.push(BackendType::Software);
    }
    candidates
}

/// Run `id`'s factory on a helper thread and wait at most `timeout`.
///
/// A backend that finishes after the deadline is destroyed on the helper.
pub fn initialize_candidate(
    registry: &BackendRegistry,
    id: BackendType,
    ctx: BackendContext,
    timeout: Duration,
) -> Result<Box<dyn RenderBackend>, GfxError> {
    let failed = |cause: String| GfxError::InitializationFailed { backend: id, cause };
    let factory = registry
        .get(id)
        .map(|descriptor| descriptor.factory.clone())
        .ok_or_else(|| failed("backend is not registered".into()))?;

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("latch-init-{id}"))
        .spawn(move || {
            let result = factory(&ctx);
            if let Err(mpsc::SendError(Ok(mut late))) = tx.send(result) {
                tracing::warn!(backend = %id, "initialization finished after its deadline");
                late.destroy();
            }
        })
        .map_err(|err| failed(format!("could not spawn init thread: {err}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            Err(failed(format!("initialization exceeded {timeout:?}")))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(failed("initialization thread panicked".into()))
        }
    }
}

/// Outcome of walking a candidate list.
pub struct ChainSuccess<T> {
    pub backend: Box<dyn RenderBackend>,
    pub id: BackendType,
    pub accepted: T,
    pub attempts: Vec<InitAttempt>,
}

/// Hooks the manager plugs into [`initialize_chain`].
pub trait ChainDriver {
    type Accepted;

    /// Entering `Initializing(id)`.
    fn on_candidate(&mut self, id: BackendType);

    fn context(&mut self, id: BackendType) -> BackendContext;

    /// Last check on a freshly created backend. An error rejects it and the
    /// walk continues.
    fn accept(
        &mut self,
        id: BackendType,
        backend: &mut dyn RenderBackend,
    ) -> Result<Self::Accepted, GfxError>;
}

/// Try `candidates` strictly in order until one initializes and is accepted.
///
/// Every failure is logged and collected; if none succeeds the result is
/// [`GfxError::Exhausted`].
pub fn initialize_chain<D: ChainDriver>(
    registry: &BackendRegistry,
    candidates: &[BackendType],
    capabilities: &CapabilitySet,
    timeout: Duration,
    driver: &mut D,
) -> Result<ChainSuccess<D::Accepted>, GfxError> {
    let mut attempts = Vec::new();

    for &id in candidates {
        let Some(descriptor) = registry.get(id) else {
            attempts.push(InitAttempt {
                backend: id,
                cause: "backend is not registered".into(),
            });
            continue;
        };
        if let Err(err) = capabilities.check(id, &descriptor.requirements) {
            tracing::debug!(backend = %id, %err, "candidate filtered");
            attempts.push(InitAttempt {
                backend: id,
                cause: err.to_string(),
            });
            continue;
        }

        driver.on_candidate(id);
        let ctx = driver.context(id);
        let mut backend = match initialize_candidate(registry, id, ctx, timeout) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(backend = %id, %err, "candidate failed to initialize");
                attempts.push(InitAttempt {
                    backend: id,
                    cause: err.to_string(),
                });
                continue;
            }
        };

        match driver.accept(id, backend.as_mut()) {
            Ok(accepted) => {
                return Ok(ChainSuccess {
                    backend,
                    id,
                    accepted,
                    attempts,
                })
            }
            Err(err) => {
                tracing::warn!(backend = %id, %err, "candidate rejected after initialization");
                backend.destroy();
                attempts.push(InitAttempt {
                    backend: id,
                    cause: err.to_string(),
                });
            }
        }
    }

    tracing::error!(attempts = attempts.len(), "every backend candidate failed");
    Err(GfxError::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_descriptor, CallLog, Script};

    struct Plain;

    impl ChainDriver for Plain {
        type Accepted = ();

        fn on_candidate(&mut self, _id: BackendType) {}

        fn context(&mut self, _id: BackendType) -> BackendContext {
            BackendContext::new(Platform::Linux, CapabilitySet::software())
        }

        fn accept(&mut self, _id: BackendType, _backend: &mut dyn RenderBackend) -> Result<(), GfxError> {
            Ok(())
        }
    }

    fn everything() -> CapabilitySet {
        BackendType::ALL
            .into_iter()
            .fold(CapabilitySet::software(), |set, id| set.with_api(id))
    }

    #[test]
    fn test_preferred_goes_first_once() {
        let registry = BackendRegistry::with_defaults();
        let chain = build_candidate_chain(
            &registry,
            Platform::Linux,
            &everything(),
            Some(BackendType::OpenGL),
            false,
        );
        assert_eq!(
            chain,
            vec![
                BackendType::OpenGL,
                BackendType::Vulkan,
                BackendType::OpenGLES,
                BackendType::Software
            ]
        );
    }

    #[test]
    fn test_incapable_candidates_are_dropped() {
        let registry = BackendRegistry::with_defaults();
        let caps = CapabilitySet::software().with_api(BackendType::OpenGL);
        let chain =
            build_candidate_chain(&registry, Platform::Linux, &caps, Some(BackendType::Vulkan), true);
        assert_eq!(chain, vec![BackendType::OpenGL, BackendType::Software]);
    }

    #[test]
    fn test_restricted_chain_follows_target() {
        let chain = [
            BackendType::DirectX12,
            BackendType::Vulkan,
            BackendType::OpenGL,
            BackendType::Software,
        ];
        assert_eq!(
            restricted_chain(BackendType::Vulkan, BackendType::DirectX12, &chain),
            vec![BackendType::Vulkan, BackendType::OpenGL, BackendType::Software]
        );
        // Off-chain target continues after the current backend.
        assert_eq!(
            restricted_chain(BackendType::Metal, BackendType::Vulkan, &chain),
            vec![BackendType::Metal, BackendType::OpenGL, BackendType::Software]
        );
        assert_eq!(
            restricted_chain(BackendType::Software, BackendType::OpenGL, &chain),
            vec![BackendType::Software]
        );
    }

    #[test]
    fn test_slow_candidate_times_out() {
        let log = CallLog::default();
        let registry = BackendRegistry::builder()
            .register(scripted_descriptor(
                BackendType::Vulkan,
                Script::default().init_delay(Duration::from_millis(200)),
                &log,
            ))
            .build();
        let ctx = BackendContext::new(Platform::Linux, everything());
        let result = initialize_candidate(&registry, BackendType::Vulkan, ctx, Duration::from_millis(10));
        assert!(matches!(result, Err(GfxError::InitializationFailed { .. })));
    }

    #[test]
    fn test_chain_exhausts_with_every_attempt() {
        let log = CallLog::default();
        let registry = BackendRegistry::builder()
            .register(scripted_descriptor(BackendType::Vulkan, Script::failing(), &log))
            .register(scripted_descriptor(BackendType::Software, Script::failing(), &log))
            .build();
        let result = initialize_chain(
            &registry,
            &[BackendType::Vulkan, BackendType::Software],
            &everything(),
            Duration::from_secs(1),
            &mut Plain,
        );
        match result {
            Err(GfxError::Exhausted { attempts }) => {
                let tried: Vec<_> = attempts.iter().map(|attempt| attempt.backend).collect();
                assert_eq!(tried, vec![BackendType::Vulkan, BackendType::Software]);
            }
            _ => panic!("expected exhaustion"),
        }
    }
}
