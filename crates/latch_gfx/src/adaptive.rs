//! Adaptive renderer
//!
//! Forwards every call to the manager's live backend and records one
//! [`PerformanceSample`] per presented frame. Sustained slow frames or a
//! lost device trigger a switch to the next candidate in the chain.

use crate::{
    AdaptivePolicy, BackendInfo, BackendType, Command, GfxError, Manager, RenderApi,
    ResourceDesc, ResourceHandle, SwitchOutcome,
};
use latch_metrics::{FrameTimer, RingBuffer};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PerformanceSample {
    pub frame_index: u64,
    pub frame_time: Duration,
    /// GPU errors the live backend had reported when the frame was presented.
    pub gpu_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SwitchReason {
    DeviceLost,
    SlowFrames,
    Explicit,
}

/// Read-only view of the renderer's recent behaviour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveMetrics {
    pub backend: Option<BackendType>,
    pub rolling_fps: f64,
    pub average_frame_time: Duration,
    pub switch_count: u64,
    pub frames: u64,
}

struct FrameState {
    timer: FrameTimer,
    frame_index: u64,
    slow_streak: u32,
    cooldown: u32,
}

pub struct AdaptiveRenderer {
    manager: Manager,
    policy: AdaptivePolicy,
    samples: Mutex<RingBuffer<PerformanceSample>>,
    frame: Mutex<FrameState>,
    switching: AtomicBool,
    switches: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AdaptiveRenderer {
    pub fn new(manager: Manager, policy: AdaptivePolicy) -> Self {
        Self {
            manager,
            samples: Mutex::new(RingBuffer::new(policy.sample_capacity)),
            frame: Mutex::new(FrameState {
                timer: FrameTimer::new(policy.sample_capacity),
                frame_index: 0,
                slow_streak: 0,
                cooldown: 0,
            }),
            policy,
            switching: AtomicBool::new(false),
            switches: AtomicU64::new(0),
        }
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    /// Present using `frame_time` instead of the measured begin-to-present
    /// time. For callers that time frames themselves.
    pub fn present_with_timing(&self, frame_time: Duration) -> Result<(), GfxError> {
        lock(&self.frame).timer.cancel();
        match self.manager.present_raw() {
            Ok(true) => {
                self.observe(frame_time);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => self.absorb_loss(err),
        }
    }

    /// Ask for a switch to the next candidate. Returns `false` when the
    /// request was coalesced into a switch already in flight, there is no
    /// candidate left, or the switch did not complete.
    pub fn request_switch(&self, reason: SwitchReason) -> bool {
        match self.switch(reason) {
            Ok(switched) => switched,
            Err(err) => {
                tracing::error!(?reason, error = %err, "adaptive switch failed");
                false
            }
        }
    }

    fn switch(&self, reason: SwitchReason) -> Result<bool, GfxError> {
        if self
            .switching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(?reason, "switch request coalesced");
            return Ok(false);
        }
        let result = self.run_switch(reason);
        self.switching.store(false, Ordering::Release);
        result
    }

    fn run_switch(&self, reason: SwitchReason) -> Result<bool, GfxError> {
        if self.manager.is_switching() {
            tracing::debug!(?reason, "manager already switching");
            return Ok(false);
        }
        let outcome = match reason {
            SwitchReason::DeviceLost => {
                let Some(lost) = self.manager.current_backend() else {
                    return Ok(false);
                };
                self.manager.switch_after_loss(lost)?
            }
            SwitchReason::SlowFrames | SwitchReason::Explicit => {
                let Some(target) = self.manager.next_candidate() else {
                    tracing::info!(?reason, "no lower candidate to switch to");
                    return Ok(false);
                };
                self.manager.switch_for(target, reason)?
            }
        };

        let switched = matches!(outcome, SwitchOutcome::Switched { .. });
        if switched {
            self.switches.fetch_add(1, Ordering::Relaxed);
            let mut frame = lock(&self.frame);
            frame.slow_streak = 0;
            frame.cooldown = self.policy.cooldown_frames;
        }
        Ok(switched)
    }

    /// Device loss is turned into a switch when the policy allows it; the
    /// frame it interrupted is dropped.
    fn absorb_loss(&self, err: GfxError) -> Result<(), GfxError> {
        let GfxError::DeviceLost { backend, reason } = &err else {
            return Err(err);
        };
        if !self.policy.switch_on_device_lost {
            return Err(err);
        }
        tracing::warn!(%backend, %reason, "DeviceLost");
        lock(&self.frame).timer.cancel();
        self.switch(SwitchReason::DeviceLost)?;
        Ok(())
    }

    fn observe(&self, frame_time: Duration) {
        let gpu_errors = self.manager.gpu_error_count();
        let mut frame = lock(&self.frame);
        frame.frame_index += 1;
        frame.timer.record(frame_time);
        let sample = PerformanceSample {
            frame_index: frame.frame_index,
            frame_time,
            gpu_errors,
        };

        let average = {
            let mut samples = lock(&self.samples);
            samples.push(sample);
            let window = samples.tail(self.policy.average_window);
            let total: Duration = window.iter().map(|sample| sample.frame_time).sum();
            total / window.len().max(1) as u32
        };

        if frame.cooldown > 0 {
            frame.cooldown -= 1;
            return;
        }
        if average > self.policy.frame_time_ceiling() {
            frame.slow_streak += 1;
        } else {
            frame.slow_streak = 0;
        }
        if frame.slow_streak < self.policy.consecutive_frames {
            return;
        }
        frame.slow_streak = 0;
        drop(frame);

        tracing::info!(
            average_ms = average.as_secs_f64() * 1000.0,
            ceiling_ms = self.policy.frame_time_ceiling_ms,
            "sustained slow frames"
        );
        self.request_switch(SwitchReason::SlowFrames);
    }

    /// Snapshot of the recorded samples, oldest first.
    pub fn samples(&self) -> Vec<PerformanceSample> {
        lock(&self.samples).to_vec()
    }

    pub fn metrics(&self) -> AdaptiveMetrics {
        let (rolling_fps, frames) = {
            let frame = lock(&self.frame);
            (frame.timer.fps(), frame.frame_index)
        };
        let average_frame_time = {
            let samples = lock(&self.samples);
            let total: Duration = samples.iter().map(|sample| sample.frame_time).sum();
            total / samples.len().max(1) as u32
        };
        AdaptiveMetrics {
            backend: self.manager.current_backend(),
            rolling_fps,
            average_frame_time,
            switch_count: self.switches.load(Ordering::Relaxed),
            frames,
        }
    }
}

impl RenderApi for AdaptiveRenderer {
    fn create_resource(&self, desc: ResourceDesc) -> Result<ResourceHandle, GfxError> {
        match self.manager.create_resource_raw(desc.clone()) {
            Err(err) if err.is_device_lost() => {
                self.absorb_loss(err)?;
                self.manager.create_resource_raw(desc)
            }
            other => other,
        }
    }

    fn destroy_resource(&self, handle: ResourceHandle) -> Result<(), GfxError> {
        self.manager.destroy_resource(handle)
    }

    fn begin_frame(&self) -> Result<(), GfxError> {
        match self.manager.begin_frame_raw() {
            Ok(()) => {
                lock(&self.frame).timer.begin();
                Ok(())
            }
            Err(err) => self.absorb_loss(err),
        }
    }

    fn record_commands(&self, commands: &[Command]) -> Result<(), GfxError> {
        self.manager
            .record_commands_raw(commands)
            .or_else(|err| self.absorb_loss(err))
    }

    fn end_frame(&self) -> Result<(), GfxError> {
        self.manager
            .end_frame_raw()
            .or_else(|err| self.absorb_loss(err))
    }

    fn present(&self) -> Result<(), GfxError> {
        match self.manager.present_raw() {
            Ok(true) => {
                let elapsed = lock(&self.frame).timer.end();
                if let Some(elapsed) = elapsed {
                    self.observe(elapsed);
                }
                Ok(())
            }
            Ok(false) => {
                lock(&self.frame).timer.cancel();
                Ok(())
            }
            Err(err) => self.absorb_loss(err),
        }
    }

    fn backend_info(&self) -> Option<BackendInfo> {
        self.manager.backend_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_descriptor, CallLog, Script};
    use crate::{BackendRegistry, CapabilitySet, GfxConfig, Platform, StaticProbe};

    fn renderer(policy: AdaptivePolicy, log: &CallLog) -> AdaptiveRenderer {
        renderer_with(Script::default(), policy, log)
    }

    fn renderer_with(vulkan: Script, policy: AdaptivePolicy, log: &CallLog) -> AdaptiveRenderer {
        let registry = BackendRegistry::builder()
            .register(scripted_descriptor(BackendType::Vulkan, vulkan, log))
            .register(scripted_descriptor(BackendType::OpenGL, Script::default(), log))
            .register(scripted_descriptor(BackendType::Software, Script::default(), log))
            .build();
        let caps = CapabilitySet::software()
            .with_api(BackendType::Vulkan)
            .with_api(BackendType::OpenGL);
        Manager::builder(GfxConfig::default())
            .registry(registry)
            .probe(StaticProbe::new(caps))
            .platform(Platform::Linux)
            .init()
            .unwrap()
            .create_adaptive_renderer(policy)
    }

    fn frame(renderer: &AdaptiveRenderer, frame_time: Duration) {
        renderer.begin_frame().unwrap();
        renderer.end_frame().unwrap();
        renderer.present_with_timing(frame_time).unwrap();
    }

    fn quick_policy() -> AdaptivePolicy {
        AdaptivePolicy {
            frame_time_ceiling_ms: 20.0,
            consecutive_frames: 3,
            average_window: 2,
            sample_capacity: 8,
            switch_on_device_lost: true,
            cooldown_frames: 5,
        }
    }

    #[test]
    fn test_fast_frames_never_switch() {
        let log = CallLog::default();
        let renderer = renderer(quick_policy(), &log);
        for _ in 0..20 {
            frame(&renderer, Duration::from_millis(5));
        }
        let metrics = renderer.metrics();
        assert_eq!(metrics.backend, Some(BackendType::Vulkan));
        assert_eq!(metrics.switch_count, 0);
        assert_eq!(metrics.frames, 20);
        assert_eq!(renderer.samples().len(), 8);
    }

    #[test]
    fn test_sustained_slow_frames_switch_once_then_cool_down() {
        let log = CallLog::default();
        let renderer = renderer(quick_policy(), &log);
        for _ in 0..3 {
            frame(&renderer, Duration::from_millis(50));
        }
        assert_eq!(renderer.metrics().backend, Some(BackendType::OpenGL));
        assert_eq!(renderer.metrics().switch_count, 1);

        // Within the cooldown window slow frames are not counted.
        for _ in 0..5 {
            frame(&renderer, Duration::from_millis(50));
        }
        assert_eq!(renderer.metrics().switch_count, 1);
        for _ in 0..3 {
            frame(&renderer, Duration::from_millis(50));
        }
        assert_eq!(renderer.metrics().backend, Some(BackendType::Software));
        assert_eq!(renderer.metrics().switch_count, 2);
    }

    #[test]
    fn test_single_spike_is_ignored() {
        let log = CallLog::default();
        let renderer = renderer(quick_policy(), &log);
        frame(&renderer, Duration::from_millis(5));
        frame(&renderer, Duration::from_millis(200));
        for _ in 0..10 {
            frame(&renderer, Duration::from_millis(5));
        }
        assert_eq!(renderer.metrics().switch_count, 0);
    }

    #[test]
    fn test_samples_carry_frame_index() {
        let log = CallLog::default();
        let renderer = renderer(quick_policy(), &log);
        frame(&renderer, Duration::from_millis(4));
        frame(&renderer, Duration::from_millis(6));
        let indices: Vec<_> = renderer.samples().iter().map(|s| s.frame_index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(renderer.metrics().average_frame_time, Duration::from_millis(5));
    }

    #[test]
    fn test_frame_lost_mid_recording_is_not_sampled() {
        let log = CallLog::default();
        let renderer =
            renderer_with(Script::default().lose_device_on_record(1), quick_policy(), &log);

        renderer.begin_frame().unwrap();
        renderer.record_commands(&[Command::Barrier]).unwrap();
        renderer.end_frame().unwrap();
        renderer.present().unwrap();

        let metrics = renderer.metrics();
        assert_eq!(metrics.backend, Some(BackendType::OpenGL));
        assert_eq!(metrics.switch_count, 1);
        assert_eq!(metrics.frames, 0);
        assert!(renderer.samples().is_empty());

        renderer.begin_frame().unwrap();
        renderer.record_commands(&[Command::Barrier]).unwrap();
        renderer.end_frame().unwrap();
        renderer.present().unwrap();
        assert_eq!(renderer.metrics().frames, 1);
        assert_eq!(renderer.samples().len(), 1);
    }
}
