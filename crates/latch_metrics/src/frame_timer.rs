//! Frame timing utilities

use super::ring_buffer::RingBuffer;
use std::time::{Duration, Instant};

/// Measures begin→end intervals and keeps a rolling window of them.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    frame_start: Option<Instant>,
    frame_times: RingBuffer<Duration>,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frame_start: None,
            frame_times: RingBuffer::new(capacity),
        }
    }

    pub fn begin(&mut self) {
        self.frame_start = Some(Instant::now());
    }

    /// Close the current frame and return its duration.
    ///
    /// Returns `None` when `begin` was not called for this frame.
    pub fn end(&mut self) -> Option<Duration> {
        let elapsed = self.frame_start.take()?.elapsed();
        self.frame_times.push(elapsed);
        Some(elapsed)
    }

    /// Record an externally measured frame duration.
    pub fn record(&mut self, elapsed: Duration) {
        self.frame_times.push(elapsed);
    }

    /// Forget the running frame without recording it.
    pub fn cancel(&mut self) {
        self.frame_start = None;
    }

    pub fn is_running(&self) -> bool {
        self.frame_start.is_some()
    }

    pub fn fps(&self) -> f64 {
        let avg = self.frame_times.average();
        if avg.as_secs_f64() > 0.0 {
            1.0 / avg.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn frame_time_ms(&self) -> f64 {
        self.frame_times.average().as_secs_f64() * 1000.0
    }

    pub fn frame_time_range_ms(&self) -> (f64, f64) {
        let (min, max) = self.frame_times.min_max();
        (min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0)
    }

    pub fn reset(&mut self) {
        self.frame_start = None;
        self.frame_times.clear();
    }
}
