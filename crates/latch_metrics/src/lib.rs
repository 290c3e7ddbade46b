//! Latch Metrics - Frame timing primitives
//!
//! Fixed-capacity sample storage and frame timers shared by the render
//! layers. The adaptive renderer in `latch_gfx` keeps its per-frame
//! performance samples in a [`RingBuffer`] and measures frames with a
//! [`FrameTimer`].
//!
//! # Usage
//!
//! ```ignore
//! use latch_metrics::{FrameTimer, RingBuffer};
//!
//! let mut timer = FrameTimer::new(60); // Track last 60 frames
//! timer.begin();
//! // ... do work ...
//! timer.end();
//! println!("FPS: {:.1}", timer.fps());
//! ```

mod frame_timer;
mod ring_buffer;

pub use frame_timer::FrameTimer;
pub use ring_buffer::RingBuffer;
