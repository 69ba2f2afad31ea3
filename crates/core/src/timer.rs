//! Frame timer used to pace the clear-colour animation and report frame rate.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time and frame deltas.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
    window_start: Instant,
    window_frames: u64,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Get the time elapsed since the last call to `tick()` and count a frame.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        self.window_frames += 1;
        delta
    }

    /// Total number of ticks since creation.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Returns the average frames per second over the last `window`, once
    /// that much time has passed, and starts a new window.
    pub fn fps_every(&mut self, window: Duration) -> Option<f64> {
        let span = self.window_start.elapsed();
        if span < window || self.window_frames == 0 {
            return None;
        }
        let fps = self.window_frames as f64 / span.as_secs_f64();
        self.window_start = Instant::now();
        self.window_frames = 0;
        Some(fps)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
