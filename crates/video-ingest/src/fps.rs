//! Windowed FPS accounting shared by all capture backends.

use crate::FPS_REPORT_EVERY;

/// Tracks delivered frames and yields an FPS sample once per window.
pub(crate) struct FpsWindow {
    window_start_ms: i64,
    frames: u32,
}

impl FpsWindow {
    pub(crate) fn new(now_ms: i64) -> Self {
        Self {
            window_start_ms: now_ms,
            frames: 0,
        }
    }

    /// Record one delivered frame. Returns the achieved rate when the window
    /// of [`FPS_REPORT_EVERY`] frames completes, computed as
    /// `frames * 1000 / elapsed_ms`.
    pub(crate) fn on_frame(&mut self, now_ms: i64) -> Option<f64> {
        self.frames += 1;
        if self.frames < FPS_REPORT_EVERY {
            return None;
        }

        let elapsed = now_ms - self.window_start_ms;
        let fps = if elapsed > 0 {
            Some(self.frames as f64 * 1000.0 / elapsed as f64)
        } else {
            None
        };

        self.frames = 0;
        self.window_start_ms = now_ms;
        fps
    }
}
