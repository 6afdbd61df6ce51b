//! Frame capture layer for the surveillance pipelines.
//!
//! Sources run on their own background thread and push [`SourceEvent`]s over a
//! small bounded channel to backpressure the capture loop when the consumer
//! falls behind. Two backends exist: a synthetic generator that is always
//! available (useful for demos and integration tests) and an OpenCV-backed
//! reader behind the `opencv-capture` feature for real devices and network
//! streams.

pub use types::{CaptureError, Frame, SourceEvent, SourceReceiver};

pub use sim::spawn_sim_reader;

#[cfg(feature = "opencv-capture")]
pub use camera::spawn_capture_reader;

mod fps;
mod sim;
mod types;

#[cfg(feature = "opencv-capture")]
mod camera;

/// Requested capture width; backends may deliver a different size.
pub const CAPTURE_WIDTH: i32 = 640;
/// Requested capture height; backends may deliver a different size.
pub const CAPTURE_HEIGHT: i32 = 480;
/// Nominal inter-frame interval for the 30 Hz target rate.
pub const FRAME_INTERVAL_MS: u64 = 33;
/// Frames per FPS reporting window.
pub const FPS_REPORT_EVERY: u32 = 10;
/// Consecutive empty reads tolerated before the source is declared dead.
pub const MAX_EMPTY_READS: u32 = 30;

/// Parse a device-style URI (`"0"`, `"/dev/video2"`) into a capture index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}
