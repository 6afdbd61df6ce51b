//! Shared data types exposed by the video ingest layer.

use anyhow::Error;
use thiserror::Error;

/// Raw RGB frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel buffer, row-major, no padding.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: i32,
    /// Frame height in pixels.
    pub height: i32,
    /// Capture timestamp in epoch milliseconds.
    pub timestamp_ms: i64,
}

impl Frame {
    /// Allocate a black frame with the given dimensions.
    pub fn new(width: i32, height: i32, timestamp_ms: i64) -> Self {
        Self {
            data: vec![0; (width.max(0) as usize) * (height.max(0) as usize) * 3],
            width,
            height,
            timestamp_ms,
        }
    }

    /// True when dimensions are positive and the buffer matches them.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }
}

/// Events delivered by a running source.
pub enum SourceEvent {
    /// A captured frame.
    Frame(Frame),
    /// Achieved frame rate, reported every [`FPS_REPORT_EVERY`](crate::FPS_REPORT_EVERY) frames.
    Fps(f64),
}

#[derive(Debug, Error)]
/// Errors that can arise while configuring or driving capture pipelines.
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source stalled: {0}")]
    Stream(String),
    #[error(transparent)]
    Other(#[from] Error),
}

/// Channel endpoint handed to the consumer of a spawned source.
pub type SourceReceiver = crossbeam_channel::Receiver<Result<SourceEvent, CaptureError>>;
