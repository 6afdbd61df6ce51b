//! Object detector contract shared by the surveillance pipelines.
//!
//! Detection backends are opaque to the rest of the system: the pipeline only
//! cares about [`ObjectDetector`]'s four operations. Inference runs on the
//! owning pipeline's worker thread, at most once every
//! [`AI_PROCESS_INTERVAL`] frames.

pub use detector::{apply_nms, iou, Detection, ObjectDetector};
pub use scripted::ScriptedDetector;

mod detector;
mod scripted;

/// Inference cadence: run the detector every Nth captured frame.
pub const AI_PROCESS_INTERVAL: u32 = 5;
