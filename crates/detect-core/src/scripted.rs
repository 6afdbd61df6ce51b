//! Deterministic detector used by tracker and pipeline tests.

use std::collections::VecDeque;

use anyhow::Result;
use video_ingest::Frame;

use crate::{Detection, ObjectDetector};

/// Replays a queue of pre-baked detection lists, one per `infer` call.
///
/// Once the queue runs dry it keeps returning empty lists, which is exactly
/// how a loaded backend behaves on an empty scene.
pub struct ScriptedDetector {
    class_names: Vec<String>,
    script: VecDeque<Vec<Detection>>,
    confidence_threshold: f32,
}

impl ScriptedDetector {
    pub fn new(class_names: &[&str]) -> Self {
        Self {
            class_names: class_names.iter().map(|s| s.to_string()).collect(),
            script: VecDeque::new(),
            confidence_threshold: 0.5,
        }
    }

    /// Queue one inference result.
    pub fn push_result(&mut self, detections: Vec<Detection>) {
        self.script.push_back(detections);
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }
}

impl ObjectDetector for ScriptedDetector {
    fn is_loaded(&self) -> bool {
        true
    }

    fn set_confidence_threshold(&mut self, threshold: f32) {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let batch = self.script.pop_front().unwrap_or_default();
        Ok(batch
            .into_iter()
            .filter(|d| d.score >= self.confidence_threshold)
            .collect())
    }
}
