use anyhow::Result;
use video_ingest::Frame;

/// Single detection returned by a detector backend.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Class index into the backend's [`ObjectDetector::class_names`] list.
    pub class_id: i64,
    /// Confidence score in `[0, 1]`.
    pub score: f32,
    /// Bounding box stored as `[x, y, w, h]` in frame pixels.
    pub bbox: [f32; 4],
}

impl Detection {
    /// Clamp the box so it lies fully inside a `width`×`height` frame.
    pub fn clamped(mut self, width: i32, height: i32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let x2 = (self.bbox[0] + self.bbox[2]).clamp(0.0, w);
        let y2 = (self.bbox[1] + self.bbox[3]).clamp(0.0, h);
        self.bbox[0] = self.bbox[0].clamp(0.0, w);
        self.bbox[1] = self.bbox[1].clamp(0.0, h);
        self.bbox[2] = x2 - self.bbox[0];
        self.bbox[3] = y2 - self.bbox[1];
        self
    }
}

/// Contract every detection backend fulfils.
///
/// Implementations are driven from a single pipeline worker at a time; the
/// handle itself is shared behind a lock so one loaded model can serve
/// several cameras.
pub trait ObjectDetector: Send {
    /// Whether the backend has a usable model.
    fn is_loaded(&self) -> bool;

    /// Override the confidence threshold used to filter detections.
    fn set_confidence_threshold(&mut self, threshold: f32);

    /// Ordered class labels; a detection's `class_id` indexes this list.
    fn class_names(&self) -> &[String];

    /// Run inference on one frame. Returns an empty list when not loaded.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Intersection-over-union of two `[x, y, w, h]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let intersection = inter_w * inter_h;
    if intersection <= 0.0 {
        return 0.0;
    }
    let area_a = a[2].max(0.0) * a[3].max(0.0);
    let area_b = b[2].max(0.0) * b[3].max(0.0);
    intersection / (area_a + area_b - intersection + 1e-6)
}

/// Greedy non-max suppression over a detection list, highest score first.
pub fn apply_nms(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut result: Vec<Detection> = Vec::with_capacity(detections.len());

    for det in detections.drain(..) {
        let mut should_keep = true;
        for kept in &result {
            if iou(&det.bbox, &kept.bbox) > iou_threshold {
                should_keep = false;
                break;
            }
        }
        if should_keep {
            result.push(det);
        }
    }

    *detections = result;
}
