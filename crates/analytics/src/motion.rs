//! Background-subtraction motion detection with ROI masking and the
//! mask-centroid tripwire heuristic.

use tracing::debug;
use video_ingest::Frame;

use crate::{
    background::BackgroundModel,
    geometry::{NormPoint, Tripwire},
    mask::Mask,
    motion_threshold, MIN_TRIPWIRE_MASS, MOTION_DEBOUNCE_MS, ROI_MOTION_DEBOUNCE_MS,
    TRIPWIRE_DEBOUNCE_MS, TRIPWIRE_MAX_DISTANCE_PX,
};

/// Events produced by one motion pass over a frame.
pub enum MotionEvent {
    /// Whole-frame motion above threshold; carries a copy of the frame for
    /// the snapshot path.
    Motion { score: f64, frame: Frame },
    /// Motion above threshold inside the configured ROI.
    RoiMotion { score: f64 },
    /// The foreground centroid crossed the tripwire; `direction` is `+1`
    /// when the current side of the line is positive, `-1` otherwise.
    TripwireCrossed { direction: i32 },
}

/// Per-pipeline motion state: background model, policy geometry, and the
/// emission debounce clocks.
pub struct MotionDetector {
    background: Box<dyn BackgroundModel>,
    sensitivity: f64,
    roi: Vec<NormPoint>,
    tripwire: Option<Tripwire>,
    centroid_tripwire_enabled: bool,
    last_motion_ms: Option<i64>,
    last_roi_ms: Option<i64>,
    last_tripwire_ms: Option<i64>,
    prev_side: Option<f64>,
}

impl MotionDetector {
    pub fn new(background: Box<dyn BackgroundModel>) -> Self {
        Self {
            background,
            sensitivity: 50.0,
            roi: Vec::new(),
            tripwire: None,
            centroid_tripwire_enabled: true,
            last_motion_ms: None,
            last_roi_ms: None,
            last_tripwire_ms: None,
            prev_side: None,
        }
    }

    pub fn set_sensitivity(&mut self, sensitivity: f64) {
        self.sensitivity = sensitivity.clamp(0.0, 100.0);
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    /// Install an ROI polygon. Fewer than three points disables ROI motion.
    pub fn set_roi(&mut self, points: Vec<NormPoint>) {
        self.roi = points;
        self.last_roi_ms = None;
    }

    pub fn clear_roi(&mut self) {
        self.roi.clear();
        self.last_roi_ms = None;
    }

    pub fn set_tripwire(&mut self, tripwire: Tripwire) {
        self.tripwire = Some(tripwire);
        self.last_tripwire_ms = None;
        self.prev_side = None;
    }

    pub fn clear_tripwire(&mut self) {
        self.tripwire = None;
        self.last_tripwire_ms = None;
        self.prev_side = None;
    }

    /// Gate for the mask-centroid tripwire heuristic; the per-track detector
    /// in the tracker can cover the same crossings when a model is loaded.
    pub fn set_centroid_tripwire_enabled(&mut self, enabled: bool) {
        self.centroid_tripwire_enabled = enabled;
    }

    /// Run one frame through the detector, returning any events due now.
    pub fn process(&mut self, frame: &Frame, now_ms: i64) -> Vec<MotionEvent> {
        let mut mask = self.background.apply(frame);
        mask.morph_open();
        mask.morph_close();
        self.process_mask(&mask, frame, now_ms)
    }

    /// Policy half of `process`, operating on a ready foreground mask.
    fn process_mask(&mut self, mask: &Mask, frame: &Frame, now_ms: i64) -> Vec<MotionEvent> {
        let mut events = Vec::new();

        let total = (mask.width as f64) * (mask.height as f64);
        if total <= 0.0 {
            return events;
        }

        let score = 100.0 * mask.count_nonzero() as f64 / total;
        let threshold = motion_threshold(self.sensitivity);

        if score > threshold && debounce_clear(self.last_motion_ms, now_ms, MOTION_DEBOUNCE_MS) {
            self.last_motion_ms = Some(now_ms);
            events.push(MotionEvent::Motion {
                score,
                frame: frame.clone(),
            });
        }

        if self.roi.len() >= 3 {
            if let Some(event) = self.process_roi(mask, threshold, now_ms) {
                events.push(event);
            }
        }

        if self.centroid_tripwire_enabled {
            if let Some(wire) = self.tripwire {
                if let Some(event) = self.process_tripwire(mask, &wire, now_ms) {
                    events.push(event);
                }
            }
        }

        events
    }

    fn process_roi(&mut self, mask: &Mask, threshold: f64, now_ms: i64) -> Option<MotionEvent> {
        let vertices: Vec<(f64, f64)> = self
            .roi
            .iter()
            .map(|p| (p.x * mask.width as f64, p.y * mask.height as f64))
            .collect();

        let mut roi_mask = Mask::new(mask.width, mask.height);
        roi_mask.fill_polygon(&vertices);

        let roi_area = roi_mask.count_nonzero();
        if roi_area == 0 {
            return None;
        }

        let overlap = mask.and(&roi_mask).count_nonzero();
        let roi_score = 100.0 * overlap as f64 / roi_area as f64;

        if roi_score > threshold && debounce_clear(self.last_roi_ms, now_ms, ROI_MOTION_DEBOUNCE_MS)
        {
            self.last_roi_ms = Some(now_ms);
            return Some(MotionEvent::RoiMotion { score: roi_score });
        }
        None
    }

    fn process_tripwire(
        &mut self,
        mask: &Mask,
        wire: &Tripwire,
        now_ms: i64,
    ) -> Option<MotionEvent> {
        let moments = mask.moments();
        if moments.m00 < MIN_TRIPWIRE_MASS {
            // Too little motion to trust the centroid; forget the previous
            // side so crossings are not inferred across gaps.
            self.prev_side = None;
            return None;
        }
        let (cx, cy) = moments.centroid()?;

        let (w, h) = (mask.width as f64, mask.height as f64);
        let (x1, y1) = (wire.start.x * w, wire.start.y * h);
        let (x2, y2) = (wire.end.x * w, wire.end.y * h);

        let cur_side = (cx - x1) * (y2 - y1) - (cy - y1) * (x2 - x1);

        let mut event = None;
        if let Some(prev_side) = self.prev_side {
            if prev_side * cur_side < 0.0 {
                let line_length = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
                let distance = cur_side.abs() / line_length;
                if distance < TRIPWIRE_MAX_DISTANCE_PX
                    && debounce_clear(self.last_tripwire_ms, now_ms, TRIPWIRE_DEBOUNCE_MS)
                {
                    self.last_tripwire_ms = Some(now_ms);
                    let direction = if cur_side > 0.0 { 1 } else { -1 };
                    debug!(direction, distance, "centroid tripwire crossing");
                    event = Some(MotionEvent::TripwireCrossed { direction });
                }
            }
        }

        self.prev_side = Some(cur_side);
        event
    }
}

/// True when no previous emission exists or the gap has expired.
fn debounce_clear(last_ms: Option<i64>, now_ms: i64, gap_ms: i64) -> bool {
    last_ms.map_or(true, |last| now_ms - last > gap_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays pre-baked foreground masks, bypassing background learning.
    struct ScriptedBackground {
        masks: VecDeque<Mask>,
        fallback: (i32, i32),
    }

    impl ScriptedBackground {
        fn new(fallback: (i32, i32)) -> Self {
            Self {
                masks: VecDeque::new(),
                fallback,
            }
        }

        fn push(&mut self, mask: Mask) {
            self.masks.push_back(mask);
        }
    }

    impl BackgroundModel for ScriptedBackground {
        fn apply(&mut self, _frame: &Frame) -> Mask {
            self.masks
                .pop_front()
                .unwrap_or_else(|| Mask::new(self.fallback.0, self.fallback.1))
        }
    }

    fn frame_640x480() -> Frame {
        Frame::new(640, 480, 0)
    }

    /// 640×480 mask with a solid block of `w`×`h` at (`x`, `y`).
    fn block_mask(x: i32, y: i32, w: i32, h: i32) -> Mask {
        let mut mask = Mask::new(640, 480);
        mask.fill_rect(x, y, w, h);
        mask
    }

    fn detector_with(masks: Vec<Mask>) -> MotionDetector {
        let mut bg = ScriptedBackground::new((640, 480));
        for m in masks {
            bg.push(m);
        }
        MotionDetector::new(Box::new(bg))
    }

    #[test]
    fn empty_mask_never_triggers() {
        let mut det = detector_with(vec![Mask::new(640, 480), Mask::new(640, 480)]);
        det.set_sensitivity(100.0);
        assert!(det.process(&frame_640x480(), 1000).is_empty());
        assert!(det.process(&frame_640x480(), 5000).is_empty());
    }

    #[test]
    fn motion_debouncing_scenario() {
        // Sensitivity 50 → threshold 5.25; the block covers 10% of the frame.
        // Frames at t=0, 500, 2500 must produce exactly two motion events
        // (t=0 and t=2500).
        let tenth = || block_mask(100, 100, 320, 96);
        let mut det = detector_with(vec![tenth(), tenth(), tenth()]);
        det.set_sensitivity(50.0);

        let hits: Vec<bool> = [0, 500, 2500]
            .iter()
            .map(|&t| {
                det.process(&frame_640x480(), t)
                    .iter()
                    .any(|e| matches!(e, MotionEvent::Motion { .. }))
            })
            .collect();

        assert_eq!(hits, vec![true, false, true]);
    }

    #[test]
    fn motion_event_carries_score_and_frame() {
        let mut det = detector_with(vec![block_mask(100, 100, 320, 96)]);
        det.set_sensitivity(50.0);
        let events = det.process(&frame_640x480(), 0);
        match &events[0] {
            MotionEvent::Motion { score, frame } => {
                assert!((score - 10.0).abs() < 0.2, "score = {score}");
                assert_eq!(frame.width, 640);
            }
            _ => panic!("expected a motion event"),
        }
    }

    #[test]
    fn roi_motion_uses_its_own_threshold_and_debounce() {
        // ROI is the left half of the frame; the block fills a quarter of it.
        let masks = vec![
            block_mask(0, 0, 160, 240),
            block_mask(0, 0, 160, 240),
            block_mask(0, 0, 160, 240),
        ];
        let mut det = detector_with(masks);
        det.set_sensitivity(50.0);
        det.set_roi(vec![
            NormPoint::new(0.0, 0.0),
            NormPoint::new(0.5, 0.0),
            NormPoint::new(0.5, 1.0),
            NormPoint::new(0.0, 1.0),
        ]);

        let roi_hits = |events: &[MotionEvent]| {
            events
                .iter()
                .any(|e| matches!(e, MotionEvent::RoiMotion { .. }))
        };

        assert!(roi_hits(&det.process(&frame_640x480(), 10_000)));
        // 2500 ms later: inside the 3000 ms ROI debounce window.
        assert!(!roi_hits(&det.process(&frame_640x480(), 12_500)));
        assert!(roi_hits(&det.process(&frame_640x480(), 13_100)));
    }

    #[test]
    fn centroid_tripwire_fires_once_with_positive_direction() {
        // Horizontal wire at y = 0.5 (pixel 240). Two blocks whose centroids
        // sit on opposite sides, both within 50 px of the line.
        let below = block_mask(280, 250, 80, 40); // centroid y ≈ 270
        let above = block_mask(280, 190, 80, 40); // centroid y ≈ 210
        let mut det = detector_with(vec![below, above]);
        det.set_sensitivity(0.0); // keep plain motion quiet
        det.set_tripwire(Tripwire::new(NormPoint::new(0.0, 0.5), NormPoint::new(1.0, 0.5)));

        let first = det.process(&frame_640x480(), 10_000);
        assert!(first.is_empty());

        let second = det.process(&frame_640x480(), 10_500);
        assert_eq!(second.len(), 1);
        match &second[0] {
            MotionEvent::TripwireCrossed { direction } => assert_eq!(*direction, 1),
            _ => panic!("expected tripwire event"),
        }
    }

    #[test]
    fn centroid_tripwire_rejects_distant_crossings() {
        // Same crossing but the centroids are ~160 px from the wire, beyond
        // the 50 px gate.
        let below = block_mask(280, 380, 80, 40);
        let above = block_mask(280, 60, 80, 40);
        let mut det = detector_with(vec![below, above]);
        det.set_sensitivity(0.0);
        det.set_tripwire(Tripwire::new(NormPoint::new(0.0, 0.5), NormPoint::new(1.0, 0.5)));

        assert!(det.process(&frame_640x480(), 10_000).is_empty());
        assert!(det.process(&frame_640x480(), 10_500).is_empty());
    }

    #[test]
    fn centroid_tripwire_debounces_repeat_crossings() {
        let below = || block_mask(280, 250, 80, 40);
        let above = || block_mask(280, 190, 80, 40);
        let mut det = detector_with(vec![below(), above(), below(), above()]);
        det.set_sensitivity(0.0);
        det.set_tripwire(Tripwire::new(NormPoint::new(0.0, 0.5), NormPoint::new(1.0, 0.5)));

        assert!(det.process(&frame_640x480(), 10_000).is_empty());
        assert_eq!(det.process(&frame_640x480(), 10_400).len(), 1);
        // Two more crossings inside the 2000 ms window stay silent.
        assert!(det.process(&frame_640x480(), 10_800).is_empty());
        assert!(det.process(&frame_640x480(), 11_200).is_empty());
    }

    #[test]
    fn small_mass_resets_the_previous_side() {
        // Side A, then a near-empty mask, then side B: the gap must prevent
        // a crossing from being inferred.
        let below = block_mask(280, 250, 80, 40);
        let mut tiny = Mask::new(640, 480);
        tiny.fill_rect(0, 0, 5, 5); // m00 = 25 < 100
        let above = block_mask(280, 190, 80, 40);

        let mut det = detector_with(vec![below, tiny, above]);
        det.set_sensitivity(0.0);
        det.set_tripwire(Tripwire::new(NormPoint::new(0.0, 0.5), NormPoint::new(1.0, 0.5)));

        assert!(det.process(&frame_640x480(), 10_000).is_empty());
        assert!(det.process(&frame_640x480(), 10_100).is_empty());
        assert!(det.process(&frame_640x480(), 10_200).is_empty());
    }

    #[test]
    fn disabled_centroid_tripwire_stays_silent() {
        let below = block_mask(280, 250, 80, 40);
        let above = block_mask(280, 190, 80, 40);
        let mut det = detector_with(vec![below, above]);
        det.set_sensitivity(0.0);
        det.set_tripwire(Tripwire::new(NormPoint::new(0.0, 0.5), NormPoint::new(1.0, 0.5)));
        det.set_centroid_tripwire_enabled(false);

        assert!(det.process(&frame_640x480(), 10_000).is_empty());
        assert!(det.process(&frame_640x480(), 10_500).is_empty());
    }
}
