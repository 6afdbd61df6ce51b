//! Nearest-neighbour centroid tracker over normalized coordinates.

use std::collections::BTreeMap;

use detect_core::Detection;
use tracing::debug;

use crate::{
    behavior,
    geometry::{NormPoint, Tripwire},
    MAX_TRACK_DISTANCE, TRACK_TIMEOUT_MS,
};

/// Class labels eligible for tracking.
pub const TRACKED_CLASSES: [&str; 5] = ["person", "car", "bicycle", "dog", "cat"];

/// Persistent identity assigned to a detected object across frames.
#[derive(Debug, Clone)]
pub struct TrackState {
    pub id: i64,
    pub label: String,
    /// Current centroid in normalized coordinates.
    pub centroid: NormPoint,
    /// Centroid at the previous update; equals `centroid` on the birth frame.
    pub prev_centroid: NormPoint,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub inside_roi: bool,
    pub entered_roi_ms: i64,
    pub loiter_alert_sent: bool,
    pub last_tripwire_alert_ms: i64,
}

/// Direction of a per-track tripwire crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingDirection {
    LeftToRight,
    RightToLeft,
    Unknown,
}

impl CrossingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossingDirection::LeftToRight => "left to right",
            CrossingDirection::RightToLeft => "right to left",
            CrossingDirection::Unknown => "unknown",
        }
    }
}

/// Behavior events produced by one tracker update.
#[derive(Debug, Clone)]
pub enum TrackEvent {
    Loitering {
        track_id: i64,
        label: String,
        duration_ms: i64,
    },
    TripwireCrossed {
        track_id: i64,
        label: String,
        direction: CrossingDirection,
    },
}

/// Centroid tracker with per-track behavior state.
pub struct CentroidTracker {
    tracks: BTreeMap<i64, TrackState>,
    next_id: i64,
}

impl CentroidTracker {
    pub fn new() -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackState> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Ingest one detection batch: assign detections to tracks, run the ROI
    /// and tripwire behaviors for every updated track, then evict stale
    /// tracks.
    pub fn update(
        &mut self,
        detections: &[Detection],
        class_names: &[String],
        frame_width: i32,
        frame_height: i32,
        roi: &[NormPoint],
        tripwire: Option<&Tripwire>,
        now_ms: i64,
    ) -> Vec<TrackEvent> {
        let mut updated: Vec<i64> = Vec::new();

        for det in detections {
            let label = usize::try_from(det.class_id)
                .ok()
                .and_then(|id| class_names.get(id))
                .map(String::as_str)
                .unwrap_or("unknown");
            if !TRACKED_CLASSES.contains(&label) {
                continue;
            }

            let centroid = NormPoint::new(
                (det.bbox[0] + det.bbox[2] / 2.0) as f64 / frame_width as f64,
                (det.bbox[1] + det.bbox[3] / 2.0) as f64 / frame_height as f64,
            );

            // Nearest not-yet-updated track within range; ties break toward
            // the lowest (first-encountered) id by iteration order.
            let mut best: Option<(i64, f64)> = None;
            for (&id, track) in &self.tracks {
                if updated.contains(&id) {
                    continue;
                }
                let dist = track.centroid.distance_to(&centroid);
                if dist < MAX_TRACK_DISTANCE && best.map_or(true, |(_, d)| dist < d) {
                    best = Some((id, dist));
                }
            }

            let id = match best {
                Some((id, _)) => {
                    if let Some(track) = self.tracks.get_mut(&id) {
                        track.prev_centroid = track.centroid;
                        track.centroid = centroid;
                        track.last_seen_ms = now_ms;
                    }
                    id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.insert(
                        id,
                        TrackState {
                            id,
                            label: label.to_string(),
                            centroid,
                            prev_centroid: centroid,
                            first_seen_ms: now_ms,
                            last_seen_ms: now_ms,
                            inside_roi: false,
                            entered_roi_ms: 0,
                            loiter_alert_sent: false,
                            last_tripwire_alert_ms: 0,
                        },
                    );
                    id
                }
            };
            updated.push(id);
        }

        let mut events = Vec::new();
        for &id in &updated {
            let Some(track) = self.tracks.get_mut(&id) else {
                continue;
            };
            behavior::update_roi_status(track, roi, now_ms);
            if let Some(event) = behavior::check_loitering(track, now_ms) {
                events.push(event);
            }
            if let Some(wire) = tripwire {
                if let Some(event) = behavior::check_line_crossing(track, wire, now_ms) {
                    events.push(event);
                }
            }
        }

        let before = self.tracks.len();
        self.tracks
            .retain(|_, track| now_ms - track.last_seen_ms <= TRACK_TIMEOUT_MS);
        let evicted = before - self.tracks.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.tracks.len(), "evicted stale tracks");
        }

        events
    }
}

impl Default for CentroidTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: i32 = 640;
    const H: i32 = 480;

    fn classes() -> Vec<String> {
        vec!["person".into(), "car".into(), "kite".into()]
    }

    /// Detection whose centroid lands at the given normalized position.
    fn det_at(class_id: i64, cx: f64, cy: f64) -> Detection {
        let w = 40.0;
        let h = 80.0;
        Detection {
            class_id,
            score: 0.9,
            bbox: [
                (cx * W as f64) as f32 - w / 2.0,
                (cy * H as f64) as f32 - h / 2.0,
                w,
                h,
            ],
        }
    }

    fn square_roi() -> Vec<NormPoint> {
        vec![
            NormPoint::new(0.3, 0.3),
            NormPoint::new(0.7, 0.3),
            NormPoint::new(0.7, 0.7),
            NormPoint::new(0.3, 0.7),
        ]
    }

    #[test]
    fn untracked_classes_are_ignored() {
        let mut tracker = CentroidTracker::new();
        tracker.update(&[det_at(2, 0.5, 0.5)], &classes(), W, H, &[], None, 1000);
        assert!(tracker.is_empty());
    }

    #[test]
    fn nearby_detection_updates_the_same_track() {
        let mut tracker = CentroidTracker::new();
        tracker.update(&[det_at(0, 0.50, 0.50)], &classes(), W, H, &[], None, 1000);
        tracker.update(&[det_at(0, 0.52, 0.51)], &classes(), W, H, &[], None, 1100);

        assert_eq!(tracker.len(), 1);
        let track = tracker.tracks().next().unwrap();
        assert_eq!(track.id, 1);
        assert!((track.centroid.x - 0.52).abs() < 0.01);
        assert!((track.prev_centroid.x - 0.50).abs() < 0.01);
    }

    #[test]
    fn distant_detection_spawns_a_new_track() {
        let mut tracker = CentroidTracker::new();
        tracker.update(&[det_at(0, 0.1, 0.1)], &classes(), W, H, &[], None, 1000);
        tracker.update(&[det_at(0, 0.5, 0.5)], &classes(), W, H, &[], None, 1100);

        assert_eq!(tracker.len(), 2);
        let ids: Vec<i64> = tracker.tracks().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn one_track_is_updated_at_most_once_per_batch() {
        let mut tracker = CentroidTracker::new();
        tracker.update(&[det_at(0, 0.50, 0.50)], &classes(), W, H, &[], None, 1000);
        // Two detections both near the single track: the first claims it,
        // the second must spawn a new track.
        tracker.update(
            &[det_at(0, 0.51, 0.50), det_at(0, 0.49, 0.50)],
            &classes(),
            W,
            H,
            &[],
            None,
            1100,
        );
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn stale_tracks_are_evicted_and_reidentified() {
        // Person seen at t=0 and t=100, silence for 2100 ms, then a
        // far-away person must get a fresh id.
        let mut tracker = CentroidTracker::new();
        tracker.update(&[det_at(0, 0.1, 0.1)], &classes(), W, H, &[], None, 0);
        tracker.update(&[det_at(0, 0.1, 0.1)], &classes(), W, H, &[], None, 100);
        assert_eq!(tracker.len(), 1);

        let events = tracker.update(&[det_at(0, 0.9, 0.9)], &classes(), W, H, &[], None, 2200);
        assert!(events.is_empty());
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.tracks().next().unwrap().id, 2);
    }

    #[test]
    fn loitering_fires_once_and_rearms_on_reentry() {
        // Enter at t=1000, dwell through t=10000, exit at t=11000. Exactly
        // one loitering event, at the first update past the 8000 ms dwell.
        let mut tracker = CentroidTracker::new();
        let roi = square_roi();
        let classes = classes();

        // Track born outside the ROI so the enter transition is observed.
        tracker.update(&[det_at(0, 0.1, 0.5)], &classes, W, H, &roi, None, 900);

        let mut loiter_events = 0;
        let mut first_at = 0;
        let mut t = 1000;
        while t <= 10_000 {
            let events = tracker.update(&[det_at(0, 0.5, 0.5)], &classes, W, H, &roi, None, t);
            for event in events {
                if let TrackEvent::Loitering {
                    track_id,
                    label,
                    duration_ms,
                } = event
                {
                    loiter_events += 1;
                    first_at = t;
                    assert_eq!(track_id, 1);
                    assert_eq!(label, "person");
                    assert!(duration_ms >= 8000);
                }
            }
            t += 500;
        }
        assert_eq!(loiter_events, 1);
        assert_eq!(first_at, 9000);

        // Exit, re-enter, dwell again: the alert is rearmed.
        tracker.update(&[det_at(0, 0.1, 0.5)], &classes, W, H, &roi, None, 11_000);
        tracker.update(&[det_at(0, 0.5, 0.5)], &classes, W, H, &roi, None, 11_500);
        let events = tracker.update(&[det_at(0, 0.5, 0.5)], &classes, W, H, &roi, None, 19_600);
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackEvent::Loitering { .. })));
    }

    #[test]
    fn birth_frame_never_crosses_the_tripwire() {
        let mut tracker = CentroidTracker::new();
        let wire = Tripwire::new(NormPoint::new(0.5, 0.0), NormPoint::new(0.5, 1.0));
        let events = tracker.update(
            &[det_at(0, 0.6, 0.5)],
            &classes(),
            W,
            H,
            &[],
            Some(&wire),
            100_000,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn crossing_direction_and_per_track_debounce() {
        let mut tracker = CentroidTracker::new();
        let wire = Tripwire::new(NormPoint::new(0.5, 0.0), NormPoint::new(0.5, 1.0));
        let classes = classes();

        tracker.update(&[det_at(0, 0.46, 0.5)], &classes, W, H, &[], Some(&wire), 100_000);
        let events = tracker.update(
            &[det_at(0, 0.54, 0.5)],
            &classes,
            W,
            H,
            &[],
            Some(&wire),
            100_200,
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            TrackEvent::TripwireCrossed {
                track_id,
                label,
                direction,
            } => {
                assert_eq!(*track_id, 1);
                assert_eq!(label, "person");
                // Wire points down the frame; for this geometry a left-of-wire
                // to right-of-wire move is a negative-to-positive side flip.
                assert_eq!(direction.as_str(), "left to right");
            }
            _ => panic!("expected a tripwire event"),
        }
        assert_eq!(tracker.len(), 1);

        // Crossing back within 2000 ms of the alert is debounced.
        let events = tracker.update(
            &[det_at(0, 0.46, 0.5)],
            &classes,
            W,
            H,
            &[],
            Some(&wire),
            100_900,
        );
        assert!(events.is_empty());

        // Once the window expires the same track may alert again, and the
        // opposite flip reports the other direction string.
        let events = tracker.update(
            &[det_at(0, 0.54, 0.5)],
            &classes,
            W,
            H,
            &[],
            Some(&wire),
            103_000,
        );
        assert_eq!(events.len(), 1);
        tracker.update(&[det_at(0, 0.54, 0.5)], &classes, W, H, &[], Some(&wire), 105_500);
        let events = tracker.update(
            &[det_at(0, 0.46, 0.5)],
            &classes,
            W,
            H,
            &[],
            Some(&wire),
            105_600,
        );
        match &events[0] {
            TrackEvent::TripwireCrossed { direction, .. } => {
                assert_eq!(direction.as_str(), "right to left");
            }
            _ => panic!("expected a tripwire event"),
        }
    }

    #[test]
    fn no_match_beyond_max_distance() {
        let mut tracker = CentroidTracker::new();
        tracker.update(&[det_at(0, 0.50, 0.50)], &classes(), W, H, &[], None, 1000);
        // 0.11 away in x: beyond the 0.1 matching radius.
        tracker.update(&[det_at(0, 0.61, 0.50)], &classes(), W, H, &[], None, 1100);
        assert_eq!(tracker.len(), 2);
    }
}
