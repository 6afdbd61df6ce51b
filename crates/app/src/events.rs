//! Fan-in from the per-camera pipelines to the alert aggregator.
//!
//! Every pipeline worker posts [`PipelineEvent`]s into one shared channel; a
//! single router thread linearizes them into the [`AlertLog`]. Frames arrive
//! by value, so producers keep no claim on emitted buffers.

use std::{
    sync::{Arc, Mutex},
    thread::JoinHandle,
};

use crossbeam_channel::Receiver;
use tracing::{info, warn};
use video_ingest::Frame;

use crate::{alerts::AlertLog, telemetry};

/// Events emitted by pipeline workers.
///
/// `snapshot` carries a copy of the triggering frame when the pipeline's
/// matching auto-snapshot flag was set at emission time.
pub enum PipelineEvent {
    Motion {
        camera: String,
        score: f64,
        snapshot: Option<Frame>,
    },
    RoiMotion {
        camera: String,
        score: f64,
        snapshot: Option<Frame>,
    },
    /// Whole-mask centroid crossing; positive direction means the centroid
    /// ended on the positive side of the line.
    TripwireCrossed {
        camera: String,
        direction: i32,
        snapshot: Option<Frame>,
    },
    TrackTripwire {
        camera: String,
        track_id: i64,
        label: String,
        direction: &'static str,
        snapshot: Option<Frame>,
    },
    Loitering {
        camera: String,
        track_id: i64,
        label: String,
        duration_ms: i64,
        snapshot: Option<Frame>,
    },
    SnapshotTaken {
        camera: String,
        frame: Frame,
    },
    SnapshotSaved {
        camera: String,
        path: String,
        frame: Frame,
    },
    SnapshotFailed {
        camera: String,
        reason: String,
    },
    SourceError {
        camera: String,
        message: String,
    },
}

/// Spawn the router thread; it exits when every event sender is dropped.
pub fn spawn_alert_router(
    rx: Receiver<PipelineEvent>,
    log: Arc<Mutex<AlertLog>>,
) -> JoinHandle<()> {
    telemetry::spawn_thread("alert-router", move || {
        while let Ok(event) = rx.recv() {
            if let Ok(mut log) = log.lock() {
                route(&mut log, event);
            }
        }
        info!("alert router stopped");
    })
    .expect("failed to spawn alert router thread")
}

fn route(log: &mut AlertLog, event: PipelineEvent) {
    match event {
        PipelineEvent::Motion {
            camera,
            score,
            snapshot,
        } => {
            log.add_motion_alert(&camera, format!("Motion detected (score: {score:.1})"));
            if let Some(frame) = snapshot {
                log.add_snapshot_alert(&camera, frame);
            }
        }
        PipelineEvent::RoiMotion {
            camera,
            score,
            snapshot,
        } => {
            log.add_roi_motion_alert(&camera, format!("Motion in ROI (score: {score:.1})"));
            if let Some(frame) = snapshot {
                log.add_snapshot_alert(&camera, frame);
            }
        }
        PipelineEvent::TripwireCrossed {
            camera,
            direction,
            snapshot,
        } => {
            let dir_text = if direction > 0 { "forward" } else { "backward" };
            log.add_tripwire_alert(&camera, format!("Tripwire crossed ({dir_text})"));
            if let Some(frame) = snapshot {
                log.add_snapshot_alert(&camera, frame);
            }
        }
        PipelineEvent::TrackTripwire {
            camera,
            track_id,
            label,
            direction,
            snapshot,
        } => {
            log.add_tripwire_alert(
                &camera,
                format!("Track {track_id} ({label}) crossed tripwire ({direction})"),
            );
            if let Some(frame) = snapshot {
                log.add_snapshot_alert(&camera, frame);
            }
        }
        PipelineEvent::Loitering {
            camera,
            track_id,
            label,
            duration_ms,
            snapshot,
        } => {
            let seconds = duration_ms as f64 / 1000.0;
            log.add_loitering_alert(
                &camera,
                format!("Track {track_id} ({label}) loitering: stayed in ROI for {seconds:.1} seconds"),
            );
            if let Some(frame) = snapshot {
                log.add_snapshot_alert(&camera, frame);
            }
        }
        PipelineEvent::SnapshotTaken { camera, frame } => {
            log.add_snapshot_alert(&camera, frame);
        }
        PipelineEvent::SnapshotSaved {
            camera,
            path,
            frame,
        } => {
            log.add_saved_snapshot_alert(&camera, &path, frame);
        }
        PipelineEvent::SnapshotFailed { camera, reason } => {
            warn!(camera, reason, "snapshot failed");
        }
        PipelineEvent::SourceError { camera, message } => {
            warn!(camera, error = %message, "pipeline source error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertKind;
    use crate::context::testing::manual_context;
    use crossbeam_channel::unbounded;

    const BASE_MS: i64 = 1_714_910_400_000;

    fn routed(events: Vec<PipelineEvent>) -> Arc<Mutex<AlertLog>> {
        let (_clock, ctx) = manual_context(BASE_MS, std::env::temp_dir());
        let log = Arc::new(Mutex::new(AlertLog::new(ctx.clock)));

        let (tx, rx) = unbounded();
        let handle = spawn_alert_router(rx, log.clone());
        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);
        handle.join().unwrap();
        log
    }

    #[test]
    fn motion_event_becomes_a_motion_alert() {
        let log = routed(vec![PipelineEvent::Motion {
            camera: "Front Door".into(),
            score: 12.34,
            snapshot: None,
        }]);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let alert = log.get(0).unwrap();
        assert_eq!(alert.kind, AlertKind::Motion);
        assert_eq!(alert.message, "Motion detected (score: 12.3)");
        assert_eq!(alert.camera_name, "Front Door");
    }

    #[test]
    fn auto_snapshot_adds_a_companion_alert() {
        let log = routed(vec![PipelineEvent::RoiMotion {
            camera: "Yard".into(),
            score: 8.0,
            snapshot: Some(Frame::new(4, 4, BASE_MS)),
        }]);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(0).unwrap().kind, AlertKind::MotionRoi);
        assert_eq!(log.get(0).unwrap().message, "Motion in ROI (score: 8.0)");
        let snap = log.get(1).unwrap();
        assert_eq!(snap.kind, AlertKind::Snapshot);
        assert!(snap.has_image());
    }

    #[test]
    fn track_events_carry_identity_in_the_message() {
        let log = routed(vec![
            PipelineEvent::TrackTripwire {
                camera: "Gate".into(),
                track_id: 7,
                label: "person".into(),
                direction: "left to right",
                snapshot: None,
            },
            PipelineEvent::Loitering {
                camera: "Gate".into(),
                track_id: 7,
                label: "person".into(),
                duration_ms: 8500,
                snapshot: None,
            },
        ]);

        let log = log.lock().unwrap();
        assert_eq!(
            log.get(0).unwrap().message,
            "Track 7 (person) crossed tripwire (left to right)"
        );
        assert_eq!(
            log.get(1).unwrap().message,
            "Track 7 (person) loitering: stayed in ROI for 8.5 seconds"
        );
    }

    #[test]
    fn centroid_tripwire_direction_text() {
        let log = routed(vec![
            PipelineEvent::TripwireCrossed {
                camera: "Gate".into(),
                direction: 1,
                snapshot: None,
            },
            PipelineEvent::TripwireCrossed {
                camera: "Gate".into(),
                direction: -1,
                snapshot: None,
            },
        ]);

        let log = log.lock().unwrap();
        assert_eq!(log.get(0).unwrap().message, "Tripwire crossed (forward)");
        assert_eq!(log.get(1).unwrap().message, "Tripwire crossed (backward)");
    }

    #[test]
    fn saved_snapshot_keeps_path_and_errors_add_nothing() {
        let log = routed(vec![
            PipelineEvent::SnapshotSaved {
                camera: "A".into(),
                path: "/tmp/a.png".into(),
                frame: Frame::new(4, 4, BASE_MS),
            },
            PipelineEvent::SourceError {
                camera: "A".into(),
                message: "gone".into(),
            },
            PipelineEvent::SnapshotFailed {
                camera: "A".into(),
                reason: "no frame".into(),
            },
        ]);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let alert = log.get(0).unwrap();
        assert_eq!(alert.snapshot_path, "/tmp/a.png");
        assert_eq!(alert.message, "Snapshot saved");
    }
}
