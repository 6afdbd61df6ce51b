//! Per-camera analytics pipeline.
//!
//! Each pipeline owns one worker thread running the capture → motion →
//! detect → track → behavior sequence strictly in order. The control side
//! talks to the worker through single-word atomics (simple toggles), a
//! command queue (complex setters), and two short-lived locks publishing the
//! latest frame and detection list.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use analytics::{CentroidTracker, GaussianBackground, MotionDetector, MotionEvent, NormPoint, TrackEvent, Tripwire};
use crossbeam_channel::{Receiver, Sender};
use detect_core::{ObjectDetector, AI_PROCESS_INTERVAL};
use tracing::{debug, error, info, warn};
use video_ingest::{CaptureError, Frame, SourceEvent, SourceReceiver};

use crate::{
    config::{CameraConfig, SourceKind},
    context::Context,
    events::PipelineEvent,
    imaging, telemetry,
};

/// How long the transient "alert active" flags stay up after an emission.
pub const ALERT_ACTIVE_WINDOW_MS: i64 = 2000;

/// A detection backend shared across pipelines.
pub type SharedDetector = Arc<Mutex<dyn ObjectDetector>>;

/// Detection as published to the control side: normalized box plus label.
#[derive(Debug, Clone)]
pub struct DetectionView {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub class_id: i64,
    pub score: f32,
    pub label: String,
}

/// Complex setters delivered to the worker between frames.
enum PipelineCommand {
    SetRoi(Vec<NormPoint>),
    ClearRoi,
    SetTripwire(Tripwire),
    ClearTripwire,
    SetDetector(Option<SharedDetector>),
    SetCentroidTripwire(bool),
}

/// Retained policy applied to a fresh worker on (re)start.
#[derive(Default)]
struct Policy {
    roi: Vec<NormPoint>,
    tripwire: Option<Tripwire>,
    detector: Option<SharedDetector>,
    centroid_tripwire: bool,
}

/// State shared between the worker and the control side.
struct PipelineShared {
    running: AtomicBool,
    status: Mutex<String>,
    fps_bits: AtomicU64,
    latest_frame: Mutex<Option<Frame>>,
    detections: Mutex<Vec<DetectionView>>,
    motion_enabled: AtomicBool,
    motion_sensitivity_bits: AtomicU64,
    ai_enabled: AtomicBool,
    ai_confidence_bits: AtomicU32,
    auto_snapshot_motion: AtomicBool,
    auto_snapshot_roi: AtomicBool,
    auto_snapshot_tripwire: AtomicBool,
    last_motion_emit_ms: AtomicI64,
    last_roi_emit_ms: AtomicI64,
    last_tripwire_emit_ms: AtomicI64,
}

impl PipelineShared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            status: Mutex::new("Stopped".to_string()),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            latest_frame: Mutex::new(None),
            detections: Mutex::new(Vec::new()),
            motion_enabled: AtomicBool::new(false),
            motion_sensitivity_bits: AtomicU64::new(50f64.to_bits()),
            ai_enabled: AtomicBool::new(false),
            ai_confidence_bits: AtomicU32::new(0.5f32.to_bits()),
            auto_snapshot_motion: AtomicBool::new(false),
            auto_snapshot_roi: AtomicBool::new(false),
            auto_snapshot_tripwire: AtomicBool::new(false),
            last_motion_emit_ms: AtomicI64::new(0),
            last_roi_emit_ms: AtomicI64::new(0),
            last_tripwire_emit_ms: AtomicI64::new(0),
        }
    }

    fn set_status(&self, status: impl Into<String>) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status.into();
        }
    }
}

/// One camera slot's pipeline: configuration, shared state, and the worker.
pub struct CameraPipeline {
    id: String,
    name: String,
    kind: SourceKind,
    source: String,
    ctx: Context,
    shared: Arc<PipelineShared>,
    policy: Mutex<Policy>,
    cmd_tx: Sender<PipelineCommand>,
    cmd_rx: Receiver<PipelineCommand>,
    events: Sender<PipelineEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CameraPipeline {
    /// Build a pipeline from its camera slot config. ROI and tripwire from
    /// the config become the initial worker policy.
    pub fn new(
        config: &CameraConfig,
        ctx: Context,
        events: Sender<PipelineEvent>,
        detector: Option<SharedDetector>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let policy = Policy {
            roi: config
                .effective_roi()
                .map(<[NormPoint]>::to_vec)
                .unwrap_or_default(),
            tripwire: config.effective_tripwire(),
            detector,
            centroid_tripwire: true,
        };

        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            kind: config.kind,
            source: config.source.clone(),
            ctx,
            shared: Arc::new(PipelineShared::new()),
            policy: Mutex::new(policy),
            cmd_tx,
            cmd_rx,
            events,
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_kind(&self) -> SourceKind {
        self.kind
    }

    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn fps(&self) -> f64 {
        f64::from_bits(self.shared.fps_bits.load(Ordering::Relaxed))
    }

    pub fn status(&self) -> String {
        self.shared
            .status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Copy of the most recent frame, if one has been captured.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared.latest_frame.lock().ok().and_then(|g| g.clone())
    }

    /// Copy of the current detection list.
    pub fn detections(&self) -> Vec<DetectionView> {
        self.shared
            .detections
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn motion_active(&self) -> bool {
        self.flag_active(&self.shared.last_motion_emit_ms)
    }

    pub fn roi_alert_active(&self) -> bool {
        self.flag_active(&self.shared.last_roi_emit_ms)
    }

    pub fn tripwire_alert_active(&self) -> bool {
        self.flag_active(&self.shared.last_tripwire_emit_ms)
    }

    fn flag_active(&self, last: &AtomicI64) -> bool {
        let last = last.load(Ordering::Relaxed);
        last != 0 && self.ctx.clock.now_ms() - last < ALERT_ACTIVE_WINDOW_MS
    }

    pub fn set_motion_enabled(&self, enabled: bool) {
        self.shared.motion_enabled.store(enabled, Ordering::Relaxed);
        debug!(camera = %self.name, enabled, "motion detection toggled");
    }

    pub fn motion_enabled(&self) -> bool {
        self.shared.motion_enabled.load(Ordering::Relaxed)
    }

    pub fn set_motion_sensitivity(&self, sensitivity: f64) {
        let clamped = sensitivity.clamp(0.0, 100.0);
        self.shared
            .motion_sensitivity_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn motion_sensitivity(&self) -> f64 {
        f64::from_bits(self.shared.motion_sensitivity_bits.load(Ordering::Relaxed))
    }

    pub fn set_ai_enabled(&self, enabled: bool) {
        self.shared.ai_enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            if let Ok(mut detections) = self.shared.detections.lock() {
                detections.clear();
            }
        }
        debug!(camera = %self.name, enabled, "ai detection toggled");
    }

    pub fn ai_enabled(&self) -> bool {
        self.shared.ai_enabled.load(Ordering::Relaxed)
    }

    pub fn set_ai_confidence(&self, threshold: f32) {
        let clamped = threshold.clamp(0.0, 1.0);
        self.shared
            .ai_confidence_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn ai_confidence(&self) -> f32 {
        f32::from_bits(self.shared.ai_confidence_bits.load(Ordering::Relaxed))
    }

    pub fn set_auto_snapshot_motion(&self, enabled: bool) {
        self.shared
            .auto_snapshot_motion
            .store(enabled, Ordering::Relaxed);
    }

    pub fn set_auto_snapshot_roi(&self, enabled: bool) {
        self.shared
            .auto_snapshot_roi
            .store(enabled, Ordering::Relaxed);
    }

    pub fn set_auto_snapshot_tripwire(&self, enabled: bool) {
        self.shared
            .auto_snapshot_tripwire
            .store(enabled, Ordering::Relaxed);
    }

    pub fn set_roi(&self, points: Vec<NormPoint>) {
        if let Ok(mut policy) = self.policy.lock() {
            policy.roi = points.clone();
        }
        let _ = self.cmd_tx.send(PipelineCommand::SetRoi(points));
    }

    pub fn clear_roi(&self) {
        if let Ok(mut policy) = self.policy.lock() {
            policy.roi.clear();
        }
        let _ = self.cmd_tx.send(PipelineCommand::ClearRoi);
    }

    pub fn set_tripwire(&self, wire: Tripwire) {
        if let Ok(mut policy) = self.policy.lock() {
            policy.tripwire = Some(wire);
        }
        let _ = self.cmd_tx.send(PipelineCommand::SetTripwire(wire));
    }

    pub fn clear_tripwire(&self) {
        if let Ok(mut policy) = self.policy.lock() {
            policy.tripwire = None;
        }
        let _ = self.cmd_tx.send(PipelineCommand::ClearTripwire);
    }

    pub fn set_detector(&self, detector: Option<SharedDetector>) {
        if let Ok(mut policy) = self.policy.lock() {
            policy.detector = detector.clone();
        }
        let _ = self.cmd_tx.send(PipelineCommand::SetDetector(detector));
    }

    /// Toggle the mask-centroid tripwire heuristic (the per-track detector
    /// keeps running either way).
    pub fn set_centroid_tripwire(&self, enabled: bool) {
        if let Ok(mut policy) = self.policy.lock() {
            policy.centroid_tripwire = enabled;
        }
        let _ = self
            .cmd_tx
            .send(PipelineCommand::SetCentroidTripwire(enabled));
    }

    /// Start the worker. Idempotent while running.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.set_status("Starting...");

        let worker = Worker {
            camera: self.name.clone(),
            kind: self.kind,
            source: self.source.clone(),
            ctx: self.ctx.clone(),
            shared: self.shared.clone(),
            cmd_rx: self.cmd_rx.clone(),
            events: self.events.clone(),
            policy: self.snapshot_policy(),
        };
        let handle = telemetry::spawn_thread(format!("pipeline-{}", self.id), move || {
            worker.run();
        })
        .expect("failed to spawn pipeline worker");

        if let Ok(mut guard) = self.worker.lock() {
            *guard = Some(handle);
        }
        info!(camera = %self.name, source = %self.source, "pipeline started");
    }

    /// Request termination and join the worker. Idempotent; also reaps a
    /// worker that self-stopped on error.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        let handle = self.worker.lock().ok().and_then(|mut g| g.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        if was_running {
            self.shared.set_status("Stopped");
            self.shared.fps_bits.store(0f64.to_bits(), Ordering::Relaxed);
            info!(camera = %self.name, "pipeline stopped");
        }
    }

    /// Emit the current frame as a snapshot alert, without disk I/O.
    pub fn take_snapshot(&self) -> bool {
        if !self.running() {
            warn!(camera = %self.name, "cannot take snapshot: camera not running");
            return false;
        }
        let Some(frame) = self.latest_frame() else {
            warn!(camera = %self.name, "cannot take snapshot: no frame available");
            return false;
        };
        let _ = self.events.send(PipelineEvent::SnapshotTaken {
            camera: self.name.clone(),
            frame,
        });
        true
    }

    /// Write the current frame under `dir` as
    /// `<name with spaces→'_'>_<yyyyMMdd_HHmmss>.png` and emit an alert.
    pub fn save_snapshot(&self, dir: &Path) -> bool {
        let Some(frame) = self.latest_frame() else {
            let _ = self.events.send(PipelineEvent::SnapshotFailed {
                camera: self.name.clone(),
                reason: "No frame available".to_string(),
            });
            return false;
        };

        let filename = format!(
            "{}_{}.png",
            self.name.replace(' ', "_"),
            self.ctx.clock.now().format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(filename);

        match imaging::save_png(&frame, &path) {
            Ok(()) => {
                info!(camera = %self.name, path = %path.display(), "snapshot saved");
                let _ = self.events.send(PipelineEvent::SnapshotSaved {
                    camera: self.name.clone(),
                    path: path.display().to_string(),
                    frame,
                });
                true
            }
            Err(err) => {
                warn!(camera = %self.name, %err, "failed to save snapshot");
                let _ = self.events.send(PipelineEvent::SnapshotFailed {
                    camera: self.name.clone(),
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    fn snapshot_policy(&self) -> Policy {
        match self.policy.lock() {
            Ok(policy) => Policy {
                roi: policy.roi.clone(),
                tripwire: policy.tripwire,
                detector: policy.detector.clone(),
                centroid_tripwire: policy.centroid_tripwire,
            },
            Err(_) => Policy::default(),
        }
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the worker thread owns.
struct Worker {
    camera: String,
    kind: SourceKind,
    source: String,
    ctx: Context,
    shared: Arc<PipelineShared>,
    cmd_rx: Receiver<PipelineCommand>,
    events: Sender<PipelineEvent>,
    policy: Policy,
}

impl Worker {
    fn run(self) {
        let receiver = match spawn_source(self.kind, &self.source) {
            Ok(rx) => rx,
            Err(err) => {
                self.fail(format!("Failed to open camera: {err}"));
                return;
            }
        };

        let mut motion = MotionDetector::new(Box::new(GaussianBackground::new()));
        motion.set_roi(self.policy.roi.clone());
        if let Some(wire) = self.policy.tripwire {
            motion.set_tripwire(wire);
        }
        motion.set_centroid_tripwire_enabled(self.policy.centroid_tripwire);

        let mut roi = self.policy.roi.clone();
        let mut tripwire = self.policy.tripwire;
        let mut detector = self.policy.detector.clone();
        let mut class_names = cached_class_names(detector.as_ref());

        let mut tracker = CentroidTracker::new();
        let mut ai_frame_counter: u32 = 0;
        let mut announced_running = false;

        while self.shared.running.load(Ordering::SeqCst) {
            while let Ok(cmd) = self.cmd_rx.try_recv() {
                match cmd {
                    PipelineCommand::SetRoi(points) => {
                        debug!(camera = %self.camera, points = points.len(), "roi updated");
                        motion.set_roi(points.clone());
                        roi = points;
                    }
                    PipelineCommand::ClearRoi => {
                        motion.clear_roi();
                        roi.clear();
                    }
                    PipelineCommand::SetTripwire(wire) => {
                        motion.set_tripwire(wire);
                        tripwire = Some(wire);
                    }
                    PipelineCommand::ClearTripwire => {
                        motion.clear_tripwire();
                        tripwire = None;
                    }
                    PipelineCommand::SetDetector(handle) => {
                        class_names = cached_class_names(handle.as_ref());
                        detector = handle;
                        ai_frame_counter = 0;
                    }
                    PipelineCommand::SetCentroidTripwire(enabled) => {
                        motion.set_centroid_tripwire_enabled(enabled);
                    }
                }
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(SourceEvent::Frame(frame))) => {
                    if !announced_running {
                        self.shared.set_status("Running");
                        announced_running = true;
                    }
                    self.process_frame(
                        frame,
                        &mut motion,
                        &mut tracker,
                        &mut ai_frame_counter,
                        detector.as_ref(),
                        &class_names,
                        &roi,
                        tripwire.as_ref(),
                    );
                }
                Ok(Ok(SourceEvent::Fps(fps))) => {
                    self.shared.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
                    metrics::gauge!("sentinel_pipeline_fps", "camera" => self.camera.clone())
                        .set(fps);
                }
                Ok(Err(err)) => {
                    self.fail(error_text(&err));
                    return;
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    self.fail("capture channel closed".to_string());
                    return;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_frame(
        &self,
        frame: Frame,
        motion: &mut MotionDetector,
        tracker: &mut CentroidTracker,
        ai_frame_counter: &mut u32,
        detector: Option<&SharedDetector>,
        class_names: &[String],
        roi: &[NormPoint],
        tripwire: Option<&Tripwire>,
    ) {
        let now_ms = self.ctx.clock.now_ms();
        metrics::counter!("sentinel_frames_total", "camera" => self.camera.clone()).increment(1);

        if self.shared.motion_enabled.load(Ordering::Relaxed) {
            let sensitivity =
                f64::from_bits(self.shared.motion_sensitivity_bits.load(Ordering::Relaxed));
            motion.set_sensitivity(sensitivity);

            for event in motion.process(&frame, now_ms) {
                self.emit_motion_event(event, &frame, now_ms);
            }
        }

        if self.shared.ai_enabled.load(Ordering::Relaxed) {
            if let Some(detector) = detector {
                *ai_frame_counter += 1;
                if *ai_frame_counter >= AI_PROCESS_INTERVAL {
                    *ai_frame_counter = 0;
                    self.run_inference(
                        detector,
                        class_names,
                        &frame,
                        tracker,
                        roi,
                        tripwire,
                        now_ms,
                    );
                }
            }
        }

        if let Ok(mut latest) = self.shared.latest_frame.lock() {
            *latest = Some(frame);
        }
    }

    fn emit_motion_event(&self, event: MotionEvent, frame: &Frame, now_ms: i64) {
        match event {
            MotionEvent::Motion { score, frame: copy } => {
                self.shared
                    .last_motion_emit_ms
                    .store(now_ms, Ordering::Relaxed);
                let snapshot = self
                    .shared
                    .auto_snapshot_motion
                    .load(Ordering::Relaxed)
                    .then_some(copy);
                let _ = self.events.send(PipelineEvent::Motion {
                    camera: self.camera.clone(),
                    score,
                    snapshot,
                });
            }
            MotionEvent::RoiMotion { score } => {
                self.shared
                    .last_roi_emit_ms
                    .store(now_ms, Ordering::Relaxed);
                let snapshot = self
                    .shared
                    .auto_snapshot_roi
                    .load(Ordering::Relaxed)
                    .then(|| frame.clone());
                let _ = self.events.send(PipelineEvent::RoiMotion {
                    camera: self.camera.clone(),
                    score,
                    snapshot,
                });
            }
            MotionEvent::TripwireCrossed { direction } => {
                self.shared
                    .last_tripwire_emit_ms
                    .store(now_ms, Ordering::Relaxed);
                let snapshot = self
                    .shared
                    .auto_snapshot_tripwire
                    .load(Ordering::Relaxed)
                    .then(|| frame.clone());
                let _ = self.events.send(PipelineEvent::TripwireCrossed {
                    camera: self.camera.clone(),
                    direction,
                    snapshot,
                });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_inference(
        &self,
        detector: &SharedDetector,
        class_names: &[String],
        frame: &Frame,
        tracker: &mut CentroidTracker,
        roi: &[NormPoint],
        tripwire: Option<&Tripwire>,
        now_ms: i64,
    ) {
        let detections = {
            let Ok(mut detector) = detector.lock() else {
                return;
            };
            if !detector.is_loaded() {
                return;
            }
            detector
                .set_confidence_threshold(f32::from_bits(
                    self.shared.ai_confidence_bits.load(Ordering::Relaxed),
                ));
            match detector.infer(frame) {
                Ok(detections) => detections,
                Err(err) => {
                    // Inference faults drop the frame from the AI path only.
                    error!(camera = %self.camera, %err, "inference failed");
                    return;
                }
            }
        };

        let detections: Vec<_> = detections
            .into_iter()
            .map(|d| d.clamped(frame.width, frame.height))
            .collect();

        self.publish_detections(&detections, class_names, frame);

        let events = tracker.update(
            &detections,
            class_names,
            frame.width,
            frame.height,
            roi,
            tripwire,
            now_ms,
        );
        for event in events {
            self.emit_track_event(event, frame, now_ms);
        }
    }

    fn publish_detections(
        &self,
        detections: &[detect_core::Detection],
        class_names: &[String],
        frame: &Frame,
    ) {
        let (w, h) = (frame.width as f64, frame.height as f64);
        let views: Vec<DetectionView> = detections
            .iter()
            .map(|d| DetectionView {
                x: d.bbox[0] as f64 / w,
                y: d.bbox[1] as f64 / h,
                width: d.bbox[2] as f64 / w,
                height: d.bbox[3] as f64 / h,
                class_id: d.class_id,
                score: d.score,
                label: usize::try_from(d.class_id)
                    .ok()
                    .and_then(|id| class_names.get(id))
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
            })
            .collect();

        if let Ok(mut published) = self.shared.detections.lock() {
            *published = views;
        }
    }

    fn emit_track_event(&self, event: TrackEvent, frame: &Frame, now_ms: i64) {
        match event {
            TrackEvent::Loitering {
                track_id,
                label,
                duration_ms,
            } => {
                let snapshot = self
                    .shared
                    .auto_snapshot_roi
                    .load(Ordering::Relaxed)
                    .then(|| frame.clone());
                let _ = self.events.send(PipelineEvent::Loitering {
                    camera: self.camera.clone(),
                    track_id,
                    label,
                    duration_ms,
                    snapshot,
                });
            }
            TrackEvent::TripwireCrossed {
                track_id,
                label,
                direction,
            } => {
                self.shared
                    .last_tripwire_emit_ms
                    .store(now_ms, Ordering::Relaxed);
                let snapshot = self
                    .shared
                    .auto_snapshot_tripwire
                    .load(Ordering::Relaxed)
                    .then(|| frame.clone());
                let _ = self.events.send(PipelineEvent::TrackTripwire {
                    camera: self.camera.clone(),
                    track_id,
                    label,
                    direction: direction.as_str(),
                    snapshot,
                });
            }
        }
    }

    /// Transition to the error state and report once.
    fn fail(&self, message: String) {
        error!(camera = %self.camera, error = %message, "pipeline error");
        self.shared.set_status(format!("Error: {message}"));
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.fps_bits.store(0f64.to_bits(), Ordering::Relaxed);
        let _ = self.events.send(PipelineEvent::SourceError {
            camera: self.camera.clone(),
            message,
        });
    }
}

fn cached_class_names(detector: Option<&SharedDetector>) -> Vec<String> {
    detector
        .and_then(|d| d.lock().ok().map(|d| d.class_names().to_vec()))
        .unwrap_or_default()
}

fn error_text(err: &CaptureError) -> String {
    match err {
        CaptureError::Open { uri } => format!("Failed to open camera: {uri}"),
        other => other.to_string(),
    }
}

/// Open the capture backend matching the configured source kind.
fn spawn_source(kind: SourceKind, source: &str) -> anyhow::Result<SourceReceiver> {
    match kind {
        SourceKind::Sim => {
            video_ingest::spawn_sim_reader(video_ingest::CAPTURE_WIDTH, video_ingest::CAPTURE_HEIGHT)
        }
        #[cfg(feature = "opencv-capture")]
        SourceKind::Usb | SourceKind::Rtsp | SourceKind::Ip => video_ingest::spawn_capture_reader(
            source,
            (video_ingest::CAPTURE_WIDTH, video_ingest::CAPTURE_HEIGHT),
        ),
        #[cfg(not(feature = "opencv-capture"))]
        SourceKind::Usb | SourceKind::Rtsp | SourceKind::Ip => anyhow::bail!(
            "source {source:?} needs the opencv-capture feature; only sim sources are built in"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crossbeam_channel::unbounded;
    use detect_core::{Detection, ScriptedDetector};
    use std::time::Instant;
    use tempfile::tempdir;

    fn sim_config() -> CameraConfig {
        CameraConfig {
            id: "cam1".to_string(),
            name: "Sim Cam".to_string(),
            kind: SourceKind::Sim,
            source: "sim".to_string(),
            enabled: true,
            ..CameraConfig::fallback()
        }
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(deadline_ms) {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn sim_pipeline_reaches_running_and_stops_cleanly() {
        let (tx, _rx) = unbounded();
        let ctx = Context::system(std::env::temp_dir());
        let pipeline = CameraPipeline::new(&sim_config(), ctx, tx, None);

        assert_eq!(pipeline.status(), "Stopped");
        pipeline.start();
        pipeline.start(); // idempotent

        assert!(wait_until(3000, || pipeline.latest_frame().is_some()));
        assert_eq!(pipeline.status(), "Running");
        assert!(pipeline.running());
        assert!(wait_until(3000, || pipeline.fps() > 0.0));

        pipeline.stop();
        pipeline.stop(); // idempotent
        assert!(!pipeline.running());
        assert_eq!(pipeline.status(), "Stopped");
        assert_eq!(pipeline.fps(), 0.0);
    }

    #[test]
    fn snapshot_requires_a_running_camera() {
        let (tx, rx) = unbounded();
        let ctx = Context::system(std::env::temp_dir());
        let pipeline = CameraPipeline::new(&sim_config(), ctx, tx, None);

        assert!(!pipeline.take_snapshot());
        assert!(rx.try_recv().is_err());

        pipeline.start();
        assert!(wait_until(3000, || pipeline.latest_frame().is_some()));
        assert!(pipeline.take_snapshot());
        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(event, PipelineEvent::SnapshotTaken { .. }));
        pipeline.stop();
    }

    #[test]
    fn save_snapshot_writes_png_and_emits_event() {
        let dir = tempdir().unwrap();
        let (tx, rx) = unbounded();
        let ctx = Context::system(std::env::temp_dir());
        let pipeline = CameraPipeline::new(&sim_config(), ctx, tx, None);

        // Without a frame, the failure is reported as an event.
        assert!(!pipeline.save_snapshot(dir.path()));
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            PipelineEvent::SnapshotFailed { .. }
        ));

        pipeline.start();
        assert!(wait_until(3000, || pipeline.latest_frame().is_some()));
        assert!(pipeline.save_snapshot(dir.path()));

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            PipelineEvent::SnapshotSaved { path, .. } => {
                assert!(path.contains("Sim_Cam_"));
                assert!(std::path::Path::new(&path).is_file());
            }
            _ => panic!("expected SnapshotSaved"),
        }
        pipeline.stop();
    }

    #[test]
    fn ai_path_publishes_normalized_detections() {
        let (tx, _rx) = unbounded();
        let ctx = Context::system(std::env::temp_dir());

        let mut scripted = ScriptedDetector::new(&["person"]);
        for _ in 0..200 {
            scripted.push_result(vec![Detection {
                class_id: 0,
                score: 0.9,
                bbox: [100.0, 100.0, 40.0, 80.0],
            }]);
        }
        let detector: SharedDetector = Arc::new(Mutex::new(scripted));

        let pipeline = CameraPipeline::new(&sim_config(), ctx, tx, Some(detector));
        pipeline.set_ai_enabled(true);
        pipeline.start();

        assert!(wait_until(5000, || !pipeline.detections().is_empty()));
        let views = pipeline.detections();
        assert_eq!(views[0].label, "person");
        assert!(views[0].x > 0.0 && views[0].x < 1.0);
        assert!(views[0].width > 0.0 && views[0].width < 1.0);

        // Disabling AI clears the published list; re-clear while polling in
        // case one in-flight publish lands after the first clear.
        assert!(wait_until(2000, || {
            pipeline.set_ai_enabled(false);
            pipeline.detections().is_empty()
        }));
        pipeline.stop();
    }

    #[test]
    fn capability_setters_clamp_their_ranges() {
        let (tx, _rx) = unbounded();
        let ctx = Context::system(std::env::temp_dir());
        let pipeline = CameraPipeline::new(&sim_config(), ctx, tx, None);

        pipeline.set_motion_sensitivity(250.0);
        assert_eq!(pipeline.motion_sensitivity(), 100.0);
        pipeline.set_motion_sensitivity(-4.0);
        assert_eq!(pipeline.motion_sensitivity(), 0.0);

        pipeline.set_ai_confidence(7.0);
        assert_eq!(pipeline.ai_confidence(), 1.0);

        assert!(!pipeline.motion_active());
        assert!(!pipeline.roi_alert_active());
        assert!(!pipeline.tripwire_alert_active());
    }

    #[cfg(not(feature = "opencv-capture"))]
    #[test]
    fn unbuildable_source_lands_in_error_state() {
        let (tx, rx) = unbounded();
        let ctx = Context::system(std::env::temp_dir());
        let mut config = sim_config();
        config.kind = SourceKind::Usb;
        config.source = "0".to_string();
        let pipeline = CameraPipeline::new(&config, ctx, tx, None);

        pipeline.start();
        assert!(wait_until(3000, || !pipeline.running()));
        assert!(pipeline.status().starts_with("Error:"), "{}", pipeline.status());
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            PipelineEvent::SourceError { .. }
        ));
        pipeline.stop();
    }
}
