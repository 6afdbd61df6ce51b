//! Alert aggregator: the single ordered list of alerts from every pipeline,
//! with change notifications and CSV/JSON/PNG export.

use std::{
    fs,
    io::Write,
    path::Path,
    sync::Arc,
};

use chrono::{DateTime, Local, SecondsFormat};
use thiserror::Error;
use tracing::{debug, warn};
use video_ingest::Frame;

use crate::{context::Clock, imaging};

/// Alert category; decides the default message and export `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Snapshot,
    Motion,
    MotionRoi,
    Tripwire,
    Loitering,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Snapshot => "snapshot",
            AlertKind::Motion => "motion",
            AlertKind::MotionRoi => "motion_roi",
            AlertKind::Tripwire => "tripwire",
            AlertKind::Loitering => "loitering",
        }
    }
}

/// One aggregated alert. `image` holds the in-memory snapshot until the alert
/// is exported to disk.
#[derive(Clone)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub camera_name: String,
    pub kind: AlertKind,
    pub message: String,
    pub snapshot_path: String,
    pub image: Option<Frame>,
}

impl Alert {
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Change notifications delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLogEvent {
    Inserted { index: usize },
    RowChanged { index: usize },
    CountChanged { count: usize },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("alert index {0} out of range")]
    BadIndex(usize),
    #[error("alert {0} carries no in-memory image")]
    NoImage(usize),
    #[error("selection contains no exportable alerts")]
    EmptySelection,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("snapshot encode failed: {0}")]
    Image(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

type Observer = Box<dyn Fn(&AlertLogEvent) + Send>;

/// Single-writer ordered alert list.
///
/// Ids are wall-clock derived (`yyyyMMddHHmmsszzz`) and may collide under
/// bursts; nothing here treats them as unique keys.
pub struct AlertLog {
    alerts: Vec<Alert>,
    observers: Vec<Observer>,
    clock: Arc<dyn Clock>,
}

impl AlertLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            alerts: Vec::new(),
            observers: Vec::new(),
            clock,
        }
    }

    /// Register a change observer.
    pub fn subscribe(&mut self, observer: impl Fn(&AlertLogEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Alert> {
        self.alerts.get(index)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Alert> {
        self.alerts.iter()
    }

    /// First alert carrying the given id; ids are not unique keys.
    pub fn find_by_id(&self, id: &str) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn add_snapshot_alert(&mut self, camera_name: &str, frame: Frame) {
        self.push(
            AlertKind::Snapshot,
            camera_name,
            "Snapshot captured (unsaved)".to_string(),
            String::new(),
            Some(frame),
        );
    }

    /// Snapshot that has already been written to disk.
    pub fn add_saved_snapshot_alert(&mut self, camera_name: &str, path: &str, frame: Frame) {
        self.push(
            AlertKind::Snapshot,
            camera_name,
            "Snapshot saved".to_string(),
            path.to_string(),
            Some(frame),
        );
    }

    pub fn add_motion_alert(&mut self, camera_name: &str, message: String) {
        self.push(AlertKind::Motion, camera_name, message, String::new(), None);
    }

    pub fn add_roi_motion_alert(&mut self, camera_name: &str, message: String) {
        self.push(AlertKind::MotionRoi, camera_name, message, String::new(), None);
    }

    pub fn add_tripwire_alert(&mut self, camera_name: &str, message: String) {
        self.push(AlertKind::Tripwire, camera_name, message, String::new(), None);
    }

    pub fn add_loitering_alert(&mut self, camera_name: &str, message: String) {
        self.push(AlertKind::Loitering, camera_name, message, String::new(), None);
    }

    fn push(
        &mut self,
        kind: AlertKind,
        camera_name: &str,
        message: String,
        snapshot_path: String,
        image: Option<Frame>,
    ) {
        let now = self.clock.now();
        let alert = Alert {
            id: now.format("%Y%m%d%H%M%S%3f").to_string(),
            timestamp: now,
            camera_name: camera_name.to_string(),
            kind,
            message,
            snapshot_path,
            image,
        };
        debug!(kind = kind.as_str(), camera = camera_name, "alert added");
        self.alerts.push(alert);

        let index = self.alerts.len() - 1;
        self.notify(&AlertLogEvent::Inserted { index });
        self.notify(&AlertLogEvent::CountChanged {
            count: self.alerts.len(),
        });
    }

    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.alerts.len() {
            return false;
        }
        self.alerts.remove(index);
        self.notify(&AlertLogEvent::CountChanged {
            count: self.alerts.len(),
        });
        true
    }

    /// Remove several positions at once. Indices are applied in descending
    /// order so live positions stay valid while removing.
    pub fn remove_many(&mut self, indices: &[usize]) -> usize {
        let mut sorted: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.alerts.len())
            .collect();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        let removed = sorted.len();
        for index in sorted {
            self.alerts.remove(index);
        }
        if removed > 0 {
            self.notify(&AlertLogEvent::CountChanged {
                count: self.alerts.len(),
            });
        }
        removed
    }

    pub fn clear(&mut self) {
        if self.alerts.is_empty() {
            return;
        }
        self.alerts.clear();
        self.notify(&AlertLogEvent::CountChanged { count: 0 });
    }

    /// Suggested filename for saving an alert's snapshot:
    /// `<CameraName with spaces→'_'>_<yyyyMMdd_HHmmss>.png`.
    pub fn suggested_png_filename(&self, index: usize) -> String {
        match self.alerts.get(index) {
            Some(alert) => format!(
                "{}_{}.png",
                alert.camera_name.replace(' ', "_"),
                alert.timestamp.format("%Y%m%d_%H%M%S")
            ),
            None => "snapshot.png".to_string(),
        }
    }

    /// Write one alert's in-memory snapshot to `path` as PNG. On success the
    /// alert's snapshot path and message are updated in place.
    pub fn export_snapshot_as_png(&mut self, index: usize, path: &Path) -> Result<(), ExportError> {
        let alert = self
            .alerts
            .get(index)
            .ok_or(ExportError::BadIndex(index))?;
        let frame = alert.image.clone().ok_or(ExportError::NoImage(index))?;

        imaging::save_png(&frame, path).map_err(|err| ExportError::Image(err.to_string()))?;

        let alert = &mut self.alerts[index];
        alert.snapshot_path = path.display().to_string();
        alert.message = "Snapshot saved".to_string();
        self.notify(&AlertLogEvent::RowChanged { index });
        Ok(())
    }

    /// Export alerts as CSV. `selection` limits the export to the given
    /// positions; `None` exports everything.
    pub fn export_to_csv(
        &self,
        path: &Path,
        selection: Option<&[usize]>,
    ) -> Result<(), ExportError> {
        let indices = self.resolve_selection(selection)?;
        ensure_parent_dir(path)?;

        let mut out = fs::File::create(path)?;
        writeln!(out, "ID,Timestamp,Camera Name,Type,Message,Snapshot Path")?;
        for index in &indices {
            let alert = &self.alerts[*index];
            writeln!(
                out,
                "{},{},{},{},{},{}",
                escape_csv(&alert.id),
                escape_csv(&alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)),
                escape_csv(&alert.camera_name),
                escape_csv(alert.kind.as_str()),
                escape_csv(&alert.message),
                escape_csv(&alert.snapshot_path),
            )?;
        }
        debug!(count = indices.len(), path = %path.display(), "alerts exported to csv");
        Ok(())
    }

    /// Export alerts as JSON (`alerts` array plus `exportTime`/`totalCount`).
    pub fn export_to_json(
        &self,
        path: &Path,
        selection: Option<&[usize]>,
    ) -> Result<(), ExportError> {
        let indices = self.resolve_selection(selection)?;
        ensure_parent_dir(path)?;

        let alerts: Vec<serde_json::Value> = indices
            .iter()
            .map(|&index| {
                let alert = &self.alerts[index];
                serde_json::json!({
                    "id": alert.id,
                    "timestamp": alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false),
                    "cameraName": alert.camera_name,
                    "type": alert.kind.as_str(),
                    "message": alert.message,
                    "snapshotPath": alert.snapshot_path,
                    "hasImage": alert.has_image(),
                })
            })
            .collect();

        let root = serde_json::json!({
            "alerts": alerts,
            "exportTime": self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, false),
            "totalCount": indices.len(),
        });

        fs::write(path, serde_json::to_string_pretty(&root)?)?;
        debug!(count = indices.len(), path = %path.display(), "alerts exported to json");
        Ok(())
    }

    fn resolve_selection(&self, selection: Option<&[usize]>) -> Result<Vec<usize>, ExportError> {
        match selection {
            None => Ok((0..self.alerts.len()).collect()),
            Some(picked) => {
                let valid: Vec<usize> = picked
                    .iter()
                    .copied()
                    .filter(|&i| i < self.alerts.len())
                    .collect();
                if valid.is_empty() {
                    warn!("export requested with no valid alert indices");
                    return Err(ExportError::EmptySelection);
                }
                Ok(valid)
            }
        }
    }

    fn notify(&self, event: &AlertLogEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// RFC-4180 style field escaping: double embedded quotes, wrap the field when
/// it contains a comma, quote, or newline.
fn escape_csv(field: &str) -> String {
    let escaped = field.replace('"', "\"\"");
    if escaped.contains(',') || escaped.contains('"') || escaped.contains('\n') {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}
