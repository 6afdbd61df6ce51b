//! Camera configuration file handling.
//!
//! The config is a single JSON object with a `cameras` array. A missing or
//! malformed file falls back to one default USB camera and is never fatal.

use std::{fs, path::Path};

use analytics::{NormPoint, Tripwire};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of camera slots honored; later config entries are ignored.
pub const MAX_CAMERAS: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Transport used to reach a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Local capture device addressed by index.
    Usb,
    /// RTSP network stream.
    Rtsp,
    /// Plain HTTP/IP stream.
    Ip,
    /// Built-in synthetic source.
    Sim,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Usb => "usb",
            SourceKind::Rtsp => "rtsp",
            SourceKind::Ip => "ip",
            SourceKind::Sim => "sim",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoiConfig {
    #[serde(default)]
    pub points: Vec<NormPoint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TripwireConfig {
    pub start: NormPoint,
    pub end: NormPoint,
}

/// One camera slot as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Stringified device index or stream URL.
    pub source: String,
    pub enabled: bool,
    #[serde(default)]
    pub roi: RoiConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tripwire: Option<TripwireConfig>,
}

impl CameraConfig {
    /// The default single camera used when no config can be loaded.
    pub fn fallback() -> Self {
        Self {
            id: "cam1".to_string(),
            name: "Default Camera".to_string(),
            kind: SourceKind::Usb,
            source: "0".to_string(),
            enabled: true,
            roi: RoiConfig::default(),
            tripwire: None,
        }
    }

    /// ROI polygon when one is usable (three or more vertices).
    pub fn effective_roi(&self) -> Option<&[NormPoint]> {
        if self.roi.points.len() >= 3 {
            Some(&self.roi.points)
        } else {
            None
        }
    }

    /// Tripwire, unless absent or anchored at the origin on both ends.
    pub fn effective_tripwire(&self) -> Option<Tripwire> {
        let wire = self.tripwire?;
        if wire.start.is_origin() && wire.end.is_origin() {
            return None;
        }
        Some(Tripwire::new(wire.start, wire.end))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cameras: Vec<CameraConfig>,
}

/// Strict load: parse the file and cap the camera list at [`MAX_CAMERAS`].
pub fn load_config(path: &Path) -> Result<Vec<CameraConfig>, ConfigError> {
    let data = fs::read_to_string(path)?;
    let file: ConfigFile = serde_json::from_str(&data)?;

    let mut cameras = file.cameras;
    if cameras.len() > MAX_CAMERAS {
        warn!(
            configured = cameras.len(),
            honored = MAX_CAMERAS,
            "config lists more cameras than available slots; ignoring the rest"
        );
        cameras.truncate(MAX_CAMERAS);
    }
    for (slot, cam) in cameras.iter().enumerate() {
        debug!(
            slot,
            id = %cam.id,
            name = %cam.name,
            kind = cam.kind.as_str(),
            source = %cam.source,
            enabled = cam.enabled,
            "loaded camera config"
        );
    }
    Ok(cameras)
}

/// Load the config, falling back to a single default camera on any error.
pub fn load_or_default(path: &Path) -> Vec<CameraConfig> {
    match load_config(path) {
        Ok(cameras) if !cameras.is_empty() => cameras,
        Ok(_) => {
            warn!(path = %path.display(), "config file lists no cameras, using default");
            vec![CameraConfig::fallback()]
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to load camera config, using default");
            vec![CameraConfig::fallback()]
        }
    }
}

/// Persist the camera list back to disk (pretty JSON, same shape as loaded).
pub fn save_config(path: &Path, cameras: &[CameraConfig]) -> Result<(), ConfigError> {
    let file = ConfigFile {
        cameras: cameras.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json)?;
    info!(path = %path.display(), cameras = cameras.len(), "configuration saved");
    Ok(())
}
