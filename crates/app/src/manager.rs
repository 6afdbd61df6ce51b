//! Camera slot management: builds pipelines for enabled config slots, routes
//! policy mutations to the worker, and persists the config after each change.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use analytics::{NormPoint, Tripwire};
use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::{
    config::{self, CameraConfig, SourceKind, TripwireConfig, MAX_CAMERAS},
    context::Context,
    events::PipelineEvent,
    pipeline::{CameraPipeline, SharedDetector},
};

/// Sparse slot → pipeline map over the configured cameras.
///
/// Disabled slots keep their position but never get a pipeline; queries on
/// them return default values.
pub struct CameraManager {
    configs: Mutex<Vec<CameraConfig>>,
    pipelines: BTreeMap<usize, Arc<CameraPipeline>>,
    config_path: PathBuf,
}

impl CameraManager {
    pub fn new(
        ctx: Context,
        config_path: PathBuf,
        configs: Vec<CameraConfig>,
        events: Sender<PipelineEvent>,
        detector: Option<SharedDetector>,
    ) -> Self {
        let mut pipelines = BTreeMap::new();
        for (slot, config) in configs.iter().enumerate().take(MAX_CAMERAS) {
            if !config.enabled {
                info!(slot, id = %config.id, "camera slot disabled");
                continue;
            }
            let pipeline = Arc::new(CameraPipeline::new(
                config,
                ctx.clone(),
                events.clone(),
                detector.clone(),
            ));
            pipelines.insert(slot, pipeline);
        }
        info!(
            slots = configs.len().min(MAX_CAMERAS),
            enabled = pipelines.len(),
            "camera slots created"
        );

        Self {
            configs: Mutex::new(configs),
            pipelines,
            config_path,
        }
    }

    pub fn available(&self, slot: usize) -> bool {
        self.pipelines.contains_key(&slot)
    }

    pub fn camera(&self, slot: usize) -> Option<&Arc<CameraPipeline>> {
        self.pipelines.get(&slot)
    }

    /// Enabled `(slot, pipeline)` pairs in slot order.
    pub fn cameras(&self) -> impl Iterator<Item = (usize, &Arc<CameraPipeline>)> {
        self.pipelines.iter().map(|(&slot, p)| (slot, p))
    }

    pub fn camera_name(&self, slot: usize) -> String {
        self.config_field(slot, |c| c.name.clone())
            .unwrap_or_else(|| format!("Camera {}", slot + 1))
    }

    pub fn camera_kind(&self, slot: usize) -> Option<SourceKind> {
        self.config_field(slot, |c| c.kind)
    }

    pub fn camera_source(&self, slot: usize) -> String {
        self.config_field(slot, |c| c.source.clone())
            .unwrap_or_default()
    }

    pub fn start_all(&self) {
        for pipeline in self.pipelines.values() {
            pipeline.start();
        }
    }

    pub fn stop_all(&self) {
        for pipeline in self.pipelines.values() {
            pipeline.stop();
        }
    }

    /// Install an ROI polygon on a slot and persist the change.
    pub fn set_roi(&self, slot: usize, points: Vec<NormPoint>) {
        let updated = self.update_config(slot, |config| {
            config.roi.points = points.clone();
        });
        if !updated {
            return;
        }
        if let Some(pipeline) = self.pipelines.get(&slot) {
            pipeline.set_roi(points);
        }
        self.persist();
    }

    pub fn clear_roi(&self, slot: usize) {
        let updated = self.update_config(slot, |config| config.roi.points.clear());
        if !updated {
            return;
        }
        if let Some(pipeline) = self.pipelines.get(&slot) {
            pipeline.clear_roi();
        }
        self.persist();
    }

    /// Install a tripwire on a slot and persist the change.
    pub fn set_tripwire(&self, slot: usize, start: NormPoint, end: NormPoint) {
        let updated = self.update_config(slot, |config| {
            config.tripwire = Some(TripwireConfig { start, end });
        });
        if !updated {
            return;
        }
        if let Some(pipeline) = self.pipelines.get(&slot) {
            pipeline.set_tripwire(Tripwire::new(start, end));
        }
        self.persist();
    }

    pub fn clear_tripwire(&self, slot: usize) {
        let updated = self.update_config(slot, |config| config.tripwire = None);
        if !updated {
            return;
        }
        if let Some(pipeline) = self.pipelines.get(&slot) {
            pipeline.clear_tripwire();
        }
        self.persist();
    }

    fn config_field<T>(&self, slot: usize, get: impl Fn(&CameraConfig) -> T) -> Option<T> {
        self.configs.lock().ok()?.get(slot).map(get)
    }

    fn update_config(&self, slot: usize, apply: impl FnOnce(&mut CameraConfig)) -> bool {
        let Ok(mut configs) = self.configs.lock() else {
            return false;
        };
        match configs.get_mut(slot) {
            Some(config) => {
                apply(config);
                true
            }
            None => false,
        }
    }

    fn persist(&self) {
        let Ok(configs) = self.configs.lock() else {
            return;
        };
        if let Err(err) = config::save_config(&self.config_path, &configs) {
            warn!(%err, "failed to persist camera configuration");
        }
    }
}
