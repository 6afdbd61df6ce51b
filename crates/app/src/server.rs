//! Read-only HTTP status surface.
//!
//! The server runs on a dedicated thread so the pipeline hot paths never see
//! the Actix runtime. It exposes liveness, the alert list, and per-camera
//! snapshots; every response allows any origin and closes its connection.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use actix_web::{
    middleware::DefaultHeaders,
    web::{self, ServiceConfig},
    App, HttpResponse, HttpServer,
};
use anyhow::{Context as _, Result};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{alerts::AlertLog, imaging, manager::CameraManager};

const SNAPSHOT_JPEG_QUALITY: u8 = 85;

/// Shared state backing the HTTP handlers.
pub struct ServerState {
    pub manager: Arc<CameraManager>,
    pub alerts: Arc<Mutex<AlertLog>>,
}

/// Handle for the status server thread.
#[derive(Default)]
pub struct StatusServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl StatusServer {
    /// Signal the server to stop and block until the thread exits.
    pub fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Spawn the status server thread bound to `0.0.0.0:port`.
pub fn spawn_status_server(
    port: u16,
    manager: Arc<CameraManager>,
    alerts: Arc<Mutex<AlertLog>>,
) -> Result<StatusServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = std::thread::Builder::new()
        .name("status-server".into())
        .spawn(move || {
            if let Err(err) = actix_web::rt::System::new().block_on(async move {
                let server = HttpServer::new(move || {
                    App::new()
                        .app_data(web::Data::new(ServerState {
                            manager: manager.clone(),
                            alerts: alerts.clone(),
                        }))
                        .wrap(default_headers())
                        .configure(routes)
                })
                .bind(("0.0.0.0", port))?
                .run();

                info!(port, "status server listening");
                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            }) {
                error!("status server error: {err}");
            }
        })
        .context("Failed to spawn status server thread")?;

    Ok(StatusServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

fn default_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Connection", "close"))
}

fn routes(cfg: &mut ServiceConfig) {
    cfg.route("/ping", web::get().to(ping))
        .route("/alerts", web::get().to(list_alerts))
        .route("/alerts/{id}/snapshot", web::get().to(alert_snapshot))
        .route("/cameras", web::get().to(list_cameras))
        .route("/cameras/{id}/snapshot", web::get().to(camera_snapshot))
        .default_service(web::to(not_found));
}

async fn ping() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body("ok")
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": "Not found" }))
}

/// All alerts as JSON, newest first.
async fn list_alerts(state: web::Data<ServerState>) -> HttpResponse {
    let Ok(log) = state.alerts.lock() else {
        return HttpResponse::ServiceUnavailable()
            .json(json!({ "error": "Alert service not available" }));
    };

    let alerts: Vec<serde_json::Value> = log
        .iter()
        .rev()
        .map(|alert| {
            let mut value = json!({
                "id": alert.id,
                "timestamp": alert.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                "cameraName": alert.camera_name,
                "type": alert.kind.as_str(),
                "message": alert.message,
                "hasSnapshot": alert.has_image(),
            });
            if !alert.snapshot_path.is_empty() {
                value["snapshotPath"] = json!(alert.snapshot_path);
            }
            value
        })
        .collect();

    HttpResponse::Ok().json(alerts)
}

/// Snapshot bytes for one alert: the in-memory image when present, the saved
/// file otherwise.
async fn alert_snapshot(
    state: web::Data<ServerState>,
    path: web::Path<String>,
) -> HttpResponse {
    let alert_id = path.into_inner();
    let Ok(log) = state.alerts.lock() else {
        return HttpResponse::ServiceUnavailable()
            .json(json!({ "error": "Alert service not available" }));
    };

    let Some(alert) = log.find_by_id(&alert_id) else {
        return HttpResponse::NotFound().json(json!({ "error": "Alert not found" }));
    };

    if let Some(frame) = &alert.image {
        return match imaging::encode_png(frame) {
            Ok(bytes) => HttpResponse::Ok().content_type("image/png").body(bytes),
            Err(_) => HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to encode image" })),
        };
    }

    if !alert.snapshot_path.is_empty() {
        let path = Path::new(&alert.snapshot_path);
        if let Ok(bytes) = std::fs::read(path) {
            let mime = match path.extension().and_then(|e| e.to_str()) {
                Some("jpg") | Some("jpeg") => "image/jpeg",
                _ => "image/png",
            };
            return HttpResponse::Ok().content_type(mime).body(bytes);
        }
    }

    HttpResponse::NotFound().json(json!({ "error": "Snapshot not available" }))
}

/// Enabled cameras as JSON; ids are `cam<slot>`.
async fn list_cameras(state: web::Data<ServerState>) -> HttpResponse {
    let cameras: Vec<serde_json::Value> = state
        .manager
        .cameras()
        .map(|(slot, _)| {
            json!({
                "id": format!("cam{slot}"),
                "name": state.manager.camera_name(slot),
                "type": state
                    .manager
                    .camera_kind(slot)
                    .map(|k| k.as_str())
                    .unwrap_or("unknown"),
                "source": state.manager.camera_source(slot),
            })
        })
        .collect();

    HttpResponse::Ok().json(cameras)
}

/// Latest frame of one camera as JPEG, or 503 while no frame exists.
async fn camera_snapshot(
    state: web::Data<ServerState>,
    path: web::Path<String>,
) -> HttpResponse {
    let camera_id = path.into_inner();
    let Some(slot) = camera_id
        .strip_prefix("cam")
        .and_then(|s| s.parse::<usize>().ok())
    else {
        return HttpResponse::NotFound().json(json!({ "error": "Invalid camera ID" }));
    };

    let Some(pipeline) = state.manager.camera(slot) else {
        return HttpResponse::NotFound().json(json!({ "error": "Camera not available" }));
    };

    let Some(frame) = pipeline.latest_frame() else {
        return HttpResponse::ServiceUnavailable().json(json!({ "error": "No frame available" }));
    };

    match imaging::encode_jpeg(&frame, SNAPSHOT_JPEG_QUALITY) {
        Ok(bytes) => HttpResponse::Ok().content_type("image/jpeg").body(bytes),
        Err(_) => {
            HttpResponse::InternalServerError().json(json!({ "error": "Failed to encode image" }))
        }
    }
}
