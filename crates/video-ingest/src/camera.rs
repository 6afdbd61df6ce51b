//! OpenCV-backed camera capture.

use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{bounded, Sender};
use opencv::{
    core::{self, MatTraitConstManual},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::{
    fps::FpsWindow,
    parse_device_index,
    types::{CaptureError, Frame, SourceEvent, SourceReceiver},
    FRAME_INTERVAL_MS, MAX_EMPTY_READS,
};

/// Spawns a background thread that continually captures frames from `uri`.
///
/// `uri` is either a device index (`"0"`, `"/dev/video1"`) or a stream URL
/// (RTSP/HTTP). Frames are converted to packed RGB before being forwarded
/// over the returned receiver; the buffer is intentionally small to
/// backpressure the capture loop when the consumer falls behind.
pub fn spawn_capture_reader(uri: &str, target_size: (i32, i32)) -> Result<SourceReceiver> {
    let (tx, rx) = bounded(4);
    let uri = uri.to_string();

    thread::spawn(move || {
        if let Err(err) = capture_loop(&uri, target_size, tx.clone()) {
            let _ = tx.send(Err(err));
        }
    });

    Ok(rx)
}

/// Main capture loop executed on the background thread.
fn capture_loop(
    uri: &str,
    target_size: (i32, i32),
    tx: Sender<Result<SourceEvent, CaptureError>>,
) -> Result<(), CaptureError> {
    let mut cap = open_video_capture(uri)?;
    configure_camera(&mut cap, target_size, 30.0);

    let mut frame = Mat::default();
    let mut rgb = Mat::default();
    let mut fps = FpsWindow::new(Utc::now().timestamp_millis());
    let mut empty_reads: u32 = 0;

    loop {
        let started = Instant::now();

        cap.read(&mut frame)
            .map_err(|e| CaptureError::Other(e.into()))?;

        let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 || size.height <= 0 {
            empty_reads += 1;
            if empty_reads >= MAX_EMPTY_READS {
                return Err(CaptureError::Stream(format!(
                    "{empty_reads} consecutive empty reads from {uri}"
                )));
            }
            debug!(uri, empty_reads, "empty frame read, retrying");
            thread::sleep(Duration::from_millis(FRAME_INTERVAL_MS));
            continue;
        }
        empty_reads = 0;

        let hint = core::get_default_algorithm_hint().map_err(|e| CaptureError::Other(e.into()))?;
        imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0, hint)
            .map_err(|e| CaptureError::Other(e.into()))?;

        let data = rgb
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();
        let timestamp_ms = Utc::now().timestamp_millis();

        if tx
            .send(Ok(SourceEvent::Frame(Frame {
                data,
                width: size.width,
                height: size.height,
                timestamp_ms,
            })))
            .is_err()
        {
            break;
        }

        if let Some(rate) = fps.on_frame(timestamp_ms) {
            if tx.send(Ok(SourceEvent::Fps(rate))).is_err() {
                break;
            }
        }

        // Hold the nominal 30 Hz interval when the backend returns faster.
        let elapsed = started.elapsed();
        if elapsed < Duration::from_millis(FRAME_INTERVAL_MS) {
            thread::sleep(Duration::from_millis(FRAME_INTERVAL_MS) - elapsed);
        }
    }

    Ok(())
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!(index, backend, %err, "failed to open capture device");
                }
            }
        }
    }

    for backend in [videoio::CAP_FFMPEG, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!(uri, backend, %err, "failed to open capture url");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply common capture settings (resolution, fps, preferred pixel format).
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    let mut fourcc_set = false;
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
            fourcc_set = true;
        }
    }
    if !fourcc_set {
        if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
            let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
        }
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
