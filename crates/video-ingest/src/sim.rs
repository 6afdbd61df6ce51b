//! Synthetic frame source.
//!
//! Renders a block drifting over a flat background at the nominal 30 Hz rate.
//! The moving region gives the motion detector something real to chew on, so
//! the full pipeline can be exercised without a camera attached.

use std::{thread, time::Duration};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{bounded, Sender};
use tracing::debug;

use crate::{
    fps::FpsWindow,
    types::{CaptureError, Frame, SourceEvent, SourceReceiver},
    FRAME_INTERVAL_MS,
};

const BACKGROUND_LUMA: u8 = 96;
const BLOCK_SIZE: i32 = 48;

/// Spawns a background thread generating synthetic frames of the given size.
///
/// The buffer is intentionally small to backpressure the generator when the
/// downstream consumer falls behind.
pub fn spawn_sim_reader(width: i32, height: i32) -> Result<SourceReceiver> {
    let (tx, rx) = bounded(4);

    thread::spawn(move || {
        debug!(width, height, "synthetic source started");
        generate_loop(width, height, tx);
    });

    Ok(rx)
}

fn generate_loop(width: i32, height: i32, tx: Sender<Result<SourceEvent, CaptureError>>) {
    let mut fps = FpsWindow::new(Utc::now().timestamp_millis());
    let mut tick: i64 = 0;

    loop {
        let timestamp_ms = Utc::now().timestamp_millis();
        let frame = render(width, height, tick, timestamp_ms);

        if tx.send(Ok(SourceEvent::Frame(frame))).is_err() {
            break;
        }
        if let Some(rate) = fps.on_frame(timestamp_ms) {
            if tx.send(Ok(SourceEvent::Fps(rate))).is_err() {
                break;
            }
        }

        tick += 1;
        thread::sleep(Duration::from_millis(FRAME_INTERVAL_MS));
    }
}

/// Flat background with a bright block orbiting the frame.
fn render(width: i32, height: i32, tick: i64, timestamp_ms: i64) -> Frame {
    let mut frame = Frame::new(width, height, timestamp_ms);
    for px in frame.data.iter_mut() {
        *px = BACKGROUND_LUMA;
    }

    let span_x = (width - BLOCK_SIZE).max(1) as i64;
    let span_y = (height - BLOCK_SIZE).max(1) as i64;
    let x0 = ((tick * 4) % span_x) as i32;
    let y0 = ((tick * 3) % span_y) as i32;

    for y in y0..(y0 + BLOCK_SIZE).min(height) {
        for x in x0..(x0 + BLOCK_SIZE).min(width) {
            let at = ((y * width + x) * 3) as usize;
            frame.data[at] = 230;
            frame.data[at + 1] = 230;
            frame.data[at + 2] = 230;
        }
    }

    frame
}
