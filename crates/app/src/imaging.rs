//! Frame encoding helpers shared by the snapshot and HTTP paths.

use std::{io::Cursor, path::Path};

use image::{codecs::jpeg::JpegEncoder, ImageFormat, RgbImage};
use video_ingest::Frame;

/// View a captured frame as an [`RgbImage`]; `None` when the buffer does not
/// match its declared dimensions.
pub(crate) fn frame_to_image(frame: &Frame) -> Option<RgbImage> {
    if !frame.is_valid() {
        return None;
    }
    RgbImage::from_raw(frame.width as u32, frame.height as u32, frame.data.clone())
}

/// Encode a frame as PNG bytes.
pub(crate) fn encode_png(frame: &Frame) -> anyhow::Result<Vec<u8>> {
    let img = frame_to_image(frame).ok_or_else(|| anyhow::anyhow!("invalid frame buffer"))?;
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// Encode a frame as JPEG bytes at the given quality.
pub(crate) fn encode_jpeg(frame: &Frame, quality: u8) -> anyhow::Result<Vec<u8>> {
    let img = frame_to_image(frame).ok_or_else(|| anyhow::anyhow!("invalid frame buffer"))?;
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    img.write_with_encoder(encoder)?;
    Ok(bytes)
}

/// Write a frame to disk as PNG, creating parent directories as needed.
pub(crate) fn save_png(frame: &Frame, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let img = frame_to_image(frame).ok_or_else(|| anyhow::anyhow!("invalid frame buffer"))?;
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
