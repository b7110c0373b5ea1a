//! PNG decoding and encoding of tightly packed RGBA8 buffers.

use anyhow::{ensure, Context, Result};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Number of channels in RGBA8 format.
const RGBA8_CHANNELS: usize = 4;

/// Decoded image, rows tightly packed, top row first
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbaImage8 {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Decode any PNG into RGBA8.
pub fn read_png_rgba8(path: &Path) -> Result<RgbaImage8> {
    let decoded = image::open(path).with_context(|| format!("failed to read PNG at {}", path.display()))?;
    let rgba = decoded.into_rgba8();
    Ok(RgbaImage8 {
        width: rgba.width(),
        height: rgba.height(),
        data: rgba.into_raw(),
    })
}

/// Encode a tight RGBA8 buffer as PNG, fast compression and no row filter.
pub fn write_png_rgba8(path: &Path, data: &[u8], width: u32, height: u32) -> Result<()> {
    let expected = compute_expected_buffer_size(width, height)?;
    ensure!(
        data.len() == expected,
        "PNG writer requires tight RGBA8 buffer: expected {} bytes, got {}",
        expected,
        data.len()
    );

    let file = File::create(path)
        .with_context(|| format!("failed to create output PNG at {}", path.display()))?;
    PngEncoder::new_with_quality(BufWriter::new(file), CompressionType::Fast, FilterType::NoFilter)
        .write_image(data, width, height, ColorType::Rgba8)
        .context("failed to encode RGBA8 PNG")
}

/// Compute expected buffer size with overflow checking.
fn compute_expected_buffer_size(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(RGBA8_CHANNELS))
        .ok_or_else(|| anyhow::anyhow!("image dimensions overflow when computing buffer size"))
}
