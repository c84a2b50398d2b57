//! Raster decode/encode adapter: bytes ⇄ `DynamicImage`.
//!
//! The synchronous functions do the work; callers run them on the blocking
//! pool with `spawn_blocking` ([`decode_async`] for the common case).
//! Decoding and encoding a full-resolution scan takes tens of milliseconds
//! of pure CPU, and doing that on a runtime worker would stall every other
//! entry in the batch. These are the pipeline's suspension points.

use crate::config::OutputFormat;
use crate::error::ScanPrepError;
use crate::upload::SharedBytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Decode `bytes` into pixels, guessing the format from the content.
pub fn decode(name: &str, bytes: &[u8]) -> Result<DynamicImage, ScanPrepError> {
    let img = image::load_from_memory(bytes).map_err(|e| ScanPrepError::DecodeFailure {
        name: name.to_string(),
        detail: e.to_string(),
    })?;
    debug!("Decoded {} → {}x{} px", name, img.width(), img.height());
    Ok(img)
}

/// Encode `img` as `format`.
///
/// `quality` (1–100) only affects JPEG. JPEG has no alpha channel, so alpha
/// is dropped; PNG and WebP keep it.
pub fn encode(
    name: &str,
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, ScanPrepError> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            img.to_rgb8().write_with_encoder(encoder)
        }
        OutputFormat::Png => img.to_rgba8().write_with_encoder(PngEncoder::new(&mut buf)),
        OutputFormat::WebP => img
            .to_rgba8()
            .write_with_encoder(WebPEncoder::new_lossless(&mut buf)),
    };
    result.map_err(|e| ScanPrepError::EncodeFailure {
        name: name.to_string(),
        detail: e.to_string(),
    })?;

    debug!(
        "Encoded {} {}x{} → {} bytes {}",
        name,
        img.width(),
        img.height(),
        buf.len(),
        format.mime_type()
    );
    Ok(buf)
}

/// Encode `img` in the format named by `mime_type`.
///
/// MIME types without an encoder fall back to PNG. Returns the bytes and the
/// MIME type actually produced.
pub fn encode_as_mime(
    name: &str,
    img: &DynamicImage,
    mime_type: &str,
    quality: u8,
) -> Result<(Vec<u8>, &'static str), ScanPrepError> {
    let format = OutputFormat::from_mime(mime_type).unwrap_or(OutputFormat::Png);
    let bytes = encode(name, img, format, quality)?;
    Ok((bytes, format.mime_type()))
}

/// MIME type detected from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

/// Read width and height from the header without decoding pixels.
pub fn dimensions(name: &str, bytes: &[u8]) -> Result<(u32, u32), ScanPrepError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ScanPrepError::DecodeFailure {
            name: name.to_string(),
            detail: e.to_string(),
        })?
        .into_dimensions()
        .map_err(|e| ScanPrepError::DecodeFailure {
            name: name.to_string(),
            detail: e.to_string(),
        })
}

/// [`decode`] on the blocking pool.
pub async fn decode_async(name: String, bytes: SharedBytes) -> Result<DynamicImage, ScanPrepError> {
    tokio::task::spawn_blocking(move || decode(&name, &bytes))
        .await
        .map_err(|e| ScanPrepError::Internal(format!("Decode task panicked: {}", e)))?
}
