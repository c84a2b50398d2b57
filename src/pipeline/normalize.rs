//! Pre-submission normalization: bound, resize and re-encode every entry.
//!
//! ## Concurrency
//!
//! Entries are processed with `buffer_unordered(concurrency)`, each one
//! independently: decode on the blocking pool, resize, encode in the
//! configured format. Results are gathered with `try_collect`, which stops
//! at the first error and drops the in-flight work.
//!
//! ## All-or-nothing
//!
//! Nothing is written to the [`UploadSet`] until every entry has been
//! normalized. [`normalize_set`] then commits the whole batch in one step,
//! so a single bad image leaves every entry exactly as it was.

use crate::config::{OutputFormat, PipelineConfig};
use crate::error::ScanPrepError;
use crate::pipeline::raster;
use crate::upload::{Replacement, SharedBytes, Snapshot, SnapshotItem, UploadSet};
use futures::stream::{self, StreamExt, TryStreamExt};
use image::imageops::FilterType;
use image::DynamicImage;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of normalizing one entry.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedImage {
    pub index: usize,
    pub name: String,
    #[serde(skip)]
    pub bytes: SharedBytes,
    pub mime_type: String,
    pub source_size: (u32, u32),
    pub size: (u32, u32),
    pub source_bytes: usize,
    pub byte_len: usize,
}

impl NormalizedImage {
    pub fn was_resized(&self) -> bool {
        self.size != self.source_size
    }
}

/// Dimensions after bounding the long side to `max`, preserving aspect ratio.
///
/// Never upsizes; each side stays at least one pixel.
pub fn target_dimensions((w, h): (u32, u32), max: u32) -> (u32, u32) {
    let long = w.max(h);
    if long <= max || long == 0 {
        return (w, h);
    }
    let scale = max as f64 / long as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max);
    (scaled(w), scaled(h))
}

/// Resize with a filter suited to the amount of shrinking.
fn resize(img: &DynamicImage, (tw, th): (u32, u32)) -> DynamicImage {
    if (img.width(), img.height()) == (tw, th) {
        return img.clone();
    }
    // Lanczos is worth its cost on big reductions; Triangle is fine otherwise.
    let filter = if img.width() >= tw * 2 {
        FilterType::Lanczos3
    } else {
        FilterType::Triangle
    };
    img.resize_exact(tw, th, filter)
}

/// Decode, bound and re-encode one snapshot item.
async fn normalize_one(
    item: SnapshotItem,
    max_dimension: u32,
    format: OutputFormat,
    quality: u8,
) -> Result<NormalizedImage, ScanPrepError> {
    let img = raster::decode_async(item.name.clone(), item.bytes.clone()).await?;
    let source_size = (img.width(), img.height());
    let size = target_dimensions(source_size, max_dimension);

    let name = item.name.clone();
    let bytes = tokio::task::spawn_blocking(move || {
        let resized = resize(&img, size);
        raster::encode(&name, &resized, format, quality)
    })
    .await
    .map_err(|e| ScanPrepError::Internal(format!("Normalize task panicked: {}", e)))??;

    debug!(
        "Normalized entry {} ({}): {}x{} → {}x{}, {} → {} bytes",
        item.index,
        item.name,
        source_size.0,
        source_size.1,
        size.0,
        size.1,
        item.bytes.len(),
        bytes.len()
    );

    Ok(NormalizedImage {
        index: item.index,
        name: item.name,
        source_bytes: item.bytes.len(),
        byte_len: bytes.len(),
        bytes: bytes.into(),
        mime_type: format.mime_type().to_string(),
        source_size,
        size,
    })
}

/// Normalize every item of `snapshot`, returning results in index order.
///
/// Fails on the first entry that cannot be decoded or encoded.
pub async fn normalize_snapshot(
    snapshot: &Snapshot,
    config: &PipelineConfig,
) -> Result<Vec<NormalizedImage>, ScanPrepError> {
    let total = snapshot.len();
    let start = Instant::now();
    let cb = config.progress_callback.clone();
    if let Some(cb) = &cb {
        cb.on_batch_start(total);
    }

    let max_dimension = config.max_dimension;
    let format = config.output_format;
    let quality = config.quality;

    let mut results: Vec<NormalizedImage> = stream::iter(snapshot.iter().cloned())
        .map(|item| {
            let cb = cb.clone();
            async move {
                let index = item.index;
                if let Some(cb) = &cb {
                    cb.on_entry_start(index, total);
                }
                let result = normalize_one(item, max_dimension, format, quality).await;
                if let Some(cb) = &cb {
                    match &result {
                        Ok(n) => cb.on_entry_complete(index, total, n.byte_len),
                        Err(e) => cb.on_entry_error(index, total, &e.to_string()),
                    }
                }
                result
            }
        })
        .buffer_unordered(config.concurrency.max(1))
        .try_collect()
        .await
        .inspect_err(|e| warn!("Normalization aborted: {}", e))?;

    results.sort_by_key(|n| n.index);

    if let Some(cb) = &cb {
        cb.on_batch_complete(total);
    }
    info!(
        "Normalized {} entries in {}ms ({} → {} bytes)",
        total,
        start.elapsed().as_millis(),
        snapshot.total_bytes(),
        results.iter().map(|n| n.byte_len).sum::<usize>()
    );
    Ok(results)
}

/// Normalize every entry of `set` and commit the results together.
///
/// On failure the set is unchanged.
pub async fn normalize_set(
    set: &mut UploadSet,
    config: &PipelineConfig,
) -> Result<Vec<NormalizedImage>, ScanPrepError> {
    let snapshot = set.snapshot();
    let normalized = normalize_snapshot(&snapshot, config).await?;
    let batch = normalized
        .iter()
        .map(|n| Replacement {
            index: n.index,
            bytes: n.bytes.clone(),
            mime_type: n.mime_type.clone(),
        })
        .collect();
    set.commit_batch(batch)?;
    Ok(normalized)
}
