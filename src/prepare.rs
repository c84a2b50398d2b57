//! Headless entry points: select, edit, normalize and write or submit.
//!
//! These drive the same [`UploadSet`] → [`Editor`] → normalizer path an
//! interactive front-end would, with the edits described up front as
//! [`EditPlan`]s instead of arriving as user input.

use crate::config::PipelineConfig;
use crate::editor::Editor;
use crate::engine::CropRegion;
use crate::error::ScanPrepError;
use crate::pipeline::normalize::{self, NormalizedImage};
use crate::pipeline::submit::{self, SubmissionReceipt, Submitter};
use crate::pipeline::{enhance::ColorAdjust, input};
use crate::upload::UploadSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Edits to bake into one entry (or every entry) before normalization.
///
/// Steps run in a fixed order: rotate, crop (in rotated coordinates),
/// auto-enhance, then explicit brightness/contrast, which override the
/// estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditPlan {
    /// Entry to edit; `None` applies the plan to every entry.
    pub index: Option<usize>,
    /// Clockwise quarter turns; negative turns left.
    pub quarter_turns: i32,
    pub crop: Option<CropRegion>,
    pub auto_enhance: bool,
    pub brightness: Option<f64>,
    pub contrast: Option<f64>,
}

impl EditPlan {
    pub fn is_noop(&self) -> bool {
        self.quarter_turns.rem_euclid(4) == 0
            && self.crop.is_none()
            && !self.auto_enhance
            && self.brightness.is_none()
            && self.contrast.is_none()
    }

    fn targets(&self, len: usize) -> Vec<usize> {
        match self.index {
            Some(i) => vec![i],
            None => (0..len).collect(),
        }
    }
}

/// Summary numbers for one prepared batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrepareStats {
    pub entries: usize,
    pub edited: usize,
    pub resized: usize,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub duration_ms: u64,
}

/// An edited entry and the colour factors that were baked into it.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedEdit {
    pub index: usize,
    pub adjust: ColorAdjust,
    pub size: (u32, u32),
}

/// Everything [`prepare`] produced.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedBatch {
    pub images: Vec<NormalizedImage>,
    pub edits: Vec<AppliedEdit>,
    pub stats: PrepareStats,
    /// Paths written by [`prepare_to_dir`], in entry order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub written: Vec<PathBuf>,
}

/// Apply `plans` to `set`, one editor session per targeted entry.
///
/// Stops at the first failure; entries already committed keep their edits.
pub async fn apply_edits(
    set: &mut UploadSet,
    plans: &[EditPlan],
    config: &PipelineConfig,
) -> Result<Vec<AppliedEdit>, ScanPrepError> {
    let mut editor = Editor::with_raster_engine(config.clone());
    let mut applied = Vec::new();

    for plan in plans.iter().filter(|p| !p.is_noop()) {
        for index in plan.targets(set.len()) {
            editor.open(set, index).await?;

            let turns = plan.quarter_turns.rem_euclid(4);
            for _ in 0..turns {
                editor.rotate_right();
            }
            if let Some(region) = plan.crop {
                if !editor.set_crop(region) {
                    editor.cancel();
                    return Err(ScanPrepError::InvalidConfig(format!(
                        "crop {}x{}+{}+{} leaves nothing of entry {}",
                        region.width, region.height, region.x, region.y, index
                    )));
                }
            }
            if plan.auto_enhance {
                editor.auto_enhance();
            }
            if let Some(b) = plan.brightness {
                editor.set_brightness(b);
            }
            if let Some(c) = plan.contrast {
                editor.set_contrast(c);
            }

            let (adjust, size) = match editor.session() {
                Some(s) => (s.adjust(), s.output_size()),
                None => (ColorAdjust::IDENTITY, (0, 0)),
            };
            if editor.apply(set).await?.is_some() {
                debug!("Edited entry {}: {} {}x{}", index, adjust, size.0, size.1);
                applied.push(AppliedEdit { index, adjust, size });
            }
        }
    }
    Ok(applied)
}

/// Resolve `inputs`, bake `plans`, and normalize the result.
pub async fn prepare<S: AsRef<str>>(
    inputs: &[S],
    plans: &[EditPlan],
    config: &PipelineConfig,
) -> Result<PreparedBatch, ScanPrepError> {
    let mut set = UploadSet::new();
    prepare_set(&mut set, inputs, plans, config).await
}

/// [`prepare`] into a caller-owned set, which keeps the final bytes.
pub async fn prepare_set<S: AsRef<str>>(
    set: &mut UploadSet,
    inputs: &[S],
    plans: &[EditPlan],
    config: &PipelineConfig,
) -> Result<PreparedBatch, ScanPrepError> {
    let start = Instant::now();
    info!("Preparing {} input(s)", inputs.len());

    let files = input::resolve_files(inputs, config).await?;
    let input_bytes = files.iter().map(|f| f.bytes.len()).sum();
    set.replace_all(files);

    let edits = apply_edits(set, plans, config).await?;
    let images = normalize::normalize_set(set, config).await?;

    let stats = PrepareStats {
        entries: images.len(),
        edited: edits.len(),
        resized: images.iter().filter(|n| n.was_resized()).count(),
        input_bytes,
        output_bytes: images.iter().map(|n| n.byte_len).sum(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        "Prepared {} entries ({} edited, {} resized) in {}ms",
        stats.entries, stats.edited, stats.resized, stats.duration_ms
    );
    Ok(PreparedBatch {
        images,
        edits,
        stats,
        written: Vec::new(),
    })
}

/// Prepare and write every normalized image into `out_dir`.
///
/// Each file is written atomically (temp file + rename).
pub async fn prepare_to_dir<S: AsRef<str>>(
    inputs: &[S],
    plans: &[EditPlan],
    out_dir: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PreparedBatch, ScanPrepError> {
    let mut batch = prepare(inputs, plans, config).await?;
    let out_dir = out_dir.as_ref();
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| ScanPrepError::OutputWriteFailed {
            path: out_dir.to_path_buf(),
            source: e,
        })?;

    let ext = config.output_format.extension();
    let mut taken = HashSet::new();
    for image in &batch.images {
        let path = out_dir.join(output_name(&image.name, image.index, ext, &mut taken));
        write_atomic(&path, &image.bytes).await?;
        debug!("Wrote {}", path.display());
        batch.written.push(path);
    }
    info!("Wrote {} file(s) to {}", batch.written.len(), out_dir.display());
    Ok(batch)
}

/// Prepare and hand the batch to `submitter`.
pub async fn prepare_and_submit<S: AsRef<str>, T: Submitter>(
    inputs: &[S],
    plans: &[EditPlan],
    submitter: &T,
    config: &PipelineConfig,
) -> Result<(PreparedBatch, SubmissionReceipt), ScanPrepError> {
    let mut set = UploadSet::new();
    let files = input::resolve_files(inputs, config).await?;
    let input_bytes = files.iter().map(|f| f.bytes.len()).sum();
    set.replace_all(files);

    let start = Instant::now();
    let edits = apply_edits(&mut set, plans, config).await?;
    let (images, receipt) = submit::submit_batch(&mut set, submitter, config).await?;

    let stats = PrepareStats {
        entries: images.len(),
        edited: edits.len(),
        resized: images.iter().filter(|n| n.was_resized()).count(),
        input_bytes,
        output_bytes: images.iter().map(|n| n.byte_len).sum(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    Ok((
        PreparedBatch {
            images,
            edits,
            stats,
            written: Vec::new(),
        },
        receipt,
    ))
}

/// Synchronous wrapper around [`prepare`].
///
/// Creates a temporary tokio runtime internally.
pub fn prepare_sync<S: AsRef<str>>(
    inputs: &[S],
    plans: &[EditPlan],
    config: &PipelineConfig,
) -> Result<PreparedBatch, ScanPrepError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ScanPrepError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(prepare(inputs, plans, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// `<stem>.<ext>`, suffixed with the entry index (and then a counter) until
/// the name is unused.
fn output_name(name: &str, index: usize, ext: &str, taken: &mut HashSet<String>) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("image-{index}"));
    let mut candidate = format!("{stem}.{ext}");
    let mut n = 1;
    while !taken.insert(candidate.clone()) {
        candidate = if n == 1 {
            format!("{stem}-{index}.{ext}")
        } else {
            format!("{stem}-{index}-{n}.{ext}")
        };
        n += 1;
    }
    candidate
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ScanPrepError> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| ScanPrepError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ScanPrepError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
