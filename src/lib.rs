//! # scanprep
//!
//! Prepare document scans for server-side conversion: select images, crop,
//! rotate and colour-correct them, then bound and re-encode the whole batch
//! before it is submitted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files / URLs
//!  │
//!  ├─ 1. Select    allow-list + size limit, MIME sniffing → UploadSet
//!  ├─ 2. Edit      one Editor session at a time: crop, rotate, zoom,
//!  │               brightness/contrast, auto-enhance; apply bakes new bytes
//!  ├─ 3. Normalize every entry bounded to max_dimension, re-encoded
//!  │               (concurrent, all-or-nothing)
//!  └─ 4. Submit    multipart batch to the conversion endpoint
//! ```
//!
//! Every entry carries a [`DisplayUrl`] for previews. Replacing an entry's
//! bytes revokes its old URL and issues a new one, so a stale preview can
//! never show bytes that are no longer going to be submitted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanprep::{prepare_to_dir, EditPlan, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let plans = [EditPlan {
//!         index: Some(0),
//!         quarter_turns: 1,
//!         auto_enhance: true,
//!         ..Default::default()
//!     }];
//!     let batch = prepare_to_dir(&["page1.jpg", "page2.png"], &plans, "out", &config).await?;
//!     eprintln!("{} bytes → {} bytes", batch.stats.input_bytes, batch.stats.output_bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanprep` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! scanprep = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod display;
pub mod editor;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod prepare;
pub mod progress;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EnhanceTargets, OutputFormat, PipelineConfig, PipelineConfigBuilder};
pub use display::{DisplayUrl, DisplayUrls};
pub use editor::{Editor, EditorSession, PreviewFrame, SessionPhase};
pub use engine::{CropEngine, CropHandle, CropRegion, EngineLoader, RasterCropEngine};
pub use error::ScanPrepError;
pub use pipeline::enhance::{ColorAdjust, LuminanceStats};
pub use pipeline::normalize::{normalize_set, NormalizedImage};
pub use pipeline::submit::{submit_batch, HttpSubmitter, SubmissionReceipt, Submitter};
pub use prepare::{prepare, prepare_and_submit, prepare_sync, prepare_to_dir, EditPlan, PreparedBatch};
pub use progress::{NoopProgressCallback, NormalizeProgressCallback, ProgressCallback};
pub use upload::{RawFile, SharedBytes, Snapshot, SnapshotItem, UploadEntry, UploadSet};
