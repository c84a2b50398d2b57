//! Error types for the scanprep library.
//!
//! A single error type, [`ScanPrepError`], covers every failure a caller can
//! observe. Operations that fail leave the [`crate::upload::UploadSet`] and
//! the [`crate::editor::Editor`] exactly as they were before the call: no
//! entry is partially overwritten and no display URL is left unrevoked.
//!
//! Zero-mean or zero-variance luminance during auto-enhance is *not* an
//! error; the estimator clamps to the nearest bound instead
//! (see [`crate::pipeline::enhance`]).

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the scanprep library.
#[derive(Debug, Error)]
pub enum ScanPrepError {
    // ── Addressing errors ─────────────────────────────────────────────────
    /// A set or session operation addressed an entry that does not exist.
    #[error("Entry {index} is out of range (upload set has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The entry an editor session was opened on has since been replaced by
    /// a new selection.
    #[error("Entry {index} was replaced by a new selection while it was being edited\nOpen the editor again.")]
    StaleSession { index: usize },

    // ── Raster errors ─────────────────────────────────────────────────────
    /// The bytes could not be interpreted as an image (corrupt or unsupported).
    #[error("Could not decode '{name}' as an image: {detail}")]
    DecodeFailure { name: String, detail: String },

    /// Pixel data could not be encoded to the requested format.
    #[error("Could not encode '{name}': {detail}")]
    EncodeFailure { name: String, detail: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The crop/transform engine failed to initialise.
    #[error("Crop engine unavailable: {0}\nTry opening the editor again.")]
    EngineUnavailable(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file extension is not in the configured allow-list.
    #[error("Invalid file: '{name}' (allowed: {allowed})")]
    UnsupportedFile { name: String, allowed: String },

    /// The file exceeds the configured size limit.
    #[error("'{name}' exceeds size limit ({size} bytes > {limit} bytes)")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Submission errors ─────────────────────────────────────────────────
    /// The upload request could not be sent or its response not read.
    #[error("Submission failed: {reason}")]
    SubmissionFailed { reason: String },

    /// The server answered the upload with a non-success status.
    #[error("Submission rejected with HTTP {status}: {body}")]
    SubmissionRejected { status: u16, body: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a normalized output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanPrepError {
    /// True for failures a user can reasonably retry by re-running the
    /// same action (re-open the editor, submit again).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanPrepError::EngineUnavailable(_)
                | ScanPrepError::DownloadFailed { .. }
                | ScanPrepError::DownloadTimeout { .. }
                | ScanPrepError::SubmissionFailed { .. }
        )
    }
}
