//! Configuration types for scan preparation.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. One struct holds every knob, from the
//! normalization bound to the upload endpoint. The same config can be shared
//! by the editor, the normalizer and the submitter.

use crate::error::ScanPrepError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for selecting, editing, normalizing and submitting scans.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use scanprep::{OutputFormat, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .max_dimension(1600)
///     .output_format(OutputFormat::Png)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Longest edge, in pixels, an entry may have after normalization. Default: 1024.
    ///
    /// Images are only ever scaled down to meet this bound, never up.
    pub max_dimension: u32,

    /// Encoding applied to every entry during normalization. Default: JPEG.
    pub output_format: OutputFormat,

    /// Lossy encoder quality, 1–100. Default: 80.
    pub quality: u8,

    /// Entries decoded/encoded at once during normalization. Default: 8.
    pub concurrency: usize,

    /// Target luminance statistics for auto-enhance.
    pub enhance: EnhanceTargets,

    /// Inclusive clamp domain for brightness and contrast factors. Default: (0.5, 1.5).
    pub factor_bounds: (f64, f64),

    /// Lower-case file extensions accepted at selection time.
    /// Default: png, jpg, jpeg, webp.
    pub allowed_extensions: Vec<String>,

    /// Per-file size limit at selection time, in MiB. Default: 8.
    pub max_file_size_mb: u64,

    /// Endpoint receiving the multipart batch. Required for HTTP submission.
    pub upload_url: Option<String>,

    /// Multipart field name used for every file part. Default: "files".
    pub upload_field: String,

    /// Timeout for the upload request in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional callback receiving per-entry normalization events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            output_format: OutputFormat::default(),
            quality: 80,
            concurrency: 8,
            enhance: EnhanceTargets::default(),
            factor_bounds: (0.5, 1.5),
            allowed_extensions: ["png", "jpg", "jpeg", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size_mb: 8,
            upload_url: None,
            upload_field: "files".to_string(),
            request_timeout_secs: 120,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_dimension", &self.max_dimension)
            .field("output_format", &self.output_format)
            .field("quality", &self.quality)
            .field("concurrency", &self.concurrency)
            .field("enhance", &self.enhance)
            .field("factor_bounds", &self.factor_bounds)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("max_file_size_mb", &self.max_file_size_mb)
            .field("upload_url", &self.upload_url)
            .field("upload_field", &self.upload_field)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn NormalizeProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Size limit in bytes derived from `max_file_size_mb`.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Clamp a brightness/contrast factor into `factor_bounds`.
    pub fn clamp_factor(&self, v: f64) -> f64 {
        v.clamp(self.factor_bounds.0, self.factor_bounds.1)
    }

    /// True when `name` ends in an allowed extension (case-insensitive).
    pub fn is_allowed_name(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|a| *a == ext)
            }
            None => false,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px.max(16);
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn quality(mut self, q: u8) -> Self {
        self.config.quality = q.clamp(1, 100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn enhance_targets(mut self, targets: EnhanceTargets) -> Self {
        self.config.enhance = targets;
        self
    }

    pub fn factor_bounds(mut self, lo: f64, hi: f64) -> Self {
        self.config.factor_bounds = (lo, hi);
        self
    }

    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.max_file_size_mb = mb;
        self
    }

    pub fn upload_url(mut self, url: impl Into<String>) -> Self {
        self.config.upload_url = Some(url.into());
        self
    }

    pub fn upload_field(mut self, field: impl Into<String>) -> Self {
        self.config.upload_field = field.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ScanPrepError> {
        let c = &self.config;
        let (lo, hi) = c.factor_bounds;
        if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || lo > hi {
            return Err(ScanPrepError::InvalidConfig(format!(
                "factor bounds must satisfy 0 < lo ≤ hi, got ({lo}, {hi})"
            )));
        }
        if !(c.enhance.mean > 0.0 && c.enhance.mean <= 1.0) {
            return Err(ScanPrepError::InvalidConfig(format!(
                "target mean must be in (0, 1], got {}",
                c.enhance.mean
            )));
        }
        if !(c.enhance.std_dev > 0.0 && c.enhance.std_dev <= 1.0) {
            return Err(ScanPrepError::InvalidConfig(format!(
                "target std-dev must be in (0, 1], got {}",
                c.enhance.std_dev
            )));
        }
        if c.allowed_extensions.is_empty() {
            return Err(ScanPrepError::InvalidConfig(
                "at least one allowed extension is required".into(),
            ));
        }
        if c.upload_field.trim().is_empty() {
            return Err(ScanPrepError::InvalidConfig(
                "upload field name must not be empty".into(),
            ));
        }
        if let Some(ref url) = c.upload_url {
            if !crate::pipeline::input::is_url(url) {
                return Err(ScanPrepError::InvalidConfig(format!(
                    "upload URL must be http(s), got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Encoding produced by the normalizer.
///
/// JPEG is the default: scans are photographs of paper, and a lossy encode
/// at quality 80 keeps uploads small without hurting legibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    /// Lossless WebP; the `image` encoder has no lossy mode.
    WebP,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }

    /// Map a MIME type to an encodable format, if there is one.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(OutputFormat::Jpeg),
            "image/png" => Some(OutputFormat::Png),
            "image/webp" => Some(OutputFormat::WebP),
            _ => None,
        }
    }
}

/// Luminance statistics auto-enhance steers towards, both in `[0, 1]`.
///
/// The defaults push a scan towards a bright page with well-separated
/// midtones. They are a heuristic, not a perceptual optimum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhanceTargets {
    /// Target mean luminance. Default: 0.75.
    pub mean: f64,
    /// Target luminance standard deviation. Default: 0.25.
    pub std_dev: f64,
}

impl Default for EnhanceTargets {
    fn default() -> Self {
        Self {
            mean: 0.75,
            std_dev: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_browser_pipeline() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_dimension, 1024);
        assert_eq!(c.output_format, OutputFormat::Jpeg);
        assert_eq!(c.quality, 80);
        assert_eq!(c.factor_bounds, (0.5, 1.5));
        assert_eq!(c.enhance, EnhanceTargets { mean: 0.75, std_dev: 0.25 });
        assert_eq!(c.upload_field, "files");
        assert_eq!(c.max_file_size_bytes(), 8 * 1024 * 1024);
    }

    #[test]
    fn builder_clamps_numeric_knobs() {
        let c = PipelineConfig::builder()
            .quality(0)
            .concurrency(0)
            .max_dimension(3)
            .build()
            .unwrap();
        assert_eq!(c.quality, 1);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_dimension, 16);
    }

    #[test]
    fn builder_rejects_inverted_bounds() {
        let err = PipelineConfig::builder()
            .factor_bounds(1.5, 0.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, ScanPrepError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_targets() {
        let err = PipelineConfig::builder()
            .enhance_targets(EnhanceTargets { mean: 0.0, std_dev: 0.25 })
            .build()
            .unwrap_err();
        assert!(matches!(err, ScanPrepError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_non_http_upload_url() {
        assert!(PipelineConfig::builder()
            .upload_url("ftp://example.com/upload")
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .upload_url("https://example.com/upload")
            .build()
            .is_ok());
    }

    #[test]
    fn allowed_extensions_are_normalised() {
        let c = PipelineConfig::builder()
            .allowed_extensions([".PNG", "Tif", ""])
            .build()
            .unwrap();
        assert_eq!(c.allowed_extensions, vec!["png", "tif"]);
        assert!(c.is_allowed_name("scan.png"));
        assert!(c.is_allowed_name("SCAN.TIF"));
        assert!(!c.is_allowed_name("scan.jpg"));
        assert!(!c.is_allowed_name("noext"));
    }

    #[test]
    fn clamp_factor_respects_bounds() {
        let c = PipelineConfig::default();
        assert_eq!(c.clamp_factor(2.0), 1.5);
        assert_eq!(c.clamp_factor(0.1), 0.5);
        assert_eq!(c.clamp_factor(1.2), 1.2);
    }

    #[test]
    fn output_format_mime_mapping() {
        assert_eq!(OutputFormat::from_mime("image/JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_mime("image/png"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::from_mime("image/gif"), None);
        assert_eq!(OutputFormat::WebP.mime_type(), "image/webp");
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
    }
}
