//! Input resolution: turn user-supplied paths and URLs into [`RawFile`]s.
//!
//! Selection-time validation happens here, before anything reaches the
//! upload set: the extension must be on the allow-list and the file must
//! fit the size limit. The MIME type is sniffed from the magic bytes and
//! only falls back to the extension when the content is unrecognised.
//!
//! Inputs are resolved in order. The first bad input fails the whole
//! selection, so the caller can keep its current set untouched.

use crate::config::{OutputFormat, PipelineConfig};
use crate::error::ScanPrepError;
use crate::pipeline::raster;
use crate::upload::RawFile;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve every input to an in-memory file, preserving order.
pub async fn resolve_files<S: AsRef<str>>(
    inputs: &[S],
    config: &PipelineConfig,
) -> Result<Vec<RawFile>, ScanPrepError> {
    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        files.push(resolve_input(input.as_ref(), config).await?);
    }
    info!(
        "Selected {} file(s), {} bytes total",
        files.len(),
        files.iter().map(|f| f.bytes.len()).sum::<usize>()
    );
    Ok(files)
}

/// Resolve one path or URL.
pub async fn resolve_input(input: &str, config: &PipelineConfig) -> Result<RawFile, ScanPrepError> {
    if is_url(input) {
        download_url(input, config).await
    } else {
        resolve_local(Path::new(input), config).await
    }
}

/// Reject names outside the allow-list and sizes over the limit.
pub fn check_selection(name: &str, size: u64, config: &PipelineConfig) -> Result<(), ScanPrepError> {
    if !config.is_allowed_name(name) {
        return Err(ScanPrepError::UnsupportedFile {
            name: name.to_string(),
            allowed: config.allowed_extensions.join(", "),
        });
    }
    let limit = config.max_file_size_bytes();
    if size > limit {
        return Err(ScanPrepError::FileTooLarge {
            name: name.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// MIME type for `bytes`, sniffed first and guessed from `name` second.
pub fn detect_mime(name: &str, bytes: &[u8]) -> String {
    if let Some(mime) = raster::sniff_mime(bytes) {
        return mime.to_string();
    }
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
    .to_string()
}

async fn resolve_local(path: &Path, config: &PipelineConfig) -> Result<RawFile, ScanPrepError> {
    let path: PathBuf = path.to_path_buf();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ScanPrepError::PermissionDenied { path: path.clone() },
        _ => ScanPrepError::FileNotFound { path: path.clone() },
    })?;
    if !meta.is_file() {
        return Err(ScanPrepError::FileNotFound { path });
    }

    // Check before reading so an oversized file is never loaded.
    check_selection(&name, meta.len(), config)?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ScanPrepError::PermissionDenied { path: path.clone() },
        _ => ScanPrepError::FileNotFound { path: path.clone() },
    })?;

    let mime = detect_mime(&name, &bytes);
    debug!("Resolved local file: {} ({} bytes, {})", path.display(), bytes.len(), mime);
    Ok(RawFile::new(name, mime, bytes))
}

async fn download_url(url: &str, config: &PipelineConfig) -> Result<RawFile, ScanPrepError> {
    info!("Downloading image from: {}", url);
    let timeout_secs = config.download_timeout_secs;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ScanPrepError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ScanPrepError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ScanPrepError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ScanPrepError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let name = extract_filename(url, content_type.as_deref());

    // Fail early on the advertised length; the body is checked again below.
    check_selection(&name, response.content_length().unwrap_or(0), config)?;

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            ScanPrepError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ScanPrepError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;
    check_selection(&name, bytes.len() as u64, config)?;

    let mime = detect_mime(&name, &bytes);
    info!("Downloaded {} ({} bytes, {})", name, bytes.len(), mime);
    Ok(RawFile::new(name, mime, bytes.to_vec()))
}

/// Pick a filename from the URL path, or from the content type if the path has none.
fn extract_filename(url: &str, content_type: Option<&str>) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    let ext = content_type
        .and_then(|ct| ct.split(';').next())
        .and_then(OutputFormat::from_mime)
        .map(OutputFormat::extension)
        .unwrap_or("bin");
    format!("download.{ext}")
}
