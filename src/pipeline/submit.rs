//! Submission boundary: hand the normalized batch to the conversion service.
//!
//! The core only needs [`Submitter::submit`]. [`HttpSubmitter`] sends one
//! `multipart/form-data` POST with every entry as a file part under the
//! configured field name; tests plug in a recording fake.

use crate::config::PipelineConfig;
use crate::error::ScanPrepError;
use crate::pipeline::normalize::{self, NormalizedImage};
use crate::upload::{Snapshot, UploadSet};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// What the server answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub status: u16,
    pub body: String,
}

/// Anything that can accept a batch of files.
pub trait Submitter: Send + Sync {
    fn submit(&self, batch: &Snapshot)
        -> impl Future<Output = Result<SubmissionReceipt, ScanPrepError>> + Send;
}

/// Multipart HTTP submitter.
#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    client: reqwest::Client,
    url: String,
    field: String,
}

impl HttpSubmitter {
    pub fn new(url: impl Into<String>, field: impl Into<String>, timeout_secs: u64) -> Result<Self, ScanPrepError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ScanPrepError::SubmissionFailed {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            field: field.into(),
        })
    }

    /// Build from `upload_url`, `upload_field` and `request_timeout_secs`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ScanPrepError> {
        let url = config.upload_url.clone().ok_or_else(|| {
            ScanPrepError::InvalidConfig("no upload URL configured".into())
        })?;
        Self::new(url, config.upload_field.clone(), config.request_timeout_secs)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn form(&self, batch: &Snapshot) -> Result<Form, ScanPrepError> {
        let mut form = Form::new();
        for item in batch {
            let part = Part::bytes(item.bytes.to_vec())
                .file_name(item.name.clone())
                .mime_str(&item.mime_type)
                .map_err(|e| ScanPrepError::SubmissionFailed {
                    reason: format!("bad MIME type '{}' for {}: {}", item.mime_type, item.name, e),
                })?;
            form = form.part(self.field.clone(), part);
        }
        Ok(form)
    }
}

impl Submitter for HttpSubmitter {
    async fn submit(&self, batch: &Snapshot) -> Result<SubmissionReceipt, ScanPrepError> {
        let form = self.form(batch)?;
        info!(
            "Submitting {} file(s), {} bytes to {}",
            batch.len(),
            batch.total_bytes(),
            self.url
        );

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ScanPrepError::SubmissionFailed {
                reason: if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanPrepError::SubmissionFailed {
                reason: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(ScanPrepError::SubmissionRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(SubmissionReceipt {
            status: status.as_u16(),
            body,
        })
    }
}

/// Normalize the whole set, then submit it.
///
/// If any entry fails to normalize, nothing is sent and the set is
/// unchanged. A failed submission keeps the normalized bytes in the set.
pub async fn submit_batch<S: Submitter>(
    set: &mut UploadSet,
    submitter: &S,
    config: &PipelineConfig,
) -> Result<(Vec<NormalizedImage>, SubmissionReceipt), ScanPrepError> {
    let normalized = normalize::normalize_set(set, config).await?;
    let snapshot = set.snapshot();
    let receipt = submitter
        .submit(&snapshot)
        .await
        .inspect_err(|e| warn!("Submission failed: {}", e))?;
    info!("Batch accepted with HTTP {}", receipt.status);
    Ok((normalized, receipt))
}
