//! Progress-callback trait for per-entry normalization events.
//!
//! Inject an [`Arc<dyn NormalizeProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events while the normalizer decodes, resizes and re-encodes a batch.
//!
//! # Example
//!
//! ```rust
//! use scanprep::{NormalizeProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl NormalizeProgressCallback for CountingCallback {
//!     fn on_entry_complete(&self, index: usize, total: usize, bytes: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("entry {}/{} done ({} bytes)", index + 1, total, bytes);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn NormalizeProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the normalizer as it processes each entry.
///
/// Entries are processed concurrently, so `on_entry_*` calls may arrive in
/// any order and from different threads. All methods default to no-ops.
pub trait NormalizeProgressCallback: Send + Sync {
    /// Called once before any entry is decoded.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when an entry's decode starts. `index` is 0-based.
    fn on_entry_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when an entry has been re-encoded.
    ///
    /// `bytes` is the size of the normalized payload.
    fn on_entry_complete(&self, index: usize, total: usize, bytes: usize) {
        let _ = (index, total, bytes);
    }

    /// Called when an entry fails. The batch is aborted after this.
    fn on_entry_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once when every entry has been normalized.
    ///
    /// Not called when the batch is aborted.
    fn on_batch_complete(&self, total: usize) {
        let _ = total;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl NormalizeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn NormalizeProgressCallback>;
