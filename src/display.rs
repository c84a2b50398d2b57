//! Display-URL lifecycle: transient references used to render thumbnails.
//!
//! Every upload entry owns exactly one [`DisplayUrl`]. The URL is issued
//! when the entry's bytes are written and revoked when they are overwritten
//! or the entry is destroyed. [`DisplayUrl`] is deliberately not `Clone`:
//! the only way to retire one is to hand it back to [`DisplayUrls`], either
//! through [`DisplayUrls::rotate`] or [`DisplayUrls::revoke`]. Rendering
//! glue borrows the string form; a borrowed string that outlives its URL
//! simply stops resolving.

use crate::upload::SharedBytes;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

const URL_PREFIX: &str = "blob:scanprep/";

/// A live reference to an entry's current bytes.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DisplayUrl(String);

impl DisplayUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct LiveBlob {
    bytes: SharedBytes,
    mime_type: String,
}

/// Issues and revokes display URLs.
///
/// Owned by the [`crate::upload::UploadSet`]; no other component holds one.
#[derive(Default)]
pub struct DisplayUrls {
    next_id: u64,
    live: HashMap<String, LiveBlob>,
}

impl DisplayUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh URL for `bytes`.
    pub fn issue(&mut self, bytes: SharedBytes, mime_type: &str) -> DisplayUrl {
        self.next_id += 1;
        let url = format!("{URL_PREFIX}{}", self.next_id);
        debug!("Issued {} ({} bytes, {})", url, bytes.len(), mime_type);
        self.live.insert(
            url.clone(),
            LiveBlob {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        DisplayUrl(url)
    }

    /// Revoke `url`. Returns false if it was not live.
    pub fn revoke(&mut self, url: DisplayUrl) -> bool {
        let removed = self.live.remove(&url.0).is_some();
        if removed {
            debug!("Revoked {}", url.0);
        }
        removed
    }

    /// Revoke the URL in `slot` and store a fresh one for the new bytes.
    ///
    /// The old URL is gone before the new one exists, so at no point are two
    /// URLs live for the same entry.
    pub fn rotate(&mut self, slot: &mut DisplayUrl, bytes: SharedBytes, mime_type: &str) {
        if self.live.remove(&slot.0).is_some() {
            debug!("Revoked {}", slot.0);
        }
        *slot = self.issue(bytes, mime_type);
    }

    /// Revoke every live URL.
    pub fn revoke_all(&mut self) {
        if !self.live.is_empty() {
            debug!("Revoking {} display URLs", self.live.len());
        }
        self.live.clear();
    }

    /// Look up the bytes behind a URL string.
    pub fn resolve(&self, url: &str) -> Option<(&[u8], &str)> {
        self.live
            .get(url)
            .map(|b| (b.bytes.as_ref(), b.mime_type.as_str()))
    }

    /// Render a live URL as a self-contained `data:` URI.
    pub fn data_uri(&self, url: &str) -> Option<String> {
        self.resolve(url)
            .map(|(bytes, mime)| format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
    }

    pub fn is_live(&self, url: &str) -> bool {
        self.live.contains_key(url)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
