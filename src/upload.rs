//! The upload set: the single source of truth for what will be submitted.
//!
//! Entries are only ever mutated through [`UploadSet::replace_all`],
//! [`UploadSet::replace_entry`] and the crate-internal batch commit used by
//! the normalizer. Entry fields are private, so no other code path can
//! write bytes without also rotating the entry's display URL.

use crate::display::{DisplayUrl, DisplayUrls};
use crate::error::ScanPrepError;
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable, cheaply clonable byte content.
pub type SharedBytes = Arc<[u8]>;

/// A raw file as selected by the user (drag-drop, file picker, CLI path).
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: SharedBytes,
}

impl RawFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<SharedBytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// One pending upload.
#[derive(Debug)]
pub struct UploadEntry {
    index: usize,
    original: RawFile,
    current_bytes: SharedBytes,
    current_mime_type: String,
    display_url: DisplayUrl,
}

impl UploadEntry {
    pub fn index(&self) -> usize {
        self.index
    }

    /// File name at selection time.
    pub fn name(&self) -> &str {
        &self.original.name
    }

    pub fn original_bytes(&self) -> &SharedBytes {
        &self.original.bytes
    }

    pub fn original_mime_type(&self) -> &str {
        &self.original.mime_type
    }

    /// Bytes that will be submitted.
    pub fn current_bytes(&self) -> &SharedBytes {
        &self.current_bytes
    }

    pub fn current_mime_type(&self) -> &str {
        &self.current_mime_type
    }

    pub fn display_url(&self) -> &str {
        self.display_url.as_str()
    }

    /// True once an edit or normalization has replaced the original bytes.
    pub fn is_modified(&self) -> bool {
        !Arc::ptr_eq(&self.current_bytes, &self.original.bytes)
    }
}

/// One item of a [`Snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotItem {
    pub index: usize,
    pub name: String,
    pub bytes: SharedBytes,
    pub mime_type: String,
}

/// The set's content at the time [`UploadSet::snapshot`] was called.
///
/// Iterating is restartable: [`Snapshot::iter`] can be called any number of
/// times. Later mutations of the set are not reflected.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    items: Vec<SnapshotItem>,
}

impl Snapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, SnapshotItem> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&SnapshotItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of all payload sizes in bytes.
    pub fn total_bytes(&self) -> usize {
        self.items.iter().map(|i| i.bytes.len()).sum()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a SnapshotItem;
    type IntoIter = std::slice::Iter<'a, SnapshotItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// A replacement destined for one entry, produced off to the side and then
/// committed with [`UploadSet::commit_batch`].
#[derive(Debug, Clone)]
pub(crate) struct Replacement {
    pub index: usize,
    pub bytes: SharedBytes,
    pub mime_type: String,
}

/// Ordered collection of pending uploads.
#[derive(Default)]
pub struct UploadSet {
    entries: Vec<UploadEntry>,
    urls: DisplayUrls,
    generation: u64,
}

impl UploadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard every entry and install `files` in order.
    ///
    /// The new entries are fully built before the old ones are dropped, so a
    /// caller never sees a half-replaced set.
    pub fn replace_all<I>(&mut self, files: I)
    where
        I: IntoIterator<Item = RawFile>,
    {
        let entries: Vec<UploadEntry> = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| {
                let display_url = self.urls.issue(Arc::clone(&file.bytes), &file.mime_type);
                UploadEntry {
                    index,
                    current_bytes: Arc::clone(&file.bytes),
                    current_mime_type: file.mime_type.clone(),
                    original: file,
                    display_url,
                }
            })
            .collect();

        let previous = std::mem::replace(&mut self.entries, entries);
        for old in previous {
            self.urls.revoke(old.display_url);
        }
        self.generation += 1;
        info!("Upload set replaced: {} entries", self.entries.len());
    }

    /// Swap the bytes of entry `index` and rotate its display URL.
    pub fn replace_entry(
        &mut self,
        index: usize,
        bytes: impl Into<SharedBytes>,
        mime_type: &str,
    ) -> Result<(), ScanPrepError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(ScanPrepError::IndexOutOfRange { index, len })?;
        Self::swap_entry(&mut self.urls, entry, bytes.into(), mime_type);
        Ok(())
    }

    /// Commit a set of replacements all-or-nothing.
    ///
    /// Every index is validated before any entry is touched.
    pub(crate) fn commit_batch(&mut self, batch: Vec<Replacement>) -> Result<(), ScanPrepError> {
        let len = self.entries.len();
        if let Some(bad) = batch.iter().find(|r| r.index >= len) {
            return Err(ScanPrepError::IndexOutOfRange {
                index: bad.index,
                len,
            });
        }
        for r in batch {
            let entry = &mut self.entries[r.index];
            Self::swap_entry(&mut self.urls, entry, r.bytes, &r.mime_type);
        }
        Ok(())
    }

    fn swap_entry(urls: &mut DisplayUrls, entry: &mut UploadEntry, bytes: SharedBytes, mime_type: &str) {
        urls.rotate(&mut entry.display_url, Arc::clone(&bytes), mime_type);
        debug!(
            "Entry {} ({}) replaced: {} → {} bytes, {}",
            entry.index,
            entry.original.name,
            entry.current_bytes.len(),
            bytes.len(),
            mime_type
        );
        entry.current_bytes = bytes;
        entry.current_mime_type = mime_type.to_string();
    }

    /// Remove every entry and revoke their display URLs.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.urls.revoke_all();
        self.generation += 1;
    }

    /// Bumped whenever the whole selection is replaced or cleared.
    ///
    /// Per-entry replacements keep the generation; they edit the same files.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, index: usize) -> Option<&UploadEntry> {
        self.entries.get(index)
    }

    /// Like [`get`](Self::get) but with an [`ScanPrepError::IndexOutOfRange`] error.
    pub fn entry(&self, index: usize) -> Result<&UploadEntry, ScanPrepError> {
        self.entries.get(index).ok_or(ScanPrepError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    pub fn entries(&self) -> std::slice::Iter<'_, UploadEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-only access for rendering glue (`resolve`, `data_uri`).
    pub fn display_urls(&self) -> &DisplayUrls {
        &self.urls
    }

    /// Capture `(name, current bytes, current MIME type)` for every entry.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            items: self
                .entries
                .iter()
                .map(|e| SnapshotItem {
                    index: e.index,
                    name: e.original.name.clone(),
                    bytes: Arc::clone(&e.current_bytes),
                    mime_type: e.current_mime_type.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(n: usize) -> Vec<RawFile> {
        (0..n)
            .map(|i| RawFile::new(format!("scan{i}.png"), "image/png", vec![i as u8; 4]))
            .collect()
    }

    #[test]
    fn replace_all_installs_in_order() {
        let mut set = UploadSet::new();
        set.replace_all(files(3));
        assert_eq!(set.len(), 3);
        for (i, e) in set.entries().enumerate() {
            assert_eq!(e.index(), i);
            assert_eq!(e.name(), format!("scan{i}.png"));
            assert_eq!(e.current_bytes(), e.original_bytes());
            assert!(!e.is_modified());
        }
        assert_eq!(set.display_urls().live_count(), 3);
    }

    #[test]
    fn replace_all_revokes_previous_urls() {
        let mut set = UploadSet::new();
        set.replace_all(files(3));
        let old: Vec<String> = set.entries().map(|e| e.display_url().to_string()).collect();
        set.replace_all(files(2));
        assert_eq!(set.display_urls().live_count(), 2);
        for url in &old {
            assert!(!set.display_urls().is_live(url));
        }
    }

    #[test]
    fn replace_entry_touches_only_that_index() {
        let mut set = UploadSet::new();
        set.replace_all(files(3));
        let before = set.snapshot();

        set.replace_entry(1, vec![9u8, 9, 9], "image/jpeg").unwrap();
        let after = set.snapshot();

        assert_eq!(&*after.get(1).unwrap().bytes, &[9u8, 9, 9]);
        assert_eq!(after.get(1).unwrap().mime_type, "image/jpeg");
        for i in [0, 2] {
            assert_eq!(after.get(i).unwrap().bytes, before.get(i).unwrap().bytes);
            assert_eq!(after.get(i).unwrap().mime_type, before.get(i).unwrap().mime_type);
        }
        assert!(set.get(1).unwrap().is_modified());
        assert_eq!(set.get(1).unwrap().original_mime_type(), "image/png");
    }

    #[test]
    fn replace_entry_rotates_display_url() {
        let mut set = UploadSet::new();
        set.replace_all(files(1));
        let mut seen = vec![set.get(0).unwrap().display_url().to_string()];
        for round in 0..4u8 {
            set.replace_entry(0, vec![round], "image/png").unwrap();
            let url = set.get(0).unwrap().display_url().to_string();
            assert_eq!(set.display_urls().live_count(), 1);
            for stale in &seen {
                assert!(!set.display_urls().is_live(stale));
            }
            assert_eq!(set.display_urls().resolve(&url).unwrap().0, &[round]);
            seen.push(url);
        }
    }

    #[test]
    fn replace_entry_out_of_range_mutates_nothing() {
        let mut set = UploadSet::new();
        set.replace_all(files(2));
        let before = set.snapshot();
        let err = set.replace_entry(2, vec![1u8], "image/png").unwrap_err();
        assert!(matches!(err, ScanPrepError::IndexOutOfRange { index: 2, len: 2 }));
        let after = set.snapshot();
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.bytes, b.bytes);
        }
        assert_eq!(set.display_urls().live_count(), 2);
    }

    #[test]
    fn generation_tracks_whole_selection_changes() {
        let mut set = UploadSet::new();
        let g0 = set.generation();
        set.replace_all(files(2));
        let g1 = set.generation();
        assert_ne!(g0, g1);
        set.replace_entry(0, vec![5u8], "image/png").unwrap();
        assert_eq!(set.generation(), g1);
        set.clear();
        assert_ne!(set.generation(), g1);
    }

    #[test]
    fn commit_batch_is_all_or_nothing() {
        let mut set = UploadSet::new();
        set.replace_all(files(2));
        let batch = vec![
            Replacement {
                index: 0,
                bytes: Arc::from(&b"new"[..]),
                mime_type: "image/jpeg".into(),
            },
            Replacement {
                index: 7,
                bytes: Arc::from(&b"bad"[..]),
                mime_type: "image/jpeg".into(),
            },
        ];
        assert!(set.commit_batch(batch).is_err());
        assert!(!set.get(0).unwrap().is_modified());
    }

    #[test]
    fn snapshot_is_restartable_and_frozen() {
        let mut set = UploadSet::new();
        set.replace_all(files(2));
        let snap = set.snapshot();
        set.replace_entry(0, vec![42u8], "image/jpeg").unwrap();

        let first: Vec<_> = snap.iter().map(|i| i.name.clone()).collect();
        let second: Vec<_> = (&snap).into_iter().map(|i| i.name.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(snap.get(0).unwrap().mime_type, "image/png");
        assert_eq!(snap.total_bytes(), 8);
    }

    #[test]
    fn clear_revokes_everything() {
        let mut set = UploadSet::new();
        set.replace_all(files(3));
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.display_urls().live_count(), 0);
    }
}
