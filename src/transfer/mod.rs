//! Media placement on local storage.
//!
//! A document is written to `<root>/<message_id>_<name>.part` by the
//! [`BlobStore`] and renamed onto `<root>/<name>` only once the transfer is
//! complete, so the final path either does not exist or holds a whole file.

mod quality;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TransferError;
use crate::source::{BlobStore, Document, MessageId};

pub use quality::{AudioQualityOracle, QualityOracle};

/// Result of a successful [`MediaStore::place`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Newly written.
    Stored { path: PathBuf, bytes: u64 },
    /// An existing file was overwritten after the quality oracle agreed.
    Replaced { path: PathBuf, bytes: u64 },
    /// The destination already exists and is kept; nothing was transferred.
    AlreadyPresent { path: PathBuf },
}

impl Placement {
    pub fn path(&self) -> &Path {
        match self {
            Placement::Stored { path, .. }
            | Placement::Replaced { path, .. }
            | Placement::AlreadyPresent { path } => path,
        }
    }
}

/// Replace anything outside word characters, `-`, `.` and space with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Final file name for a document: its filename attribute, else its mime type.
pub fn file_name_for(document: &Document) -> String {
    match document.file_name.as_deref() {
        Some(name) if !name.trim().is_empty() => sanitize_file_name(name),
        _ => sanitize_file_name(&document.mime_type.replace('/', "_")),
    }
}

/// Logs transfer progress once per 10% stage.
pub struct ProgressTracker {
    label: String,
    last_stage: AtomicU64,
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_stage: AtomicU64::new(0),
        }
    }

    pub fn update(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let stage = (done.saturating_mul(10) / total).min(10);
        let previous = self.last_stage.fetch_max(stage, Ordering::Relaxed);
        if stage > previous {
            tracing::info!(
                file = %self.label,
                percent = stage * 10,
                done,
                total,
                "Transfer progress"
            );
        }
    }

    /// Last logged stage, `0..=10`.
    pub fn stage(&self) -> u64 {
        self.last_stage.load(Ordering::Relaxed)
    }
}

/// Places documents under a root directory.
pub struct MediaStore {
    root: PathBuf,
    blobs: Arc<dyn BlobStore>,
    oracle: Arc<dyn QualityOracle>,
    max_size: u64,
}

impl MediaStore {
    pub fn new(
        root: impl Into<PathBuf>,
        blobs: Arc<dyn BlobStore>,
        oracle: Arc<dyn QualityOracle>,
        max_size: u64,
    ) -> Self {
        Self {
            root: root.into(),
            blobs,
            oracle,
            max_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn destination(&self, document: &Document) -> PathBuf {
        self.root.join(file_name_for(document))
    }

    pub fn staging(&self, message_id: MessageId, document: &Document) -> PathBuf {
        self.root
            .join(format!("{}_{}.part", message_id, file_name_for(document)))
    }

    /// Transfer `document` and move it into place.
    pub async fn place(
        &self,
        channel: &str,
        message_id: MessageId,
        document: &Document,
    ) -> Result<Placement, TransferError> {
        if document.size > self.max_size {
            return Err(TransferError::TooLarge {
                size: document.size,
                max: self.max_size,
            });
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| TransferError::storage(&self.root, e))?;

        let destination = self.destination(document);
        let exists = tokio::fs::try_exists(&destination)
            .await
            .map_err(|e| TransferError::storage(&destination, e))?;
        if exists {
            if !self.oracle.should_replace(&destination, document).await {
                tracing::info!(
                    channel,
                    message_id,
                    path = %destination.display(),
                    "File already exists, skipping transfer"
                );
                return Ok(Placement::AlreadyPresent { path: destination });
            }
            tracing::info!(
                channel,
                message_id,
                path = %destination.display(),
                "Replacing existing file with better candidate"
            );
        }

        let staging = self.staging(message_id, document);
        let tracker = ProgressTracker::new(file_name_for(document));
        let progress = |done: u64, total: u64| tracker.update(done, total);

        let bytes = match self
            .blobs
            .transfer(channel, message_id, document, &staging, &progress)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&staging).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&staging, &destination).await {
            discard(&staging).await;
            return Err(TransferError::storage(&destination, e));
        }

        tracing::info!(
            channel,
            message_id,
            path = %destination.display(),
            bytes,
            "File stored"
        );
        Ok(if exists {
            Placement::Replaced {
                path: destination,
                bytes,
            }
        } else {
            Placement::Stored {
                path: destination,
                bytes,
            }
        })
    }
}

async fn discard(staging: &Path) {
    match tokio::fs::remove_file(staging).await {
        Ok(()) => tracing::debug!(path = %staging.display(), "Removed partial staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staging file")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QualityCheckSettings, QualityCheckType};
    use crate::error::SourceError;
    use crate::source::ProgressFn;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Writes `document.size` bytes in four chunks, or fails halfway.
    struct FakeBlobs {
        calls: AtomicUsize,
        fail_midway: bool,
    }

    impl FakeBlobs {
        fn new(fail_midway: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_midway,
            })
        }
    }

    #[async_trait]
    impl BlobStore for FakeBlobs {
        async fn transfer(
            &self,
            _channel: &str,
            _message_id: MessageId,
            document: &Document,
            destination: &Path,
            progress: ProgressFn<'_>,
        ) -> Result<u64, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let total = document.size;
            let half = vec![7u8; (total / 2) as usize];
            tokio::fs::write(destination, &half)
                .await
                .map_err(|e| TransferError::storage(destination, e))?;
            progress(total / 2, total);
            if self.fail_midway {
                return Err(SourceError::Connection("reset by peer".to_string()).into());
            }
            let full = vec![7u8; total as usize];
            tokio::fs::write(destination, &full)
                .await
                .map_err(|e| TransferError::storage(destination, e))?;
            progress(total, total);
            Ok(total)
        }
    }

    fn never_replace() -> Arc<dyn QualityOracle> {
        Arc::new(AudioQualityOracle::new(QualityCheckSettings::default()))
    }

    fn doc(name: &str, size: u64) -> Document {
        Document {
            mime_type: "audio/mpeg".to_string(),
            size,
            file_name: Some(name.to_string()),
            ..Document::default()
        }
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".part"))
            .collect()
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b:c?.mp3"), "a_b_c_.mp3");
        assert_eq!(sanitize_file_name("周杰伦 - 晴天.flac"), "周杰伦 - 晴天.flac");
        assert_eq!(sanitize_file_name(".."), "document");
        assert_eq!(sanitize_file_name("   "), "document");
    }

    #[test]
    fn test_file_name_falls_back_to_mime() {
        let nameless = Document {
            mime_type: "video/mp4".to_string(),
            ..Document::default()
        };
        assert_eq!(file_name_for(&nameless), "video_mp4");
    }

    #[test]
    fn test_progress_tracker_stages() {
        let tracker = ProgressTracker::new("x");
        tracker.update(5, 100);
        assert_eq!(tracker.stage(), 0);
        tracker.update(35, 100);
        assert_eq!(tracker.stage(), 3);
        tracker.update(20, 100);
        assert_eq!(tracker.stage(), 3);
        tracker.update(100, 100);
        assert_eq!(tracker.stage(), 10);
        tracker.update(1, 0);
        assert_eq!(tracker.stage(), 10);
    }

    #[tokio::test]
    async fn test_place_stores_file_atomically() {
        let dir = TempDir::new().unwrap();
        let blobs = FakeBlobs::new(false);
        let store = MediaStore::new(dir.path(), blobs.clone(), never_replace(), 1_000);

        let placement = store.place("chan", 101, &doc("song.mp3", 64)).await.unwrap();
        assert_eq!(
            placement,
            Placement::Stored {
                path: dir.path().join("song.mp3"),
                bytes: 64
            }
        );
        assert_eq!(std::fs::metadata(dir.path().join("song.mp3")).unwrap().len(), 64);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_existing_file_is_a_noop() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"old").unwrap();
        let blobs = FakeBlobs::new(false);
        let store = MediaStore::new(dir.path(), blobs.clone(), never_replace(), 1_000);

        let placement = store.place("chan", 101, &doc("song.mp3", 64)).await.unwrap();
        assert!(matches!(placement, Placement::AlreadyPresent { .. }));
        assert_eq!(blobs.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(dir.path().join("song.mp3")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_better_candidate_replaces_existing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"old").unwrap();
        let oracle = Arc::new(AudioQualityOracle::new(QualityCheckSettings {
            enabled: true,
            check_type: QualityCheckType::Size,
            min_size_mb: 0.0,
            min_bitrate_kbps: 0,
        }));
        let store = MediaStore::new(dir.path(), FakeBlobs::new(false), oracle, 1_000);

        let placement = store.place("chan", 5, &doc("song.mp3", 64)).await.unwrap();
        assert!(matches!(placement, Placement::Replaced { bytes: 64, .. }));
        assert_eq!(std::fs::metadata(dir.path().join("song.mp3")).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_failed_transfer_discards_staging() {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path(), FakeBlobs::new(true), never_replace(), 1_000);

        let err = store.place("chan", 7, &doc("song.mp3", 64)).await.unwrap_err();
        assert!(matches!(err, TransferError::Interrupted(_)));
        assert!(!dir.path().join("song.mp3").exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_oversized_document_is_rejected_before_transfer() {
        let dir = TempDir::new().unwrap();
        let blobs = FakeBlobs::new(false);
        let store = MediaStore::new(dir.path(), blobs.clone(), never_replace(), 10);

        let err = store.place("chan", 1, &doc("big.mp3", 11)).await.unwrap_err();
        assert!(matches!(err, TransferError::TooLarge { size: 11, max: 10 }));
        assert_eq!(blobs.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_staging_path_is_next_to_destination() {
        let store = MediaStore::new("/data/downloads", FakeBlobs::new(false), never_replace(), 1);
        let d = doc("a.mp3", 1);
        assert_eq!(store.staging(42, &d), PathBuf::from("/data/downloads/42_a.mp3.part"));
        assert_eq!(store.destination(&d), PathBuf::from("/data/downloads/a.mp3"));
    }
}
