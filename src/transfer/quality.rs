//! Existing-file quality comparison.

use std::path::Path;

use async_trait::async_trait;

use crate::config::{QualityCheckSettings, QualityCheckType};
use crate::source::Document;

/// Decides whether a candidate document should replace a file that is
/// already at its destination. Consulted only when the destination exists.
#[async_trait]
pub trait QualityOracle: Send + Sync {
    async fn should_replace(&self, existing: &Path, candidate: &Document) -> bool;
}

/// Size/bitrate comparison for audio documents.
///
/// Non-audio files are never replaced, and neither is anything while the
/// check is disabled.
pub struct AudioQualityOracle {
    settings: QualityCheckSettings,
}

impl AudioQualityOracle {
    pub fn new(settings: QualityCheckSettings) -> Self {
        Self { settings }
    }

    fn size_ok(&self, existing_size: u64, candidate: &Document) -> bool {
        let min_bytes = (self.settings.min_size_mb * 1024.0 * 1024.0) as u64;
        candidate.size > existing_size && candidate.size >= min_bytes
    }

    fn bitrate_ok(&self, candidate: &Document) -> bool {
        candidate
            .bitrate
            .is_some_and(|bps| bps / 1000 >= self.settings.min_bitrate_kbps)
    }
}

#[async_trait]
impl QualityOracle for AudioQualityOracle {
    async fn should_replace(&self, existing: &Path, candidate: &Document) -> bool {
        if !self.settings.enabled || !candidate.mime_type.contains("audio") {
            return false;
        }

        let existing_size = match tokio::fs::metadata(existing).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::warn!(path = %existing.display(), error = %e, "Cannot stat existing file, keeping it");
                return false;
            }
        };

        let size = self.size_ok(existing_size, candidate);
        let bitrate = self.bitrate_ok(candidate);
        let replace = match self.settings.check_type {
            QualityCheckType::Size => size,
            QualityCheckType::Bitrate => bitrate,
            QualityCheckType::Both => size && bitrate,
        };
        tracing::debug!(
            path = %existing.display(),
            existing_size,
            candidate_size = candidate.size,
            candidate_bitrate = ?candidate.bitrate,
            replace,
            "Quality comparison"
        );
        replace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(check_type: QualityCheckType) -> QualityCheckSettings {
        QualityCheckSettings {
            enabled: true,
            check_type,
            min_size_mb: 1.0,
            min_bitrate_kbps: 256,
        }
    }

    fn audio(size: u64, bitrate: Option<u32>) -> Document {
        Document {
            mime_type: "audio/flac".to_string(),
            size,
            bitrate,
            ..Document::default()
        }
    }

    fn existing(dir: &TempDir, len: usize) -> std::path::PathBuf {
        let path = dir.path().join("track.flac");
        std::fs::write(&path, vec![0u8; len]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_disabled_never_replaces() {
        let dir = TempDir::new().unwrap();
        let path = existing(&dir, 10);
        let oracle = AudioQualityOracle::new(QualityCheckSettings::default());
        assert!(!oracle.should_replace(&path, &audio(50_000_000, Some(320_000))).await);
    }

    #[tokio::test]
    async fn test_size_check_requires_bigger_and_minimum() {
        let dir = TempDir::new().unwrap();
        let path = existing(&dir, 1_000);
        let oracle = AudioQualityOracle::new(settings(QualityCheckType::Size));
        assert!(oracle.should_replace(&path, &audio(2_000_000, None)).await);
        // Bigger than existing but under the 1 MB floor.
        assert!(!oracle.should_replace(&path, &audio(2_000, None)).await);
        assert!(!oracle.should_replace(&path, &audio(500, None)).await);
    }

    #[tokio::test]
    async fn test_bitrate_check() {
        let dir = TempDir::new().unwrap();
        let path = existing(&dir, 1_000);
        let oracle = AudioQualityOracle::new(settings(QualityCheckType::Bitrate));
        assert!(oracle.should_replace(&path, &audio(10, Some(320_000))).await);
        assert!(!oracle.should_replace(&path, &audio(10, Some(128_000))).await);
        assert!(!oracle.should_replace(&path, &audio(10, None)).await);
    }

    #[tokio::test]
    async fn test_both_requires_every_check() {
        let dir = TempDir::new().unwrap();
        let path = existing(&dir, 1_000);
        let oracle = AudioQualityOracle::new(settings(QualityCheckType::Both));
        assert!(oracle.should_replace(&path, &audio(2_000_000, Some(320_000))).await);
        assert!(!oracle.should_replace(&path, &audio(2_000_000, Some(96_000))).await);
    }

    #[tokio::test]
    async fn test_non_audio_is_never_replaced() {
        let dir = TempDir::new().unwrap();
        let path = existing(&dir, 10);
        let oracle = AudioQualityOracle::new(settings(QualityCheckType::Size));
        let video = Document {
            mime_type: "video/mp4".to_string(),
            size: 99_000_000,
            ..Document::default()
        };
        assert!(!oracle.should_replace(&path, &video).await);
    }
}
