//! Remote message source.
//!
//! The protocol client itself lives outside this crate; the engine only sees
//! it through [`MessageSource`] (pagination, single-message lookup, bot
//! round-trips) and [`BlobStore`] (document transfer). [`HttpBridgeSource`]
//! implements both against an HTTP bridge in front of the real client.

mod http;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

pub use http::HttpBridgeSource;

/// Identifier of a message within its channel. Strictly increasing.
pub type MessageId = i64;

/// Display information about a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub title: String,
}

/// A binary document attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Source-side handle used by the blob store.
    #[serde(default)]
    pub file_ref: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    /// Declared duration in seconds (audio/video).
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Declared title (audio metadata).
    #[serde(default)]
    pub title: Option<String>,
    /// Declared bitrate in bits per second.
    #[serde(default)]
    pub bitrate: Option<u32>,
}

impl Document {
    /// Text the language predicate is evaluated against.
    pub fn label(&self) -> Option<&str> {
        self.file_name.as_deref().or(self.title.as_deref())
    }
}

/// An immutable message fetched from a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document: Option<Document>,
    /// URLs from inline link entities.
    #[serde(default)]
    pub links: Vec<String>,
}

impl Message {
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_link(mut self, url: impl Into<String>) -> Self {
        self.links.push(url.into());
        self
    }
}

/// Paginated access to channel messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Look up a channel's display information.
    async fn describe(&self, channel: &str) -> Result<ChannelInfo, SourceError>;

    /// Up to `limit` messages with `id > min_id`, oldest first.
    ///
    /// Implementations may return overlapping pages across calls; the
    /// fetcher's dedup window absorbs the overlap.
    async fn fetch_page(
        &self,
        channel: &str,
        min_id: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, SourceError>;

    /// Fetch a single message, `None` if it does not exist.
    async fn resolve(
        &self,
        channel: &str,
        message_id: MessageId,
    ) -> Result<Option<Message>, SourceError>;

    /// Send a command to a bot and collect its reply messages.
    async fn send_and_await_reply(
        &self,
        bot: &str,
        command: &str,
    ) -> Result<Vec<Message>, SourceError>;
}

/// Callback receiving `(bytes_done, bytes_total)` during a transfer.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Transfer of document bytes to a local path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write the document of `message_id` to `destination`, reporting
    /// progress. Returns the number of bytes written.
    ///
    /// `destination` is a staging path; callers own the final move.
    async fn transfer(
        &self,
        channel: &str,
        message_id: MessageId,
        document: &Document,
        destination: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<u64, crate::error::TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_deserializes_with_missing_fields() {
        let msg: Message = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(msg.id, 42);
        assert!(msg.text.is_none());
        assert!(msg.document.is_none());
        assert!(msg.links.is_empty());
    }

    #[test]
    fn test_document_label_prefers_file_name() {
        let doc = Document {
            file_name: Some("song.flac".to_string()),
            title: Some("Song".to_string()),
            ..Document::default()
        };
        assert_eq!(doc.label(), Some("song.flac"));

        let titled = Document {
            title: Some("Song".to_string()),
            ..Document::default()
        };
        assert_eq!(titled.label(), Some("Song"));
    }

    #[test]
    fn test_message_builders() {
        let msg = Message::new(7)
            .with_text("hello")
            .with_link("https://example.com");
        assert_eq!(msg.text.as_deref(), Some("hello"));
        assert_eq!(msg.links, vec!["https://example.com".to_string()]);
    }
}
