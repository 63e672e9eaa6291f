//! Message classification into typed work items.
//!
//! A [`ClassifierPipeline`] runs a [`MessageFilter`] first and, for messages
//! that pass, every registered [`Recognizer`]. Recognizers are independent and
//! their outputs are concatenated in registration order. Classification is
//! pure: no I/O, no mutation, and malformed input yields an empty list.

mod filter;
mod language;
mod links;

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::error::ConfigError;
use crate::source::{Document, Message, MessageId};

pub use filter::{FilterVerdict, MessageFilter};
pub use language::{LanguageDetector, LanguageGuess, ScriptDetector};
pub use links::{LinkRecognizer, RelayRecognizer};

/// A unit of side-effecting work derived from a message.
///
/// Every variant carries the id of the message it came from; completion is
/// attributed back to that id when the channel cursor advances.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkItem {
    /// Download the attached document and place it on disk.
    MediaTransfer {
        message_id: MessageId,
        document: Document,
    },
    /// A recognized sharing-service reference to relay onward.
    ExternalLink {
        message_id: MessageId,
        provider: String,
        url: String,
        access_code: Option<String>,
        canonical_url: String,
    },
    /// A reference to another message that must be fetched to find links.
    RelayLookup {
        message_id: MessageId,
        target_channel: String,
        target_message_id: MessageId,
        provider_hint: Option<String>,
    },
}

impl WorkItem {
    pub fn message_id(&self) -> MessageId {
        match self {
            WorkItem::MediaTransfer { message_id, .. }
            | WorkItem::ExternalLink { message_id, .. }
            | WorkItem::RelayLookup { message_id, .. } => *message_id,
        }
    }

    /// Re-attribute the item to another originating message.
    pub fn attributed_to(mut self, id: MessageId) -> Self {
        match &mut self {
            WorkItem::MediaTransfer { message_id, .. }
            | WorkItem::ExternalLink { message_id, .. }
            | WorkItem::RelayLookup { message_id, .. } => *message_id = id,
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkItem::MediaTransfer { .. } => "media_transfer",
            WorkItem::ExternalLink { .. } => "external_link",
            WorkItem::RelayLookup { .. } => "relay_lookup",
        }
    }
}

/// A resource recognizer. Must be pure and total.
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, message: &Message) -> Vec<WorkItem>;
}

/// Emits a [`WorkItem::MediaTransfer`] for any attached document.
///
/// Type, size and name checks belong to the [`MessageFilter`] upstream.
pub struct MediaRecognizer;

impl Recognizer for MediaRecognizer {
    fn name(&self) -> &str {
        "media"
    }

    fn recognize(&self, message: &Message) -> Vec<WorkItem> {
        message
            .document
            .iter()
            .map(|document| WorkItem::MediaTransfer {
                message_id: message.id,
                document: document.clone(),
            })
            .collect()
    }
}

/// Filter plus an ordered set of recognizers.
#[derive(Clone)]
pub struct ClassifierPipeline {
    filter: Arc<MessageFilter>,
    recognizers: Vec<Arc<dyn Recognizer>>,
}

impl ClassifierPipeline {
    pub fn new(filter: MessageFilter) -> Self {
        Self {
            filter: Arc::new(filter),
            recognizers: Vec::new(),
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizers.push(recognizer);
        self
    }

    /// Media, link and relay recognizers configured from `config`.
    pub fn from_config(
        config: &Config,
        detector: Arc<dyn LanguageDetector>,
    ) -> Result<Self, ConfigError> {
        let filter = MessageFilter::from_config(config, detector)?;
        let links = LinkRecognizer::new(&config.links.providers)?;
        let relay = RelayRecognizer::new(&config.links.providers)?;
        Ok(Self::new(filter)
            .with_recognizer(Arc::new(MediaRecognizer))
            .with_recognizer(Arc::new(links))
            .with_recognizer(Arc::new(relay)))
    }

    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    pub fn classify(&self, message: &Message) -> Vec<WorkItem> {
        if let FilterVerdict::Rejected(reason) = self.filter.check(message) {
            tracing::debug!(message_id = message.id, %reason, "Message excluded before classification");
            return Vec::new();
        }
        self.recognize_all(message)
    }

    /// Run the recognizers without the filter (relay targets are not
    /// subject to the source channel's media rules).
    pub fn recognize_all(&self, message: &Message) -> Vec<WorkItem> {
        self.recognizers
            .iter()
            .flat_map(|r| r.recognize(message))
            .collect()
    }

    /// Only the links of `message`, re-attributed to `origin`.
    pub fn links_for(&self, message: &Message, origin: MessageId) -> Vec<WorkItem> {
        self.recognize_all(message)
            .into_iter()
            .filter(|item| matches!(item, WorkItem::ExternalLink { .. }))
            .map(|item| item.attributed_to(origin))
            .collect()
    }
}
