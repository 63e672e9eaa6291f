//! Batch accumulation for one channel.
//!
//! The fetcher pages forward from an in-memory watermark (`min_id`
//! exclusive, oldest first), drops ids already in the dedup window,
//! classifies the rest and resolves relay references inline. A batch ends
//! when the work-item quota is met or a page brings no new messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::SourceError;
use crate::ingest::classify::{ClassifierPipeline, WorkItem};
use crate::ingest::dedup::DedupWindow;
use crate::source::{MessageId, MessageSource};

/// Fetcher tuning, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub batch_size: usize,
    pub dedup_capacity: usize,
    /// Provider name to bot username.
    pub relay_bots: HashMap<String, String>,
    pub relay_timeout: Duration,
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.download.batch_size,
            dedup_capacity: config.download.dedup_capacity,
            relay_bots: config.links.relay_bots.clone(),
            relay_timeout: Duration::from_secs(config.links.relay_timeout_seconds),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Fetcher {
    channel: String,
    source: Arc<dyn MessageSource>,
    pipeline: ClassifierPipeline,
    dedup: DedupWindow,
    watermark: MessageId,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(
        channel: impl Into<String>,
        source: Arc<dyn MessageSource>,
        pipeline: ClassifierPipeline,
        cursor: MessageId,
        settings: FetchSettings,
    ) -> Self {
        Self {
            channel: channel.into(),
            source,
            pipeline,
            dedup: DedupWindow::new(settings.dedup_capacity),
            watermark: cursor,
            settings,
        }
    }

    /// Highest message id observed so far.
    pub fn watermark(&self) -> MessageId {
        self.watermark
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    /// Forget everything observed past `cursor` so the next batch sees
    /// those messages again.
    pub fn rewind(&mut self, cursor: MessageId) {
        let forgotten = self.dedup.forget_above(cursor);
        tracing::debug!(
            channel = %self.channel,
            from = self.watermark,
            to = cursor,
            forgotten,
            "Rewinding fetch watermark"
        );
        self.watermark = cursor;
    }

    /// Accumulate up to `batch_size` work items.
    pub async fn fetch_batch(&mut self) -> Result<Vec<WorkItem>, SourceError> {
        let mut items = Vec::new();

        loop {
            // One extra slot so a source that repeats the watermark message
            // still returns something new.
            let limit = self.settings.batch_size.saturating_sub(items.len()) + 1;
            let page = self
                .source
                .fetch_page(&self.channel, self.watermark, limit)
                .await?;

            let mut fresh = 0usize;
            for message in page {
                // Left unrecorded, the rest of the page is fetched again next batch.
                if items.len() >= self.settings.batch_size {
                    break;
                }
                if self.dedup.seen(message.id) {
                    continue;
                }
                self.dedup.record(message.id);
                self.watermark = self.watermark.max(message.id);
                fresh += 1;

                for item in self.pipeline.classify(&message) {
                    match item {
                        WorkItem::RelayLookup {
                            message_id,
                            target_channel,
                            target_message_id,
                            provider_hint,
                        } => {
                            let resolved = self
                                .resolve_relay(
                                    message_id,
                                    &target_channel,
                                    target_message_id,
                                    provider_hint.as_deref(),
                                )
                                .await;
                            items.extend(resolved);
                        }
                        other => items.push(other),
                    }
                }
            }

            tracing::debug!(
                channel = %self.channel,
                fresh,
                accumulated = items.len(),
                watermark = self.watermark,
                "Fetched page"
            );

            if fresh == 0 || items.len() >= self.settings.batch_size {
                break;
            }
        }

        Ok(items)
    }

    /// Resolve one relay into links attributed to `origin`. Never fails:
    /// errors, timeouts and empty results are logged and dropped.
    async fn resolve_relay(
        &self,
        origin: MessageId,
        target_channel: &str,
        target_message_id: MessageId,
        provider_hint: Option<&str>,
    ) -> Vec<WorkItem> {
        let lookup = async {
            let Some(resolved) = self
                .source
                .resolve(target_channel, target_message_id)
                .await?
            else {
                return Ok(Vec::new());
            };

            let links = self.pipeline.links_for(&resolved, origin);
            if !links.is_empty() {
                return Ok(links);
            }

            let bot = provider_hint.and_then(|hint| self.settings.relay_bots.get(hint));
            let text = resolved.text.as_deref().filter(|t| !t.trim().is_empty());
            let (Some(bot), Some(text)) = (bot, text) else {
                return Ok(Vec::new());
            };
            tracing::debug!(channel = %self.channel, origin, %bot, "Asking relay bot");
            let replies = self.source.send_and_await_reply(bot, text).await?;
            Ok::<_, SourceError>(
                replies
                    .iter()
                    .flat_map(|reply| self.pipeline.links_for(reply, origin))
                    .collect(),
            )
        };

        match tokio::time::timeout(self.settings.relay_timeout, lookup).await {
            Ok(Ok(items)) if items.is_empty() => {
                tracing::info!(
                    channel = %self.channel,
                    origin,
                    target = %format!("{target_channel}/{target_message_id}"),
                    "Relay yielded no links"
                );
                items
            }
            Ok(Ok(items)) => {
                tracing::info!(
                    channel = %self.channel,
                    origin,
                    target = %format!("{target_channel}/{target_message_id}"),
                    links = items.len(),
                    "Relay resolved"
                );
                items
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    channel = %self.channel,
                    origin,
                    target = %format!("{target_channel}/{target_message_id}"),
                    error = %e,
                    "Relay lookup failed, dropping"
                );
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    channel = %self.channel,
                    origin,
                    target = %format!("{target_channel}/{target_message_id}"),
                    timeout_ms = self.settings.relay_timeout.as_millis() as u64,
                    "Relay lookup timed out, dropping"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::classify::ScriptDetector;
    use crate::source::{ChannelInfo, Document, Message};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct PagedSource {
        messages: Vec<Message>,
        /// Include `min_id` itself in each page, as an inclusive bound would.
        inclusive: bool,
        resolvable: HashMap<(String, MessageId), Message>,
        resolve_fails: bool,
        bot_replies: Vec<Message>,
        bot_commands: Mutex<Vec<(String, String)>>,
        pages: AtomicUsize,
    }

    #[async_trait]
    impl MessageSource for PagedSource {
        async fn describe(&self, channel: &str) -> Result<ChannelInfo, SourceError> {
            Ok(ChannelInfo {
                id: channel.to_string(),
                title: channel.to_string(),
            })
        }

        async fn fetch_page(
            &self,
            _channel: &str,
            min_id: MessageId,
            limit: usize,
        ) -> Result<Vec<Message>, SourceError> {
            self.pages.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .messages
                .iter()
                .filter(|m| m.id > min_id || (self.inclusive && m.id == min_id))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn resolve(
            &self,
            channel: &str,
            message_id: MessageId,
        ) -> Result<Option<Message>, SourceError> {
            if self.resolve_fails {
                return Err(SourceError::Connection("refused".to_string()));
            }
            Ok(self
                .resolvable
                .get(&(channel.to_string(), message_id))
                .cloned())
        }

        async fn send_and_await_reply(
            &self,
            bot: &str,
            command: &str,
        ) -> Result<Vec<Message>, SourceError> {
            self.bot_commands
                .lock()
                .unwrap()
                .push((bot.to_string(), command.to_string()));
            Ok(self.bot_replies.clone())
        }
    }

    fn pipeline() -> ClassifierPipeline {
        ClassifierPipeline::from_config(&Config::default(), Arc::new(ScriptDetector)).unwrap()
    }

    fn settings(batch_size: usize) -> FetchSettings {
        FetchSettings {
            batch_size,
            ..FetchSettings::default()
        }
    }

    fn audio(id: MessageId) -> Message {
        Message::new(id).with_document(Document {
            mime_type: "audio/mpeg".to_string(),
            size: 1_000,
            file_name: Some(format!("{id}.mp3")),
            ..Document::default()
        })
    }

    fn fetcher(source: PagedSource, cursor: MessageId, batch: usize) -> (Fetcher, Arc<PagedSource>) {
        let source = Arc::new(source);
        (
            Fetcher::new("chan", source.clone(), pipeline(), cursor, settings(batch)),
            source,
        )
    }

    #[tokio::test]
    async fn test_overlapping_pages_classify_each_message_once() {
        let (mut fetcher, _) = fetcher(
            PagedSource {
                messages: (1..=6).map(audio).collect(),
                inclusive: true,
                ..PagedSource::default()
            },
            0,
            2,
        );

        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.extend(fetcher.fetch_batch().await.unwrap().iter().map(|i| i.message_id()));
        }
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(fetcher.watermark(), 6);
    }

    #[tokio::test]
    async fn test_single_item_batches_advance_past_repeated_watermark() {
        let (mut fetcher, _) = fetcher(
            PagedSource {
                messages: (1..=3).map(audio).collect(),
                inclusive: true,
                ..PagedSource::default()
            },
            0,
            1,
        );

        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.extend(fetcher.fetch_batch().await.unwrap().iter().map(|i| i.message_id()));
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(fetcher.watermark(), 3);
    }

    #[tokio::test]
    async fn test_unconsumed_page_tail_is_fetched_next_batch() {
        let (mut fetcher, _) = fetcher(
            PagedSource {
                messages: (1..=4).map(audio).collect(),
                ..PagedSource::default()
            },
            0,
            3,
        );
        let first: Vec<_> = fetcher.fetch_batch().await.unwrap().iter().map(|i| i.message_id()).collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert!(!fetcher.dedup().seen(4));

        let second: Vec<_> = fetcher.fetch_batch().await.unwrap().iter().map(|i| i.message_id()).collect();
        assert_eq!(second, vec![4]);
    }

    #[tokio::test]
    async fn test_partial_batch_returned_when_source_exhausted() {
        let (mut fetcher, source) = fetcher(
            PagedSource {
                messages: (1..=5).map(audio).collect(),
                ..PagedSource::default()
            },
            0,
            15,
        );

        let items = fetcher.fetch_batch().await.unwrap();
        assert_eq!(items.len(), 5);
        // One page with the five messages, one empty page.
        assert_eq!(source.pages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_quota_stops_paging() {
        let (mut fetcher, source) = fetcher(
            PagedSource {
                messages: (1..=10).map(audio).collect(),
                ..PagedSource::default()
            },
            0,
            3,
        );
        let items = fetcher.fetch_batch().await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(fetcher.watermark(), 3);
        assert_eq!(source.pages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watermark_advances_past_itemless_messages() {
        let (mut fetcher, _) = fetcher(
            PagedSource {
                messages: vec![
                    Message::new(11).with_text("hello"),
                    Message::new(12).with_text("nothing here"),
                ],
                ..PagedSource::default()
            },
            10,
            15,
        );
        assert!(fetcher.fetch_batch().await.unwrap().is_empty());
        assert_eq!(fetcher.watermark(), 12);
    }

    #[tokio::test]
    async fn test_rewind_refetches_uncommitted_messages() {
        let (mut fetcher, _) = fetcher(
            PagedSource {
                messages: (101..=103).map(audio).collect(),
                ..PagedSource::default()
            },
            100,
            15,
        );
        assert_eq!(fetcher.fetch_batch().await.unwrap().len(), 3);
        assert!(fetcher.fetch_batch().await.unwrap().is_empty());

        fetcher.rewind(100);
        assert_eq!(fetcher.watermark(), 100);
        assert_eq!(fetcher.fetch_batch().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_relay_links_are_attributed_to_trigger() {
        let target = Message::new(900).with_text(
            "https://pan.quark.cn/s/aaa code: 1111 https://pan.baidu.com/s/1bbb 提取码: 2222",
        );
        let (mut fetcher, _) = fetcher(
            PagedSource {
                messages: vec![Message::new(7).with_text("see https://t.me/archive_ch/900")],
                resolvable: [(("archive_ch".to_string(), 900), target)]
                    .into_iter()
                    .collect(),
                ..PagedSource::default()
            },
            0,
            15,
        );

        let items = fetcher.fetch_batch().await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.kind() == "external_link"));
        assert!(items.iter().all(|i| i.message_id() == 7));
    }

    #[tokio::test]
    async fn test_failed_relay_is_dropped() {
        let (mut fetcher, _) = fetcher(
            PagedSource {
                messages: vec![
                    Message::new(7).with_text("https://t.me/archive_ch/900"),
                    audio(8),
                ],
                resolve_fails: true,
                ..PagedSource::default()
            },
            0,
            15,
        );
        let items = fetcher.fetch_batch().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message_id(), 8);
    }

    #[tokio::test]
    async fn test_bot_relay_when_target_has_no_links() {
        let mut config_settings = settings(15);
        config_settings
            .relay_bots
            .insert("quark".to_string(), "linkbot".to_string());
        let source = Arc::new(PagedSource {
            messages: vec![Message::new(20).with_text("夸克 https://t.me/archive_ch/5")],
            resolvable: [(
                ("archive_ch".to_string(), 5),
                Message::new(5).with_text("/get 5f3c"),
            )]
            .into_iter()
            .collect(),
            bot_replies: vec![Message::new(1).with_text("https://pan.quark.cn/s/zzz")],
            ..PagedSource::default()
        });
        let mut fetcher = Fetcher::new("chan", source.clone(), pipeline(), 0, config_settings);

        let items = fetcher.fetch_batch().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message_id(), 20);
        assert_eq!(
            source.bot_commands.lock().unwrap().clone(),
            vec![("linkbot".to_string(), "/get 5f3c".to_string())]
        );
    }
}
