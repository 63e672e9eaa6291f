//! Bounded-concurrency execution of work items.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::{Error, ErrorClass};
use crate::ingest::classify::WorkItem;
use crate::source::{ChannelInfo, MessageId};
use crate::submit::{LinkSubmission, LinkSubmitter};
use crate::transfer::MediaStore;

/// How a single work item ended.
#[derive(Debug)]
pub enum ItemStatus {
    Completed,
    /// Permanent per-item rejection; never retried.
    Failed(String),
    /// Connectivity-class fault; the cycle must back off.
    Interrupted(Error),
    /// Unrecoverable local failure; the channel must stop.
    Fatal(Error),
}

#[derive(Debug)]
pub struct ItemOutcome {
    pub message_id: MessageId,
    pub kind: &'static str,
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ItemStatus::Completed)
    }
}

/// Outcomes of one `EXECUTING` phase, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    /// Highest message id with at least one successful item.
    pub fn commit_target(&self) -> Option<MessageId> {
        self.outcomes
            .iter()
            .filter(|o| o.succeeded())
            .map(|o| o.message_id)
            .max()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// First connectivity fault raised by the batch.
    pub fn interruption(&self) -> Option<&Error> {
        self.outcomes.iter().find_map(|o| match &o.status {
            ItemStatus::Interrupted(e) => Some(e),
            _ => None,
        })
    }

    /// Remove and return the first fatal error, leaving that item failed.
    pub fn take_fatal(&mut self) -> Option<Error> {
        let outcome = self
            .outcomes
            .iter_mut()
            .find(|o| matches!(o.status, ItemStatus::Fatal(_)))?;
        let reason = "fatal error".to_string();
        match std::mem::replace(&mut outcome.status, ItemStatus::Failed(reason)) {
            ItemStatus::Fatal(e) => Some(e),
            _ => None,
        }
    }
}

/// Runs work items under a shared semaphore.
///
/// Transfers and submissions draw from the same permit budget. The
/// semaphore may be private to one channel or shared by all of them.
pub struct Executor {
    media: Arc<MediaStore>,
    submitter: Option<Arc<LinkSubmitter>>,
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(
        media: Arc<MediaStore>,
        submitter: Option<Arc<LinkSubmitter>>,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            media,
            submitter,
            permits,
        }
    }

    /// Executor with its own budget of `limit` in-flight items.
    pub fn with_limit(
        media: Arc<MediaStore>,
        submitter: Option<Arc<LinkSubmitter>>,
        limit: usize,
    ) -> Self {
        Self::new(media, submitter, Arc::new(Semaphore::new(limit.max(1))))
    }

    /// Run every item to completion. One item's failure never aborts another.
    pub async fn run_all(&self, channel: &ChannelInfo, items: Vec<WorkItem>) -> BatchReport {
        tracing::info!(
            channel = %channel.id,
            items = items.len(),
            permits = self.permits.available_permits(),
            "Executing batch"
        );
        let outcomes = join_all(items.into_iter().map(|item| self.run_one(channel, item))).await;
        BatchReport { outcomes }
    }

    async fn run_one(&self, channel: &ChannelInfo, item: WorkItem) -> ItemOutcome {
        let message_id = item.message_id();
        let kind = item.kind();

        let status = match self.permits.acquire().await {
            Ok(_permit) => self.perform(channel, item).await,
            Err(_) => ItemStatus::Failed("executor shut down".to_string()),
        };

        match &status {
            ItemStatus::Completed => {}
            ItemStatus::Failed(reason) => tracing::warn!(
                channel = %channel.id,
                message_id,
                kind,
                %reason,
                "Work item failed"
            ),
            ItemStatus::Interrupted(e) => tracing::warn!(
                channel = %channel.id,
                message_id,
                kind,
                error = %e,
                "Work item interrupted by transient fault"
            ),
            ItemStatus::Fatal(e) => tracing::error!(
                channel = %channel.id,
                message_id,
                kind,
                error = %e,
                "Work item hit a fatal error"
            ),
        }

        ItemOutcome {
            message_id,
            kind,
            status,
        }
    }

    async fn perform(&self, channel: &ChannelInfo, item: WorkItem) -> ItemStatus {
        match item {
            WorkItem::MediaTransfer {
                message_id,
                document,
            } => match self.media.place(&channel.id, message_id, &document).await {
                Ok(_) => ItemStatus::Completed,
                Err(e) => classify_error(Error::from(e)),
            },
            WorkItem::ExternalLink {
                message_id,
                provider,
                url,
                access_code,
                canonical_url,
            } => {
                let Some(submitter) = &self.submitter else {
                    tracing::info!(
                        channel = %channel.id,
                        message_id,
                        %provider,
                        url = %canonical_url,
                        "Link recognized"
                    );
                    return ItemStatus::Completed;
                };
                let submission = LinkSubmission {
                    provider,
                    url,
                    access_code,
                    canonical_url,
                    message_id,
                    channel_title: channel.title.clone(),
                    submitted_at: Utc::now(),
                };
                match submitter.submit(&submission).await {
                    Ok(()) => ItemStatus::Completed,
                    Err(e) => ItemStatus::Failed(e.to_string()),
                }
            }
            WorkItem::RelayLookup {
                target_channel,
                target_message_id,
                ..
            } => ItemStatus::Failed(format!(
                "relay {target_channel}/{target_message_id} was not resolved before execution"
            )),
        }
    }
}

fn classify_error(e: Error) -> ItemStatus {
    match e.class() {
        ErrorClass::Transient => ItemStatus::Interrupted(e),
        ErrorClass::Fatal => ItemStatus::Fatal(e),
        ErrorClass::Permanent => ItemStatus::Failed(e.to_string()),
    }
}
