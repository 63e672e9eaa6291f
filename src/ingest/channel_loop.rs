//! Per-channel control loop.
//!
//! ```text
//!            batch empty                  wait_interval elapsed
//! FETCHING ─────────────────> IDLE ──────────────────────────────┐
//!    │  ▲                                                        │
//!    │  └────────────────────────────────────────────────────────┘
//!    │ batch non-empty
//!    ▼
//! EXECUTING ──> COMMITTING ──> FETCHING
//!    │
//!    │ transient fault (fetch or execute)
//!    ▼
//! BACKOFF ──> FETCHING          (or exit once the retry ceiling is hit)
//! ```
//!
//! Phases run strictly in sequence. The shutdown flag is checked before
//! every fetch, and the `IDLE`/`BACKOFF` sleeps wake up on shutdown. An
//! `EXECUTING` phase is never cut short.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::Error;
use crate::ingest::backoff::{RetryConfig, RetryDecision, RetryState};
use crate::ingest::checkpoint::CheckpointStore;
use crate::ingest::classify::ClassifierPipeline;
use crate::ingest::executor::{BatchReport, Executor};
use crate::ingest::fetcher::{FetchSettings, Fetcher};
use crate::ingest::status::{ChannelPhase, ChannelStatusTracker};
use crate::source::{ChannelInfo, MessageId, MessageSource};

/// Why a channel loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    RetriesExhausted { attempts: u32 },
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopExit::Shutdown => write!(f, "shutdown"),
            LoopExit::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} attempts")
            }
        }
    }
}

/// Collaborators shared by every channel loop.
#[derive(Clone)]
pub struct LoopContext {
    pub source: Arc<dyn MessageSource>,
    pub pipeline: ClassifierPipeline,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub status: Arc<ChannelStatusTracker>,
    pub fetch: FetchSettings,
    pub retry: RetryConfig,
    pub wait_interval: Duration,
}

pub struct ChannelLoop {
    channel: ChannelInfo,
    cursor: MessageId,
    fetcher: Fetcher,
    executor: Arc<Executor>,
    checkpoints: Arc<dyn CheckpointStore>,
    status: Arc<ChannelStatusTracker>,
    retry: RetryState,
    wait_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ChannelLoop {
    /// Read the persisted cursor and look up the channel's display name.
    pub async fn open(
        channel_id: &str,
        ctx: &LoopContext,
        executor: Arc<Executor>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, Error> {
        let cursor = ctx.checkpoints.get_cursor(channel_id).await?;
        let channel = match ctx.source.describe(channel_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(channel = %channel_id, error = %e, "Cannot describe channel, using its id as title");
                ChannelInfo {
                    id: channel_id.to_string(),
                    title: channel_id.to_string(),
                }
            }
        };

        let fetcher = Fetcher::new(
            channel_id,
            ctx.source.clone(),
            ctx.pipeline.clone(),
            cursor,
            ctx.fetch.clone(),
        );
        ctx.status.register_channel(channel_id, cursor).await;

        Ok(Self {
            channel,
            cursor,
            fetcher,
            executor,
            checkpoints: ctx.checkpoints.clone(),
            status: ctx.status.clone(),
            retry: RetryState::new(ctx.retry.clone()),
            wait_interval: ctx.wait_interval,
            shutdown,
        })
    }

    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    pub fn cursor(&self) -> MessageId {
        self.cursor
    }

    /// Drive the loop until shutdown, retry exhaustion or a fatal error.
    pub async fn run(mut self) -> Result<LoopExit, Error> {
        tracing::info!(
            channel = %self.channel.id,
            title = %self.channel.title,
            cursor = self.cursor,
            "Channel loop started"
        );

        let result = self.drive().await;

        let reason = match &result {
            Ok(LoopExit::Shutdown) => {
                tracing::info!(channel = %self.channel.id, cursor = self.cursor, "Channel loop stopped on shutdown");
                LoopExit::Shutdown.to_string()
            }
            Ok(exit @ LoopExit::RetriesExhausted { attempts }) => {
                tracing::error!(
                    channel = %self.channel.id,
                    cursor = self.cursor,
                    attempts,
                    "Channel loop gave up after reaching the retry ceiling"
                );
                exit.to_string()
            }
            Err(e) => {
                tracing::error!(
                    channel = %self.channel.id,
                    cursor = self.cursor,
                    error = %e,
                    "Channel loop terminated by fatal error"
                );
                format!("fatal: {e}")
            }
        };
        self.status.set_exit(&self.channel.id, &reason).await;
        result
    }

    async fn drive(&mut self) -> Result<LoopExit, Error> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(LoopExit::Shutdown);
            }

            self.enter(ChannelPhase::Fetching).await;
            let items = match self.fetcher.fetch_batch().await {
                Ok(items) => items,
                Err(e) if e.is_transient() => {
                    if let Some(exit) = self.back_off(&e).await {
                        return Ok(exit);
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if items.is_empty() {
                self.enter(ChannelPhase::Idle).await;
                tracing::info!(
                    channel = %self.channel.id,
                    wait_secs = self.wait_interval.as_secs(),
                    "No new work, idling"
                );
                if self.pause(self.wait_interval).await {
                    return Ok(LoopExit::Shutdown);
                }
                continue;
            }

            self.enter(ChannelPhase::Executing).await;
            let mut report = self.executor.run_all(&self.channel, items).await;
            self.status
                .record_batch(&self.channel.id, report.succeeded(), report.failed())
                .await;

            if let Some(e) = report.take_fatal() {
                return Err(e);
            }
            if let Some(e) = report.interruption() {
                if let Some(exit) = self.back_off(e).await {
                    return Ok(exit);
                }
                continue;
            }

            self.enter(ChannelPhase::Committing).await;
            self.commit(&report).await?;
            if self.retry.retry_count() > 0 {
                tracing::info!(channel = %self.channel.id, "Cycle completed, retry state reset");
            }
            self.retry.reset();
            self.status.set_retry(&self.channel.id, 0).await;
        }
    }

    /// Advance the cursor to the highest message id with a successful item.
    async fn commit(&mut self, report: &BatchReport) -> Result<(), Error> {
        let Some(target) = report.commit_target() else {
            tracing::info!(
                channel = %self.channel.id,
                cursor = self.cursor,
                failed = report.failed(),
                "No successful items, cursor unchanged"
            );
            return Ok(());
        };
        if target <= self.cursor {
            tracing::debug!(channel = %self.channel.id, cursor = self.cursor, target, "Cursor already past batch");
            return Ok(());
        }

        self.checkpoints.set_cursor(&self.channel.id, target).await?;
        tracing::info!(
            channel = %self.channel.id,
            from = self.cursor,
            cursor = target,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Cursor committed"
        );
        self.cursor = target;
        self.status.record_commit(&self.channel.id, target).await;
        Ok(())
    }

    /// Handle a transient fault. Returns an exit when the loop must stop.
    async fn back_off(&mut self, error: &(dyn std::fmt::Display + Sync)) -> Option<LoopExit> {
        self.status
            .record_error(&self.channel.id, &error.to_string())
            .await;

        match self.retry.on_transient_failure() {
            RetryDecision::Exhausted { attempts } => Some(LoopExit::RetriesExhausted { attempts }),
            RetryDecision::Retry { attempt, delay } => {
                tracing::warn!(
                    channel = %self.channel.id,
                    retry = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, backing off"
                );
                self.fetcher.rewind(self.cursor);
                self.enter(ChannelPhase::Backoff).await;
                self.status.set_retry(&self.channel.id, attempt).await;
                if self.pause(delay).await {
                    Some(LoopExit::Shutdown)
                } else {
                    None
                }
            }
        }
    }

    /// Sleep for `duration`. Returns `true` if shutdown was requested.
    async fn pause(&mut self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }

    async fn enter(&self, phase: ChannelPhase) {
        tracing::debug!(channel = %self.channel.id, %phase, "State transition");
        self.status.set_phase(&self.channel.id, phase).await;
    }
}
