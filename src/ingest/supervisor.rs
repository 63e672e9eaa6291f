//! Owns the channel loops and the process-wide shutdown flag.

use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::config::{ConcurrencyScope, Config, Paths};
use crate::error::Error;
use crate::ingest::backoff::RetryConfig;
use crate::ingest::channel_loop::{ChannelLoop, LoopContext, LoopExit};
use crate::ingest::checkpoint::CheckpointStore;
use crate::ingest::classify::{ClassifierPipeline, ScriptDetector};
use crate::ingest::executor::Executor;
use crate::ingest::fetcher::FetchSettings;
use crate::ingest::status::{ChannelStatusInfo, ChannelStatusTracker};
use crate::source::{BlobStore, MessageSource};
use crate::submit::LinkSubmitter;
use crate::transfer::{AudioQualityOracle, MediaStore};

/// Cloneable handle that requests a cooperative stop of every loop.
#[derive(Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}

/// How one channel loop ended.
#[derive(Debug)]
pub enum ChannelOutcome {
    Exited(LoopExit),
    Failed(Error),
    Panicked(String),
}

#[derive(Debug)]
pub struct ChannelReport {
    pub channel: String,
    pub outcome: ChannelOutcome,
}

pub struct IngestionSupervisor {
    ctx: LoopContext,
    media: Arc<MediaStore>,
    submitter: Option<Arc<LinkSubmitter>>,
    concurrency: usize,
    scope: ConcurrencyScope,
    shutdown: Arc<watch::Sender<bool>>,
}

impl IngestionSupervisor {
    pub fn new(
        ctx: LoopContext,
        media: Arc<MediaStore>,
        submitter: Option<Arc<LinkSubmitter>>,
        concurrency: usize,
        scope: ConcurrencyScope,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            media,
            submitter,
            concurrency: concurrency.max(1),
            scope,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Wire every collaborator from configuration.
    pub fn from_config(
        config: &Config,
        paths: &Paths,
        source: Arc<dyn MessageSource>,
        blobs: Arc<dyn BlobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, Error> {
        let pipeline = ClassifierPipeline::from_config(config, Arc::new(ScriptDetector))?;
        let media = Arc::new(MediaStore::new(
            paths.media_dir(),
            blobs,
            Arc::new(AudioQualityOracle::new(config.audio_quality_check.clone())),
            config.download.max_file_size_bytes(),
        ));
        let submitter = config
            .links
            .submit
            .as_ref()
            .map(|endpoint| Arc::new(LinkSubmitter::new(endpoint)));

        let ctx = LoopContext {
            source,
            pipeline,
            checkpoints,
            status: Arc::new(ChannelStatusTracker::new()),
            fetch: FetchSettings::from_config(config),
            retry: RetryConfig::from(&config.download),
            wait_interval: config.download.wait_interval(),
        };
        Ok(Self::new(
            ctx,
            media,
            submitter,
            config.download.max_concurrent_downloads,
            config.download.concurrency_scope,
        ))
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger(self.shutdown.clone())
    }

    pub fn status(&self) -> Arc<ChannelStatusTracker> {
        self.ctx.status.clone()
    }

    /// Run one loop per channel until every loop has exited.
    ///
    /// Loops are independent: one channel failing never stops another, and
    /// a loop that exits is not restarted.
    pub async fn run(&self, channels: &[String]) -> Vec<ChannelReport> {
        if channels.is_empty() {
            tracing::warn!("No channels to ingest");
            return Vec::new();
        }

        let global = Arc::new(Semaphore::new(self.concurrency));
        tracing::info!(
            channels = channels.len(),
            concurrency = self.concurrency,
            scope = ?self.scope,
            "Starting ingestion"
        );

        let handles: Vec<(String, JoinHandle<Result<LoopExit, Error>>)> = channels
            .iter()
            .map(|channel| {
                let permits = match self.scope {
                    ConcurrencyScope::Global => global.clone(),
                    ConcurrencyScope::PerChannel => Arc::new(Semaphore::new(self.concurrency)),
                };
                let executor = Arc::new(Executor::new(
                    self.media.clone(),
                    self.submitter.clone(),
                    permits,
                ));
                let ctx = self.ctx.clone();
                let shutdown = self.shutdown.subscribe();
                let id = channel.clone();
                let handle = tokio::spawn(async move {
                    ChannelLoop::open(&id, &ctx, executor, shutdown)
                        .await?
                        .run()
                        .await
                });
                (channel.clone(), handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (channel, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(exit)) => ChannelOutcome::Exited(exit),
                Ok(Err(e)) => {
                    tracing::error!(channel = %channel, error = %e, "Channel loop failed");
                    ChannelOutcome::Failed(e)
                }
                Err(e) => {
                    tracing::error!(channel = %channel, error = %e, "Channel loop panicked");
                    ChannelOutcome::Panicked(e.to_string())
                }
            };
            reports.push(ChannelReport { channel, outcome });
        }

        log_summary(&self.ctx.status.get_all_statuses().await);
        reports
    }
}

fn log_summary(statuses: &[ChannelStatusInfo]) {
    for s in statuses {
        tracing::info!(
            channel = %s.channel,
            phase = %s.phase,
            cursor = s.cursor,
            cycles = s.cycles,
            succeeded = s.items_succeeded,
            failed = s.items_failed,
            exit = s.exit.as_deref().unwrap_or("running"),
            "Channel summary"
        );
    }
    tracing::info!(channels = statuses.len(), "All channel loops drained");
}
