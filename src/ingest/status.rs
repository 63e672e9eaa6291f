//! Per-channel loop status.
//!
//! Channel loops report their phase, commits, batch results and errors
//! here; the supervisor reads a snapshot when it drains.
//!
//! ```text
//! Loop starts        --> register_channel(id, cursor)
//! State transition   --> set_phase(id, phase)
//! Batch executed     --> record_batch(id, ok, failed)
//! Cursor committed   --> record_commit(id, cursor)
//! Backoff            --> record_error(id, reason) + set_retry(id, n)
//! Loop exits         --> set_exit(id, reason)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::source::MessageId;

/// Where a channel loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    Starting,
    Fetching,
    Executing,
    Committing,
    Idle,
    Backoff,
    Stopped,
}

impl std::fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelPhase::Starting => "starting",
            ChannelPhase::Fetching => "fetching",
            ChannelPhase::Executing => "executing",
            ChannelPhase::Committing => "committing",
            ChannelPhase::Idle => "idle",
            ChannelPhase::Backoff => "backoff",
            ChannelPhase::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

struct ChannelMetrics {
    phase: RwLock<ChannelPhase>,
    cursor: AtomicI64,
    cycles: AtomicU64,
    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    retry_count: AtomicU32,
    last_commit_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    exit: RwLock<Option<String>>,
}

impl ChannelMetrics {
    fn new(cursor: MessageId) -> Self {
        Self {
            phase: RwLock::new(ChannelPhase::Starting),
            cursor: AtomicI64::new(cursor),
            cycles: AtomicU64::new(0),
            items_succeeded: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            retry_count: AtomicU32::new(0),
            last_commit_at: RwLock::new(None),
            last_error: RwLock::new(None),
            exit: RwLock::new(None),
        }
    }
}

/// Point-in-time view of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatusInfo {
    pub channel: String,
    pub phase: ChannelPhase,
    pub cursor: MessageId,
    pub cycles: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub retry_count: u32,
    pub last_commit_at: Option<String>,
    pub last_error: Option<String>,
    pub exit: Option<String>,
}

/// Tracks status for all channel loops. Cheap to share behind an `Arc`.
pub struct ChannelStatusTracker {
    channels: RwLock<HashMap<String, Arc<ChannelMetrics>>>,
    started_at: Instant,
}

impl ChannelStatusTracker {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Register a channel with its starting cursor. No-op if already known.
    pub async fn register_channel(&self, channel: &str, cursor: MessageId) {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(ChannelMetrics::new(cursor)));
    }

    async fn metrics(&self, channel: &str) -> Option<Arc<ChannelMetrics>> {
        self.channels.read().await.get(channel).cloned()
    }

    pub async fn set_phase(&self, channel: &str, phase: ChannelPhase) {
        if let Some(m) = self.metrics(channel).await {
            *m.phase.write().await = phase;
        }
    }

    /// Count one executed batch.
    pub async fn record_batch(&self, channel: &str, succeeded: usize, failed: usize) {
        if let Some(m) = self.metrics(channel).await {
            m.cycles.fetch_add(1, Ordering::Relaxed);
            m.items_succeeded
                .fetch_add(succeeded as u64, Ordering::Relaxed);
            m.items_failed.fetch_add(failed as u64, Ordering::Relaxed);
        }
    }

    pub async fn record_commit(&self, channel: &str, cursor: MessageId) {
        if let Some(m) = self.metrics(channel).await {
            m.cursor.fetch_max(cursor, Ordering::Relaxed);
            *m.last_commit_at.write().await = Some(Utc::now());
        }
    }

    pub async fn set_retry(&self, channel: &str, retry_count: u32) {
        if let Some(m) = self.metrics(channel).await {
            m.retry_count.store(retry_count, Ordering::Relaxed);
        }
    }

    pub async fn record_error(&self, channel: &str, reason: &str) {
        if let Some(m) = self.metrics(channel).await {
            *m.last_error.write().await = Some(reason.to_string());
        }
    }

    /// Mark the loop as stopped with the reason it exited.
    pub async fn set_exit(&self, channel: &str, reason: &str) {
        if let Some(m) = self.metrics(channel).await {
            *m.phase.write().await = ChannelPhase::Stopped;
            *m.exit.write().await = Some(reason.to_string());
        }
    }

    pub async fn get_channel_status(&self, channel: &str) -> Option<ChannelStatusInfo> {
        let m = self.metrics(channel).await?;
        Some(snapshot(channel, &m).await)
    }

    /// Every channel, sorted by id.
    pub async fn get_all_statuses(&self) -> Vec<ChannelStatusInfo> {
        let channels: Vec<_> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut result = Vec::with_capacity(channels.len());
        for (channel, m) in channels {
            result.push(snapshot(&channel, &m).await);
        }
        result.sort_by(|a, b| a.channel.cmp(&b.channel));
        result
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Seconds since the tracker was created.
    pub fn uptime(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for ChannelStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

async fn snapshot(channel: &str, m: &ChannelMetrics) -> ChannelStatusInfo {
    ChannelStatusInfo {
        channel: channel.to_string(),
        phase: *m.phase.read().await,
        cursor: m.cursor.load(Ordering::Relaxed),
        cycles: m.cycles.load(Ordering::Relaxed),
        items_succeeded: m.items_succeeded.load(Ordering::Relaxed),
        items_failed: m.items_failed.load(Ordering::Relaxed),
        retry_count: m.retry_count.load(Ordering::Relaxed),
        last_commit_at: m.last_commit_at.read().await.map(|dt| dt.to_rfc3339()),
        last_error: m.last_error.read().await.clone(),
        exit: m.exit.read().await.clone(),
    }
}
