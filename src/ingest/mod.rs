//! Channel ingestion engine.
//!
//! ```text
//! ┌──────────────────────────── IngestionSupervisor ───────────────────────────┐
//! │  one ChannelLoop per channel, shared shutdown flag                         │
//! │                                                                            │
//! │  ChannelLoop                                                               │
//! │    Fetcher ──(WorkItem)──> Executor ──(outcomes)──> commit ──> Checkpoint  │
//! │      │  ▲                    │                                 Store       │
//! │      │  └ DedupWindow        └ semaphore (per channel or global)           │
//! │      └ ClassifierPipeline: MessageFilter, media/link/relay recognizers     │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The checkpoint store is the only persisted state. A channel's cursor
//! moves to the highest message id that produced a successful work item,
//! and never backwards.

pub mod backoff;
pub mod channel_loop;
pub mod checkpoint;
pub mod classify;
pub mod dedup;
pub mod executor;
pub mod fetcher;
pub mod status;
pub mod supervisor;

pub use backoff::{RetryConfig, RetryDecision, RetryState};
pub use channel_loop::{ChannelLoop, LoopContext, LoopExit};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use classify::{ClassifierPipeline, WorkItem};
pub use dedup::DedupWindow;
pub use executor::{BatchReport, Executor, ItemOutcome, ItemStatus};
pub use fetcher::{FetchSettings, Fetcher};
pub use status::{ChannelPhase, ChannelStatusInfo, ChannelStatusTracker};
pub use supervisor::{ChannelOutcome, ChannelReport, IngestionSupervisor, ShutdownTrigger};
