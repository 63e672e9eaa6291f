//! tgdl: continuous channel ingestion.
//!
//! Polls message channels, classifies attachments and links into work
//! items, executes them under bounded concurrency and advances a durable
//! per-channel cursor only past work that completed.

pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod source;
pub mod submit;
pub mod transfer;

pub use config::{Config, Paths};
pub use error::{Error, Result};
