//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the ingestion engine (`run`, the default)
//! - Managing selected channels (`channels list`, `channels add`, `channels remove`)
//! - Inspecting persisted cursors (`checkpoints list`, `checkpoints show`)
//! - Managing configuration (`config init`, `config show`, `config validate`)
//! - Shell completion generation (`completion`)

mod channels;
mod checkpoints;
mod completion;
mod config;
mod run;

pub use channels::{ChannelsCommand, run_channels_command};
pub use checkpoints::{CheckpointsCommand, run_checkpoints_command};
pub use completion::generate_completions;
pub use config::{ConfigCommand, run_config_command};
pub use run::run_ingestion;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "tgdl")]
#[command(about = "Continuously ingest media and share links from message channels")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Data directory holding config/, checkpoints and downloads/
    #[arg(long, global = true, env = "TGDL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "TGDL_LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the ingestion engine (default if no subcommand given)
    Run,

    /// Manage the channels selected for ingestion
    #[command(subcommand)]
    Channels(ChannelsCommand),

    /// Inspect persisted channel cursors
    #[command(subcommand)]
    Checkpoints(CheckpointsCommand),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completion {
        /// Shell to generate for (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}
