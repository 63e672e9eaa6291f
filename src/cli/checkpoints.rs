//! Checkpoint inspection CLI commands.

use clap::Subcommand;

use crate::config::Paths;
use crate::ingest::checkpoint::{CheckpointStore, FileCheckpointStore};

#[derive(Subcommand, Debug)]
pub enum CheckpointsCommand {
    /// List every persisted channel cursor.
    List {
        /// Print the raw JSON document.
        #[arg(long)]
        json: bool,
    },
    /// Show the cursor for one channel.
    Show {
        /// Channel id.
        #[arg(allow_hyphen_values = true)]
        channel: String,
    },
}

pub async fn run_checkpoints_command(cmd: &CheckpointsCommand, paths: &Paths) -> anyhow::Result<()> {
    let store = FileCheckpointStore::open(paths.checkpoint_file()).await?;

    match cmd {
        CheckpointsCommand::List { json } => {
            let snapshot = store.snapshot().await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(());
            }
            if snapshot.is_empty() {
                println!("No checkpoints recorded in {}", store.path().display());
                return Ok(());
            }
            println!("{:<24} {:>12}", "CHANNEL", "LAST_ID");
            for (channel, checkpoint) in &snapshot {
                println!("{:<24} {:>12}", channel, checkpoint.last_id);
            }
        }
        CheckpointsCommand::Show { channel } => {
            let cursor = store.get_cursor(channel).await?;
            println!("{}: {}", channel, cursor);
        }
    }
    Ok(())
}
