//! Channel selection CLI commands.

use clap::Subcommand;

use crate::config::{Config, Paths};

/// Channel selection commands.
#[derive(Subcommand, Debug)]
pub enum ChannelsCommand {
    /// List the channels selected for ingestion.
    List,
    /// Select a channel.
    Add {
        /// Channel id (e.g. "-1001234567890") or public username.
        #[arg(allow_hyphen_values = true)]
        id: String,
    },
    /// Deselect a channel. Its checkpoint is kept.
    Remove {
        /// Channel id.
        #[arg(allow_hyphen_values = true)]
        id: String,
    },
}

/// Run a channels command.
pub fn run_channels_command(cmd: &ChannelsCommand, paths: &Paths) -> anyhow::Result<()> {
    let path = paths.config_file();
    let mut config = Config::load_file(&path)?;

    match cmd {
        ChannelsCommand::List => {
            if config.selected_channels.is_empty() {
                println!("No channels selected.");
                println!("\nUse 'tgdl channels add <id>' to select one.");
                return Ok(());
            }
            println!("Selected channels:");
            for channel in &config.selected_channels {
                println!("  {}", channel);
            }
        }
        ChannelsCommand::Add { id } => {
            if add_channel(&mut config, id) {
                config.save_to(&path)?;
                println!("Channel '{}' selected.", id);
            } else {
                println!("Channel '{}' is already selected.", id);
            }
        }
        ChannelsCommand::Remove { id } => {
            if remove_channel(&mut config, id) {
                config.save_to(&path)?;
                println!("Channel '{}' removed.", id);
            } else {
                anyhow::bail!("Channel '{}' is not selected", id);
            }
        }
    }
    Ok(())
}

fn add_channel(config: &mut Config, id: &str) -> bool {
    let id = id.trim();
    if id.is_empty() || config.selected_channels.iter().any(|c| c == id) {
        return false;
    }
    config.selected_channels.push(id.to_string());
    true
}

fn remove_channel(config: &mut Config, id: &str) -> bool {
    let before = config.selected_channels.len();
    config.selected_channels.retain(|c| c != id.trim());
    config.selected_channels.len() != before
}
