//! Configuration CLI commands.

use clap::Subcommand;

use crate::config::{Config, Paths};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration (file plus environment overrides).
    Show,
    /// Check the configuration without starting anything.
    Validate,
}

pub fn run_config_command(cmd: &ConfigCommand, paths: &Paths) -> anyhow::Result<()> {
    let path = paths.config_file();
    match cmd {
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save_to(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigCommand::Show => {
            let config = redacted(Config::load(&path)?);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommand::Validate => {
            let config = Config::load(&path)?;
            println!("Configuration OK ({})", path.display());
            println!("  channels:    {}", config.selected_channels.len());
            println!("  batch size:  {}", config.download.batch_size);
            println!(
                "  concurrency: {} ({:?})",
                config.download.max_concurrent_downloads, config.download.concurrency_scope
            );
        }
    }
    Ok(())
}

fn redacted(mut config: Config) -> Config {
    const MASK: &str = "********";
    if config.source.token.is_some() {
        config.source.token = Some(MASK.to_string());
    }
    if let Some(submit) = config.links.submit.as_mut()
        && submit.secret.is_some()
    {
        submit.secret = Some(MASK.to_string());
    }
    config
}
