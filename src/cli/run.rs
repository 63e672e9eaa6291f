//! `tgdl run`: start the supervisor on the selected channels.

use std::sync::Arc;

use crate::config::{Config, Paths};
use crate::ingest::channel_loop::LoopExit;
use crate::ingest::checkpoint::FileCheckpointStore;
use crate::ingest::supervisor::{ChannelOutcome, IngestionSupervisor};
use crate::source::HttpBridgeSource;

pub async fn run_ingestion(paths: &Paths) -> anyhow::Result<()> {
    let config = Config::load(&paths.config_file())?;
    if config.selected_channels.is_empty() {
        anyhow::bail!(
            "No channels selected in {}. Use 'tgdl channels add <id>' first.",
            paths.config_file().display()
        );
    }

    let source = Arc::new(HttpBridgeSource::new(&config.source)?);
    let checkpoints = Arc::new(FileCheckpointStore::open(paths.checkpoint_file()).await?);
    tracing::info!(
        data_dir = %paths.data_dir.display(),
        bridge = %config.source.base_url,
        channels = config.selected_channels.len(),
        "Starting tgdl"
    );

    let supervisor =
        IngestionSupervisor::from_config(&config, paths, source.clone(), source, checkpoints)?;

    let trigger = supervisor.shutdown_trigger();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested, letting in-flight work finish");
                trigger.trigger();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let reports = supervisor.run(&config.selected_channels).await;
    let abnormal: Vec<_> = reports
        .iter()
        .filter(|r| !matches!(r.outcome, ChannelOutcome::Exited(LoopExit::Shutdown)))
        .map(|r| r.channel.as_str())
        .collect();
    if !abnormal.is_empty() {
        tracing::warn!(channels = ?abnormal, "Some channels stopped before shutdown");
    }
    Ok(())
}
