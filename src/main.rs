//! tgdl - main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tgdl::cli::{
    Cli, Command, LogFormat, generate_completions, run_channels_command, run_checkpoints_command,
    run_config_command, run_ingestion,
};
use tgdl::config::Paths;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv(); // Load .env if present
    let cli = Cli::parse();

    // Completion output goes to stdout and must not be mixed with logs.
    if let Some(Command::Completion { shell }) = &cli.command {
        return generate_completions(shell);
    }

    init_tracing(cli.log_format);
    let paths = Paths::resolve(cli.data_dir.clone());

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_ingestion(&paths).await,
        Command::Channels(cmd) => run_channels_command(&cmd, &paths),
        Command::Checkpoints(cmd) => run_checkpoints_command(&cmd, &paths).await,
        Command::Config(cmd) => run_config_command(&cmd, &paths),
        Command::Completion { shell } => generate_completions(&shell),
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tgdl=info"));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
