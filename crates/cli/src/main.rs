use clap::Parser;
use eyre::WrapErr;
use flightdeck_config::ConfigLoader;
use std::path::PathBuf;

mod commands;

use commands::Commands;

#[derive(Parser)]
#[command(name = "flightdeck")]
#[command(about = "Single-flight composition cache and usage ingestion", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Log filter directive, e.g. `debug` or `flightdeck_usage=trace`
    #[arg(long, global = true, value_name = "FILTER")]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.path(path);
    }
    let mut settings = loader
        .load()
        .wrap_err("failed to load configuration")?
        .settings;

    if cli.log_json {
        settings.log.json = true;
    }
    if let Some(filter) = cli.log_filter {
        settings.log.filter = filter;
    }
    flightdeck_utils::init_logging(&settings.log)
        .map_err(|e| eyre::eyre!("failed to initialise logging: {e}"))?;

    cli.command.execute(settings).await
}
