use clap::Subcommand;
use flightdeck_config::Settings;
use std::path::PathBuf;

pub mod cache;
pub mod checksum;
pub mod ingest;

use self::cache::CacheCommands;

#[derive(Subcommand)]
pub enum Commands {
    /// Batch newline-delimited usage reports into ClickHouse
    #[command(visible_alias = "i")]
    Ingest {
        /// Read reports from a file instead of stdin
        #[arg(short, long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Maximum time a report waits before being flushed
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,

        /// Maximum batch size before a flush is forced
        #[arg(long, value_name = "BYTES")]
        limit_in_bytes: Option<usize>,

        /// ClickHouse HTTP endpoint
        #[arg(long, value_name = "URL")]
        clickhouse_url: Option<String>,

        /// Print Prometheus metrics to stdout after the final flush
        #[arg(long)]
        print_metrics: bool,
    },

    /// Print the canonical checksum of a JSON document
    Checksum {
        /// Read the document from a file instead of stdin
        #[arg(short, long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Print the full cache key for this action group instead
        #[arg(long, value_name = "GROUP")]
        group: Option<String>,
    },

    /// Run work through the single-flight cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

impl Commands {
    pub async fn execute(self, settings: Settings) -> eyre::Result<()> {
        match self {
            Commands::Ingest {
                input,
                interval_ms,
                limit_in_bytes,
                clickhouse_url,
                print_metrics,
            } => {
                let mut settings = settings;
                if let Some(interval_ms) = interval_ms {
                    settings.usage.interval_ms = interval_ms;
                }
                if let Some(limit) = limit_in_bytes {
                    settings.usage.limit_in_bytes = limit;
                }
                if let Some(url) = clickhouse_url {
                    settings.clickhouse.url = url;
                }
                settings.validate()?;
                ingest::execute(&settings, input, print_metrics).await
            }
            Commands::Checksum { input, group } => {
                checksum::execute(&settings, input, group).await
            }
            Commands::Cache { command } => command.execute(settings).await,
        }
    }
}
