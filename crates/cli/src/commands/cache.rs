use clap::Subcommand;
use flightdeck_cache::{ActionStore, MemoryActionStore, ReuseCache, ReuseConfig};
use flightdeck_config::Settings;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Run a command once across every concurrent caller with the same arguments
    ///
    /// Callers sharing a Redis store wait for the first one and print its
    /// output instead of running the command themselves.
    Run {
        /// Action group the command belongs to
        #[arg(long, default_value = "command")]
        group: String,

        /// Deadline for the command, overriding the configured timeout
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Lifetime of the shared result, overriding the configured ttl
        #[arg(long, value_name = "MS")]
        ttl_ms: Option<u64>,

        /// Command and arguments to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

impl CacheCommands {
    pub async fn execute(self, settings: Settings) -> eyre::Result<()> {
        match self {
            CacheCommands::Run {
                group,
                timeout_ms,
                ttl_ms,
                command,
            } => {
                let mut settings = settings;
                if let Some(timeout_ms) = timeout_ms {
                    settings.cache.timeout_ms = timeout_ms;
                }
                if let Some(ttl_ms) = ttl_ms {
                    settings.cache.ttl_ms = ttl_ms;
                }
                settings.validate()?;
                let config = ReuseConfig::from(&settings.cache);

                let store = open_store(settings.cache.redis_url.as_deref()).await?;
                let output = run(ReuseCache::new(store, config), group, command).await?;
                print!("{output}");
                Ok(())
            }
        }
    }
}

async fn open_store(redis_url: Option<&str>) -> eyre::Result<Arc<dyn ActionStore>> {
    match redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = flightdeck_cache::RedisActionStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => eyre::bail!("a Redis URL is configured but flightdeck was built without the `redis` feature"),
        None => {
            warn!("No Redis URL configured, results are only shared within this process");
            Ok(Arc::new(MemoryActionStore::new()))
        }
    }
}

async fn run(cache: ReuseCache, group: String, command: Vec<String>) -> eyre::Result<String> {
    let runner = cache.reuse(group, |argv: Vec<String>| async move {
        debug!(command = ?argv, "Running command as leader");
        run_command(argv).await
    });
    Ok(runner.call(command).await?)
}

async fn run_command(argv: Vec<String>) -> Result<String, String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| "no command given".to_string())?;

    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("failed to run {program}: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
