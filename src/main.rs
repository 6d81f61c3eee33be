use anyhow::{Context, Result};
use clap::Parser;
use snapshot_scheduler::config::{AppConfig, CliConfig, FileConfig};
use snapshot_scheduler::scheduler::{FileTenantDirectory, SchedulerService, SweepLoop, TenantDirectory};
use snapshot_scheduler::scheduler_store::SqliteSchedulerStore;
use snapshot_scheduler::metrics;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory where scheduler.db lives (created on first run).
    #[clap(value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to an optional TOML config file. TOML values override CLI ones.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the authoritative tenant directory TOML. Without it the
    /// daemon only promotes what is already in the store.
    #[clap(long, value_parser = parse_path)]
    pub tenant_directory: Option<PathBuf>,

    /// Seconds between promotion sweeps.
    #[clap(long, default_value_t = 300)]
    pub sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!(
        "Starting scheduler-server {} (git: {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
        tenant_directory: cli_args.tenant_directory,
        sweep_interval_secs: cli_args.sweep_interval_secs,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    metrics::init_metrics();

    let store = Arc::new(SqliteSchedulerStore::new(config.scheduler_db_path())?);
    let service = Arc::new(SchedulerService::new(store, config.scheduler.clone()));

    let directory: Option<Arc<dyn TenantDirectory>> = config
        .tenant_directory
        .as_ref()
        .map(|path| Arc::new(FileTenantDirectory::new(path)) as Arc<dyn TenantDirectory>);

    let shutdown_token = CancellationToken::new();
    {
        let shutdown_token = shutdown_token.clone();
        ctrlc::set_handler(move || {
            info!("Received interrupt, shutting down");
            shutdown_token.cancel();
        })
        .context("Failed to install interrupt handler")?;
    }

    let sweep_loop = SweepLoop::new(service, directory, config.scheduler, shutdown_token);
    sweep_loop.run().await;

    info!("scheduler-server stopped");
    Ok(())
}
