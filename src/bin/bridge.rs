use anyhow::Result;
use clap::Parser;
use sqlbridge::{transport, BridgeConfig, Dispatcher, Registry, SqliteEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Bridge CLI Arguments
///
/// Stands in for the mobile plugin transport: one JSON command per line on
/// stdin, one JSON response per line on stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with bridge settings (base_dir, busy_timeout_ms, create_dirs).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the database locations. Overrides the config file.
    #[arg(short, long)]
    base_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sqlbridge=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(base_dir) = args.base_dir {
        config.base_dir = base_dir;
    }
    tracing::info!(base_dir = %config.base_dir.display(), "bridge starting");

    let registry = Arc::new(Registry::new(SqliteEngine::new()));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), config));

    let input = BufReader::new(tokio::io::stdin());
    transport::serve(dispatcher, input, tokio::io::stdout()).await?;

    registry.close_all().await;
    tracing::info!("bridge stopped");
    Ok(())
}
