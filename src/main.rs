mod cache;
mod classify;
mod commands;
mod config;
mod event;
mod http;
mod logging;
mod notify;
mod strategy;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cache::SqliteStorage;
use crate::event::EventLoop;
use crate::http::HttpFetcher;
use crate::notify::LoggingHost;
use crate::worker::ServiceWorker;

#[derive(Parser, Debug)]
#[command(name = "dispatch-offline")]
#[command(about = "Offline caching and action sync for the dispatch console")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dispatch-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the rolling log file
  #[arg(long)]
  log_stderr: bool,

  /// Treat the network as unreachable for queued actions
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let _guard = logging::init(args.log_stderr)?;

  let database = config.database_path()?;
  info!(database = %database.display(), version = %config.version, "Starting worker");

  let storage = Arc::new(SqliteStorage::open(&database)?);
  let fetcher = Arc::new(HttpFetcher::new(config.network.timeout())?);
  let worker = Arc::new(ServiceWorker::new(
    config,
    storage,
    fetcher,
    Arc::new(LoggingHost),
  )?);
  worker.queue().set_online(!args.offline);

  let events = EventLoop::spawn(Arc::clone(&worker));
  let result = commands::run(args.command, &worker, &events).await;

  events.shutdown().await?;
  worker.engine().settle().await;

  result
}
