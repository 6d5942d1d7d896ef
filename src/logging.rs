use color_eyre::{eyre::eyre, Result};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE: &str = "shellcache.log";

/// Filter from `RUST_LOG`, else the configured level.
fn filter(config: &Config) -> EnvFilter {
  EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.log_level))
    .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// With `log_dir` set, events go to a daily rolling file and the returned
/// guard must be held until exit so buffered lines get flushed. Otherwise
/// they go to stderr.
pub fn init(config: &Config) -> Result<Option<WorkerGuard>> {
  let registry = tracing_subscriber::registry().with(filter(config));

  match &config.log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)?;
      let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      registry
        .with(
          tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

      Ok(Some(guard))
    }
    None => {
      registry
        .with(
          tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

      Ok(None)
    }
  }
}
