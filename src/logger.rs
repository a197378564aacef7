use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing::Subscriber;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Console output plus an append-only log file, both filtered by `RUST_LOG` (default `info`).
pub fn init(log_path: &Path) -> anyhow::Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  subscriber(log_path, filter)?.try_init()?;
  Ok(())
}

fn subscriber(log_path: &Path, filter: EnvFilter) -> anyhow::Result<impl Subscriber + Send + Sync + 'static> {
  let file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(log_path)
    .with_context(|| format!("opening log file {}", log_path.display()))?;

  let file_layer = fmt::layer()
    .with_ansi(false)
    .with_timer(ChronoUtc::rfc_3339())
    .with_target(true)
    .with_writer(Mutex::new(file));

  let console_layer = fmt::layer().with_target(false);

  Ok(
    tracing_subscriber::registry()
      .with(filter)
      .with(console_layer)
      .with(file_layer),
  )
}
