mod agent;
mod classifier;
mod config;
mod error;
mod logger;
mod models;
mod preprocess;
mod provider;
mod router;
mod transport;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use agent::EmotionAgent;
use classifier::EmotionClassifier;
use config::load_or_init;
use provider::GroqFactory;
use router::{run_router, RouterState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let data_dir = config::data_dir();
  std::fs::create_dir_all(&data_dir)
    .with_context(|| format!("creating data dir {}", data_dir.display()))?;

  let config_path = data_dir.join("config.json");
  let log_path = data_dir.join("vibevision.log");

  logger::init(&log_path).context("initializing logging")?;
  tracing::info!("VibeVision starting up");

  let mut config = load_or_init(&config_path)
    .with_context(|| format!("loading config from {}", config_path.display()))?;
  config.apply_env_overrides();

  let classifier = Arc::new(EmotionClassifier::load(&config.classifier_model_path));
  let agent = Arc::new(EmotionAgent::new(&config, Arc::new(GroqFactory::from_config(&config))));

  let listener = std::net::TcpListener::bind(&config.bind_addr)
    .with_context(|| format!("binding {}", config.bind_addr))?;
  tracing::info!(addr = %listener.local_addr()?, "router listening");

  let state = RouterState {
    started_at: Utc::now(),
    agent,
    classifier,
  };
  run_router(listener, state).await
}
