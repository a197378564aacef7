use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DATA_DIR_ENV: &str = "VIBEVISION_DATA_DIR";
pub const BIND_ENV: &str = "VIBEVISION_BIND";
pub const CLASSIFIER_ENV: &str = "VIBEVISION_CLASSIFIER_MODEL";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
  pub bind_addr: String,
  pub provider_base_url: String,
  pub text_model: String,
  pub vision_model: String,
  pub temperature: f32,
  pub max_tokens: u32,
  pub top_p: f32,
  pub classifier_model_path: PathBuf,
  /// Client-side timeout for provider calls. Unset means wait for the provider.
  pub request_timeout_secs: Option<u64>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      bind_addr: "127.0.0.1:5000".to_string(),
      provider_base_url: "https://api.groq.com/openai/v1".to_string(),
      text_model: "llama-3.3-70b-versatile".to_string(),
      vision_model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
      temperature: 0.3,
      max_tokens: 1000,
      top_p: 1.0,
      classifier_model_path: PathBuf::from("models/fer_model.onnx"),
      request_timeout_secs: None,
    }
  }
}

impl AppConfig {
  pub fn apply_env_overrides(&mut self) {
    self.apply_overrides(|name| std::env::var(name).ok());
  }

  /// Blank values leave the file setting in place.
  fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    let value = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    if let Some(bind) = value(BIND_ENV) {
      self.bind_addr = bind;
    }
    if let Some(path) = value(CLASSIFIER_ENV) {
      self.classifier_model_path = PathBuf::from(path);
    }
  }
}

pub fn data_dir() -> PathBuf {
  std::env::var(DATA_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

pub fn load_or_init(path: &Path) -> anyhow::Result<AppConfig> {
  if !path.exists() {
    let config = AppConfig::default();
    save_config(path, &config)?;
    tracing::info!(path = %path.display(), "wrote default config");
    return Ok(config);
  }
  let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub fn save_config(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(config)?;
  std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
