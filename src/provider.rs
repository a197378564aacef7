use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Serialize;

use crate::config::AppConfig;
use crate::error::{CompanionError, CompanionResult};
use crate::models::ProviderMessage;

pub const API_KEY_ENV: &str = "GROQ_API_KEY";
const KEYRING_SERVICE: &str = "VibeVision";
const KEYRING_USER: &str = "groq";

#[derive(Serialize, Clone, Debug)]
pub struct CompletionRequest {
  pub model: String,
  pub messages: Vec<ProviderMessage>,
  pub temperature: f32,
  pub max_tokens: u32,
  pub top_p: f32,
  pub stream: bool,
}

/// One live provider client handle.
#[async_trait]
pub trait ChatBackend: Send + Sync {
  fn session_id(&self) -> &str;

  /// Single non-streaming completion; returns the assistant text.
  async fn complete(&self, request: &CompletionRequest) -> CompanionResult<String>;
}

/// Creates fresh client handles, on startup and on every reset.
pub trait BackendFactory: Send + Sync {
  fn connect(&self) -> anyhow::Result<Arc<dyn ChatBackend>>;
}

pub struct GroqFactory {
  base_url: String,
  timeout: Option<Duration>,
}

impl GroqFactory {
  pub fn from_config(config: &AppConfig) -> Self {
    Self {
      base_url: config.provider_base_url.trim_end_matches('/').to_string(),
      timeout: config.request_timeout_secs.map(Duration::from_secs),
    }
  }
}

impl BackendFactory for GroqFactory {
  fn connect(&self) -> anyhow::Result<Arc<dyn ChatBackend>> {
    let key = get_api_key()?;
    Ok(Arc::new(GroqClient::new(&self.base_url, &key, self.timeout)?))
  }
}

fn get_api_key() -> anyhow::Result<String> {
  resolve_api_key(std::env::var(API_KEY_ENV).ok(), || {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
      .and_then(|e| e.get_password())
      .ok()
  })
}

/// Environment first, keyring second. Whitespace-only values count as missing.
fn resolve_api_key(
  from_env: Option<String>,
  from_keyring: impl FnOnce() -> Option<String>,
) -> anyhow::Result<String> {
  let usable = |key: Option<String>| key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
  usable(from_env)
    .or_else(|| usable(from_keyring()))
    .ok_or_else(|| anyhow!("{API_KEY_ENV} not found in environment or keyring"))
}

pub struct GroqClient {
  http: reqwest::Client,
  base_url: String,
  api_key: String,
  session_id: String,
}

impl GroqClient {
  pub fn new(base_url: &str, api_key: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let http = builder.build().context("failed to create HTTP client")?;
    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key: api_key.to_string(),
      session_id: uuid::Uuid::new_v4().to_string(),
    })
  }

  fn headers(&self) -> CompanionResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {}", self.api_key))
        .map_err(|_| CompanionError::provider("API key contains invalid header characters"))?,
    );
    headers.insert(
      "X-Session-Id",
      HeaderValue::from_str(&self.session_id).unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    );
    Ok(headers)
  }

  fn redact(&self, text: &str) -> String {
    if self.api_key.is_empty() {
      text.to_string()
    } else {
      text.replace(&self.api_key, "[REDACTED]")
    }
  }
}

#[async_trait]
impl ChatBackend for GroqClient {
  fn session_id(&self) -> &str {
    &self.session_id
  }

  async fn complete(&self, request: &CompletionRequest) -> CompanionResult<String> {
    let url = format!("{}/chat/completions", self.base_url);
    tracing::debug!(model = %request.model, session = %self.session_id, "sending completion request");

    let resp = self
      .http
      .post(&url)
      .headers(self.headers()?)
      .json(request)
      .send()
      .await
      .map_err(|err| CompanionError::provider(self.redact(&err.to_string())))?;

    if !resp.status().is_success() {
      let upstream_status = resp.status();
      let text = resp
        .text()
        .await
        .unwrap_or_else(|_| "Provider request failed.".to_string());
      tracing::error!(status = %upstream_status, "provider returned an error");
      return Err(CompanionError::Provider {
        status: Some(upstream_status.as_u16()),
        message: self.redact(&format!("Provider error ({upstream_status}): {text}")),
      });
    }

    let json_body = resp
      .json::<serde_json::Value>()
      .await
      .map_err(|err| CompanionError::provider(format!("Failed to parse provider response: {err}")))?;
    json_body["choices"][0]["message"]["content"]
      .as_str()
      .map(|s| s.to_string())
      .ok_or_else(|| CompanionError::provider("No response choices returned"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::{HeaderMap as AxumHeaders, StatusCode};
  use axum::routing::post;
  use axum::{Json, Router};

  async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
  }

  fn request() -> CompletionRequest {
    CompletionRequest {
      model: "llama-3.3-70b-versatile".to_string(),
      messages: vec![ProviderMessage::user_text("hello")],
      temperature: 0.3,
      max_tokens: 1000,
      top_p: 1.0,
      stream: false,
    }
  }

  #[tokio::test]
  async fn complete_returns_first_choice_and_sends_payload() {
    let app = Router::new().route(
      "/chat/completions",
      post(|headers: AxumHeaders, Json(body): Json<serde_json::Value>| async move {
        assert_eq!(headers["authorization"], "Bearer secret-key");
        assert!(headers.contains_key("x-session-id"));
        assert_eq!(body["stream"], false);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["content"], "hello");
        Json(serde_json::json!({
          "choices": [{ "message": { "role": "assistant", "content": "Hi there" } }]
        }))
      }),
    );
    let base = serve(app).await;

    let client = GroqClient::new(&base, "secret-key", None).unwrap();
    assert_eq!(client.complete(&request()).await.unwrap(), "Hi there");
  }

  #[tokio::test]
  async fn upstream_errors_keep_status_and_hide_key() {
    let app = Router::new().route(
      "/chat/completions",
      post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited for key secret-key") }),
    );
    let base = serve(app).await;

    let client = GroqClient::new(&base, "secret-key", None).unwrap();
    match client.complete(&request()).await {
      Err(CompanionError::Provider { status, message }) => {
        assert_eq!(status, Some(429));
        assert!(message.contains("rate limited"));
        assert!(!message.contains("secret-key"));
      }
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[tokio::test]
  async fn missing_choices_is_a_provider_error() {
    let app = Router::new().route(
      "/chat/completions",
      post(|| async { Json(serde_json::json!({ "choices": [] })) }),
    );
    let base = serve(app).await;

    let client = GroqClient::new(&base, "k", None).unwrap();
    assert!(matches!(
      client.complete(&request()).await,
      Err(CompanionError::Provider { status: None, .. })
    ));
  }

  #[test]
  fn each_client_gets_its_own_session_id() {
    let a = GroqClient::new("http://localhost", "k", None).unwrap();
    let b = GroqClient::new("http://localhost", "k", None).unwrap();
    assert_ne!(a.session_id(), b.session_id());
  }

  #[test]
  fn env_key_wins_without_touching_keyring() {
    let key = resolve_api_key(Some(" env-key ".to_string()), || panic!("keyring consulted")).unwrap();
    assert_eq!(key, "env-key");
  }

  #[test]
  fn keyring_used_when_env_missing_or_blank() {
    assert_eq!(resolve_api_key(None, || Some("ring-key".to_string())).unwrap(), "ring-key");
    assert_eq!(
      resolve_api_key(Some("   ".to_string()), || Some("ring-key".to_string())).unwrap(),
      "ring-key"
    );
  }

  #[test]
  fn blank_everywhere_is_missing() {
    assert!(resolve_api_key(None, || None).is_err());
    assert!(resolve_api_key(Some(String::new()), || Some(" \t".to_string())).is_err());
  }
}
