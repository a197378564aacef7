use std::net::TcpListener;
use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use tower_http::cors::{Any, CorsLayer};

use crate::agent::EmotionAgent;
use crate::classifier::EmotionClassifier;
use crate::error::{CompanionError, CompanionResult};
use crate::models::{ChatRequest, ChatResponse, EmotionLabel, EmotionPrediction};

/// Text the duplicate-suffix guard looks for. Note the orchestrator's own block uses
/// "Detected Emotions" (capital E), which this guard does not match.
const EMOTION_SUFFIX_MARKER: &str = "Detected emotions";

/// Request body cap. Camera photos arrive unresized (and base64-inflated on `/chat`).
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

pub struct RouterState {
  pub started_at: DateTime<Utc>,
  pub agent: Arc<EmotionAgent>,
  pub classifier: Arc<EmotionClassifier>,
}

pub fn build_app(state: RouterState) -> Router {
  Router::new()
    .route("/", get(home))
    .route("/health", get(health))
    .route("/predict", post(predict))
    .route("/chat", post(chat))
    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .with_state(Arc::new(state))
}

pub async fn run_router(listener: TcpListener, state: RouterState) -> anyhow::Result<()> {
  let app = build_app(state);
  listener.set_nonblocking(true)?;
  let listener = tokio::net::TcpListener::from_std(listener)?;
  axum::serve(listener, app).await?;
  Ok(())
}

async fn home() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "message": "VibeVision backend is running!" }))
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
  let uptime = (Utc::now() - state.started_at).num_milliseconds();
  Json(serde_json::json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
    "started_at": state.started_at.to_rfc3339(),
    "uptime_ms": uptime,
    "classifier_loaded": state.classifier.is_loaded(),
    "provider_ready": state.agent.is_ready().await
  }))
}

async fn predict(
  State(state): State<Arc<RouterState>>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Response {
  if !state.classifier.is_loaded() {
    return companion_error(&CompanionError::ModelUnavailable);
  }

  let image = match multipart {
    Ok(multipart) => match read_image_field(multipart).await {
      Ok(image) => image,
      Err(err) => {
        tracing::error!("failed to read multipart body: {err}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "multipart_error", &err.to_string());
      }
    },
    Err(err) => {
      tracing::debug!("predict called without multipart body: {err}");
      None
    }
  };
  let Some(image) = image else {
    return error_response(StatusCode::BAD_REQUEST, "image_missing", "No image provided");
  };

  let classifier = state.classifier.clone();
  match tokio::task::spawn_blocking(move || classifier.classify(&image)).await {
    Ok(Ok(result)) => {
      tracing::info!(label = %result.label, confidence = result.confidence, "prediction served");
      (StatusCode::OK, Json(result.into_response())).into_response()
    }
    Ok(Err(err)) => {
      tracing::error!("prediction failed: {err}");
      companion_error(&err)
    }
    Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", &err.to_string()),
  }
}

/// `Ok(None)` only when the body holds no `image` field.
async fn read_image_field(mut multipart: Multipart) -> Result<Option<Vec<u8>>, MultipartError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() == Some("image") {
      return Ok(Some(field.bytes().await?.to_vec()));
    }
  }
  Ok(None)
}

async fn chat(
  State(state): State<Arc<RouterState>>,
  body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
  let req = match body {
    Ok(Json(req)) => req,
    Err(err) => {
      let status = match err.status() {
        StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
      };
      return error_response(status, "invalid_body", &err.body_text());
    }
  };

  if req.new_chat {
    state.agent.reset().await;
    let body = ChatResponse {
      response: String::new(),
      format: None,
    };
    return (StatusCode::OK, Json(body)).into_response();
  }

  let turn = match prepare_turn(req) {
    Ok(turn) => turn,
    Err(err) => return companion_error(&err),
  };

  match state
    .agent
    .chat(turn.message.as_deref(), turn.image.as_deref(), &turn.emotions)
    .await
  {
    Ok(response) => {
      let body = ChatResponse {
        response,
        format: Some("markdown".to_string()),
      };
      (StatusCode::OK, Json(body)).into_response()
    }
    Err(err) => {
      tracing::error!(code = err.code(), "chat failed: {err}");
      companion_error(&err)
    }
  }
}

#[derive(Debug, PartialEq)]
struct PreparedTurn {
  message: Option<String>,
  image: Option<String>,
  emotions: Vec<EmotionPrediction>,
}

/// Folds the detected emotion into the user message, synthesizing one when the
/// client only sent an emotion.
fn prepare_turn(req: ChatRequest) -> CompanionResult<PreparedTurn> {
  let mut message = req
    .message
    .map(|m| m.trim().to_string())
    .filter(|m| !m.is_empty());
  let image = req.image.filter(|i| !i.trim().is_empty());
  let confidence = req.confidence.unwrap_or(0.0);

  let emotion = match req.emotion.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
    Some(raw) if confidence > 0.0 => Some(raw.parse::<EmotionLabel>().map_err(CompanionError::Input)?),
    _ => None,
  };

  if let Some(label) = emotion {
    message = Some(match message {
      None => synthesize_message(label, confidence),
      Some(text) => append_emotion_suffix(text, label, confidence),
    });
  }

  if message.is_none() && image.is_none() {
    return Err(CompanionError::Input(
      "No message provided and emotion context missing.".to_string(),
    ));
  }

  Ok(PreparedTurn {
    message,
    image,
    emotions: emotion
      .map(|label| vec![EmotionPrediction::new(label, confidence)])
      .unwrap_or_default(),
  })
}

fn synthesize_message(label: EmotionLabel, confidence: f32) -> String {
  format!(
    "I'm feeling {} with about {:.1}% intensity. Can you suggest something to help with this mood?",
    label.as_str().to_lowercase(),
    confidence
  )
}

fn append_emotion_suffix(message: String, label: EmotionLabel, confidence: f32) -> String {
  if message.contains(EMOTION_SUFFIX_MARKER) {
    return message;
  }
  format!("{message} (Detected emotions: {label} ({confidence:.1}%))")
}

fn companion_error(err: &CompanionError) -> Response {
  error_response(err.status_code(), err.code(), &err.to_string())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
  let body = Json(serde_json::json!({ "error": message, "code": code }));
  (status, body).into_response()
}
