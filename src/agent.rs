//! Emotion-aware companion conversation.
//!
//! Each `chat` call is stateless apart from the provider client handle, which
//! `reset` swaps out for a fresh one. The handle lives behind an async lock so a
//! reset never races a turn: a turn clones the handle it started with and keeps
//! using it even if a reset lands mid-flight.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::error::{CompanionError, CompanionResult};
use crate::models::{EmotionPrediction, ProviderMessage};
use crate::provider::{BackendFactory, ChatBackend, CompletionRequest};
use crate::transport;

pub const SYSTEM_PROMPT: &str = "You are a compassionate and insightful AI companion, acting as a personal \
advisor and therapist. Offer empathetic, thoughtful guidance to support emotional well-being, tailored to \
the user's needs. Keep responses concise, warm, and encouraging, fostering a safe and understanding space. \
Don't send any abrupt messages in reply. Keep it to the point.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelVariant {
  Text,
  Vision,
}

#[derive(Clone, Copy, Debug)]
pub struct Sampling {
  pub temperature: f32,
  pub max_tokens: u32,
  pub top_p: f32,
}

pub struct EmotionAgent {
  system_prompt: String,
  text_model: String,
  vision_model: String,
  sampling: Sampling,
  factory: Arc<dyn BackendFactory>,
  client: RwLock<Option<Arc<dyn ChatBackend>>>,
}

impl EmotionAgent {
  pub fn new(config: &AppConfig, factory: Arc<dyn BackendFactory>) -> Self {
    let client = connect(factory.as_ref());
    Self {
      system_prompt: SYSTEM_PROMPT.to_string(),
      text_model: config.text_model.clone(),
      vision_model: config.vision_model.clone(),
      sampling: Sampling {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        top_p: config.top_p,
      },
      factory,
      client: RwLock::new(client),
    }
  }

  pub async fn is_ready(&self) -> bool {
    self.client.read().await.is_some()
  }

  /// Drops the current client handle and connects a new one right away.
  pub async fn reset(&self) {
    let fresh = connect(self.factory.as_ref());
    let mut guard = self.client.write().await;
    let previous = guard.as_ref().map(|c| c.session_id().to_string());
    let next = fresh.as_ref().map(|c| c.session_id().to_string());
    *guard = fresh;
    tracing::info!(?previous, ?next, "chat session reset");
  }

  pub fn model_for(&self, variant: ModelVariant) -> &str {
    match variant {
      ModelVariant::Text => &self.text_model,
      ModelVariant::Vision => &self.vision_model,
    }
  }

  /// Produces one reply for a turn.
  ///
  /// `image` is base64 or a `data:` URL. `emotions` may be empty; when present the
  /// predictions are listed in the user text and the strongest one is used to
  /// ground the reply.
  pub async fn chat(
    &self,
    message: Option<&str>,
    image: Option<&str>,
    emotions: &[EmotionPrediction],
  ) -> CompanionResult<String> {
    let message = message.filter(|m| !m.trim().is_empty());
    let image = image.filter(|i| !i.trim().is_empty());
    if message.is_none() && image.is_none() {
      return Err(CompanionError::Input("No message or image provided".to_string()));
    }

    let client = self
      .client
      .read()
      .await
      .clone()
      .ok_or_else(|| CompanionError::provider("client not initialized"))?;

    let text_content = emotion_context_text(message, emotions);
    let (variant, messages) = match image {
      Some(payload) => {
        let url = transport::prepare_vision_image(payload)?;
        (
          ModelVariant::Vision,
          vec![ProviderMessage::user_with_image(text_content.trim(), url)],
        )
      }
      None => (
        ModelVariant::Text,
        vec![
          ProviderMessage::system(self.system_prompt.clone()),
          ProviderMessage::user_text(text_content),
        ],
      ),
    };

    let request = CompletionRequest {
      model: self.model_for(variant).to_string(),
      messages,
      temperature: self.sampling.temperature,
      max_tokens: self.sampling.max_tokens,
      top_p: self.sampling.top_p,
      stream: false,
    };
    tracing::info!(?variant, model = %request.model, session = %client.session_id(), "requesting companion reply");

    let reply = client.complete(&request).await?;
    Ok(ground_reply(reply, top_prediction(emotions)))
  }
}

fn connect(factory: &dyn BackendFactory) -> Option<Arc<dyn ChatBackend>> {
  match factory.connect() {
    Ok(client) => {
      tracing::info!(session = %client.session_id(), "provider client initialized");
      Some(client)
    }
    Err(err) => {
      tracing::error!("error initializing provider client: {err:#}");
      None
    }
  }
}

/// User text with the detected-emotion block appended.
pub fn emotion_context_text(message: Option<&str>, emotions: &[EmotionPrediction]) -> String {
  let mut text = message.unwrap_or_default().to_string();
  if !emotions.is_empty() {
    text.push_str("\n\n[Detected Emotions:");
    for pred in emotions {
      text.push_str(&format!("\n- {}: {:.1}%", pred.label, pred.confidence));
    }
    text.push(']');
  }
  text
}

pub fn top_prediction(emotions: &[EmotionPrediction]) -> Option<&EmotionPrediction> {
  emotions
    .iter()
    .fold(None, |best: Option<&EmotionPrediction>, p| match best {
      Some(b) if b.confidence >= p.confidence => Some(b),
      _ => Some(p),
    })
}

/// Prefixes the reply when it never mentions the strongest emotion (substring, case-insensitive).
pub fn ground_reply(reply: String, top: Option<&EmotionPrediction>) -> String {
  let Some(top) = top else {
    return reply;
  };
  let label = top.label.as_str().to_lowercase();
  if reply.to_lowercase().contains(&label) {
    return reply;
  }
  tracing::warn!(emotion = %top.label, "top emotion not mentioned in reply");
  format!("[Based on your {label} expression] {reply}")
}
