use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classifier output order. Index `i` of a probability vector maps to `EMOTION_LABELS[i]`.
pub const EMOTION_LABELS: [EmotionLabel; 7] = [
  EmotionLabel::Angry,
  EmotionLabel::Disgust,
  EmotionLabel::Fear,
  EmotionLabel::Happy,
  EmotionLabel::Neutral,
  EmotionLabel::Sad,
  EmotionLabel::Surprise,
];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EmotionLabel {
  Angry,
  Disgust,
  Fear,
  Happy,
  Neutral,
  Sad,
  Surprise,
}

impl EmotionLabel {
  pub fn as_str(&self) -> &'static str {
    match self {
      EmotionLabel::Angry => "Angry",
      EmotionLabel::Disgust => "Disgust",
      EmotionLabel::Fear => "Fear",
      EmotionLabel::Happy => "Happy",
      EmotionLabel::Neutral => "Neutral",
      EmotionLabel::Sad => "Sad",
      EmotionLabel::Surprise => "Surprise",
    }
  }
}

impl fmt::Display for EmotionLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EmotionLabel {
  type Err = String;

  /// Accepts any casing and surrounding whitespace (`" happy"` parses as `Happy`).
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim();
    EMOTION_LABELS
      .iter()
      .copied()
      .find(|label| label.as_str().eq_ignore_ascii_case(wanted))
      .ok_or_else(|| format!("Unknown emotion label: {wanted}"))
  }
}

/// A detected emotion with its confidence as a percentage in `[0, 100]`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct EmotionPrediction {
  pub label: EmotionLabel,
  pub confidence: f32,
}

impl EmotionPrediction {
  pub fn new(label: EmotionLabel, confidence: f32) -> Self {
    Self { label, confidence }
  }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ChatRequest {
  #[serde(default)]
  pub message: Option<String>,
  /// Base64 payload or `data:` URL.
  #[serde(default)]
  pub image: Option<String>,
  #[serde(default)]
  pub emotion: Option<String>,
  #[serde(default)]
  pub confidence: Option<f32>,
  #[serde(default)]
  pub new_chat: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatResponse {
  pub response: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub format: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PredictResponse {
  pub prediction: EmotionLabel,
  /// Arg-max probability in `[0, 1]`.
  pub confidence: f32,
  /// Lowercase label to percentage.
  pub all_emotions: BTreeMap<String, f32>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ProviderMessage {
  pub role: String,
  pub content: MessageContent,
}

impl ProviderMessage {
  pub fn system(text: impl Into<String>) -> Self {
    Self {
      role: "system".to_string(),
      content: MessageContent::Text(text.into()),
    }
  }

  pub fn user_text(text: impl Into<String>) -> Self {
    Self {
      role: "user".to_string(),
      content: MessageContent::Text(text.into()),
    }
  }

  pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
    Self {
      role: "user".to_string(),
      content: MessageContent::Parts(vec![
        ContentPart::Text { text: text.into() },
        ContentPart::ImageUrl {
          image_url: ImageUrl {
            url: image_url.into(),
            detail: "high".to_string(),
          },
        },
      ]),
    }
  }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
  Text(String),
  Parts(Vec<ContentPart>),
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
  Text { text: String },
  ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ImageUrl {
  pub url: String,
  pub detail: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_parsing_ignores_case_and_whitespace() {
    assert_eq!(" happy ".parse::<EmotionLabel>(), Ok(EmotionLabel::Happy));
    assert_eq!("SURPRISE".parse::<EmotionLabel>(), Ok(EmotionLabel::Surprise));
    assert!("Disgusted".parse::<EmotionLabel>().is_err());
  }

  #[test]
  fn image_message_serializes_as_content_parts() {
    let msg = ProviderMessage::user_with_image("hi", "data:image/jpeg;base64,abc");
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["role"], "user");
    assert_eq!(value["content"][0]["type"], "text");
    assert_eq!(value["content"][0]["text"], "hi");
    assert_eq!(value["content"][1]["type"], "image_url");
    assert_eq!(value["content"][1]["image_url"]["url"], "data:image/jpeg;base64,abc");
    assert_eq!(value["content"][1]["image_url"]["detail"], "high");
  }

  #[test]
  fn text_message_serializes_as_plain_string() {
    let value = serde_json::to_value(ProviderMessage::system("be kind")).unwrap();
    assert_eq!(value, serde_json::json!({ "role": "system", "content": "be kind" }));
  }

  #[test]
  fn chat_request_defaults_missing_fields() {
    let req: ChatRequest = serde_json::from_str(r#"{"message":"hey"}"#).unwrap();
    assert_eq!(req.message.as_deref(), Some("hey"));
    assert!(req.image.is_none());
    assert!(!req.new_chat);
  }
}
