use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompanionError {
  #[error("{0}")]
  Input(String),

  #[error("Failed to process image data: {0}")]
  ImageProcessing(String),

  #[error("Failed to decode image: {0}")]
  Decode(String),

  #[error("Model not loaded")]
  ModelUnavailable,

  #[error("API Error: {message}")]
  Provider { status: Option<u16>, message: String },
}

impl CompanionError {
  pub fn provider(message: impl Into<String>) -> Self {
    CompanionError::Provider {
      status: None,
      message: message.into(),
    }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      CompanionError::Input(_) | CompanionError::ImageProcessing(_) => StatusCode::BAD_REQUEST,
      CompanionError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
      CompanionError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
      CompanionError::Provider { status, .. } => match status {
        Some(401) => StatusCode::UNAUTHORIZED,
        Some(429) => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      CompanionError::Input(_) => "input_error",
      CompanionError::ImageProcessing(_) => "image_processing_error",
      CompanionError::Decode(_) => "decode_error",
      CompanionError::ModelUnavailable => "model_unavailable",
      CompanionError::Provider { .. } => "provider_error",
    }
  }
}

pub type CompanionResult<T> = Result<T, CompanionError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn input_and_image_errors_are_client_errors() {
    assert_eq!(
      CompanionError::Input("No message or image provided".into()).status_code(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      CompanionError::ImageProcessing("bad bytes".into()).status_code(),
      StatusCode::BAD_REQUEST
    );
  }

  #[test]
  fn model_unavailable_is_distinct_from_decode_failure() {
    assert_eq!(CompanionError::ModelUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
      CompanionError::Decode("truncated".into()).status_code(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn provider_status_passthrough_for_auth_and_rate_limit() {
    let auth = CompanionError::Provider {
      status: Some(401),
      message: "invalid key".into(),
    };
    let limited = CompanionError::Provider {
      status: Some(429),
      message: "slow down".into(),
    };
    let other = CompanionError::Provider {
      status: Some(502),
      message: "bad gateway".into(),
    };
    assert_eq!(auth.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(other.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(CompanionError::provider("x").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[test]
  fn provider_message_is_preserved() {
    let err = CompanionError::provider("client not initialized");
    assert_eq!(err.to_string(), "API Error: client not initialized");
  }
}
