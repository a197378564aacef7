//! Facial emotion classifier boundary.
//!
//! The network itself is opaque: anything implementing [`EmotionModel`] that turns a
//! `(1, 48, 48, 1)` tensor into seven softmax probabilities can back the `/predict` route.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CompanionError, CompanionResult};
use crate::models::{EmotionLabel, PredictResponse, EMOTION_LABELS};
use crate::preprocess::{self, ClassifierTensor};

pub trait EmotionModel: Send + Sync {
  /// Returns one probability per entry of `EMOTION_LABELS`, summing to 1.
  fn predict(&self, tensor: &ClassifierTensor) -> anyhow::Result<[f32; 7]>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
  pub label: EmotionLabel,
  /// Arg-max probability in `[0, 1]`.
  pub confidence: f32,
  pub probabilities: [f32; 7],
}

impl Classification {
  pub fn from_probabilities(probabilities: [f32; 7]) -> Self {
    let (index, confidence) = probabilities
      .iter()
      .copied()
      .enumerate()
      .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });
    Self {
      label: EMOTION_LABELS[index],
      confidence,
      probabilities,
    }
  }

  /// Lowercase label to percentage, for every class.
  pub fn percentages(&self) -> BTreeMap<String, f32> {
    EMOTION_LABELS
      .iter()
      .zip(self.probabilities.iter())
      .map(|(label, p)| (label.as_str().to_lowercase(), p * 100.0))
      .collect()
  }

  pub fn into_response(self) -> PredictResponse {
    let all_emotions = self.percentages();
    PredictResponse {
      prediction: self.label,
      confidence: self.confidence,
      all_emotions,
    }
  }
}

pub struct EmotionClassifier {
  model: Option<Box<dyn EmotionModel>>,
}

impl EmotionClassifier {
  pub fn new(model: Box<dyn EmotionModel>) -> Self {
    Self { model: Some(model) }
  }

  pub fn unavailable() -> Self {
    Self { model: None }
  }

  /// Loads the ONNX model at `path`, degrading to an unavailable classifier on any failure.
  pub fn load(path: &Path) -> Self {
    match load_backend(path) {
      Ok(model) => {
        tracing::info!(path = %path.display(), "emotion classifier loaded");
        Self::new(model)
      }
      Err(err) => {
        tracing::warn!(path = %path.display(), "emotion classifier unavailable: {err:#}");
        Self::unavailable()
      }
    }
  }

  pub fn is_loaded(&self) -> bool {
    self.model.is_some()
  }

  pub fn classify(&self, image_bytes: &[u8]) -> CompanionResult<Classification> {
    let model = self.model.as_ref().ok_or(CompanionError::ModelUnavailable)?;
    let tensor = preprocess::preprocess_bytes(image_bytes)?;
    let probabilities = model
      .predict(&tensor)
      .map_err(|e| CompanionError::Decode(format!("inference failed: {e}")))?;
    let result = Classification::from_probabilities(probabilities);
    tracing::debug!(label = %result.label, confidence = result.confidence, "emotion classified");
    Ok(result)
  }
}

#[cfg(feature = "onnx")]
fn load_backend(path: &Path) -> anyhow::Result<Box<dyn EmotionModel>> {
  Ok(Box::new(onnx::OnnxEmotionModel::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_backend(path: &Path) -> anyhow::Result<Box<dyn EmotionModel>> {
  anyhow::bail!(
    "built without the `onnx` feature, cannot load {}",
    path.display()
  )
}

#[cfg(feature = "onnx")]
mod onnx {
  use std::path::Path;
  use std::sync::Mutex;

  use anyhow::{anyhow, Context};
  use ort::session::{builder::GraphOptimizationLevel, Session};
  use ort::value::Value;

  use super::EmotionModel;
  use crate::preprocess::{ClassifierTensor, INPUT_SIZE};

  pub struct OnnxEmotionModel {
    session: Mutex<Session>,
  }

  impl OnnxEmotionModel {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
      if !path.exists() {
        return Err(anyhow!("model not found at {}", path.display()));
      }
      let session = Session::builder()
        .map_err(|e: ort::Error| anyhow!(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e: ort::Error| anyhow!(e.to_string()))?
        .commit_from_file(path)
        .map_err(|e: ort::Error| anyhow!(e.to_string()))
        .with_context(|| format!("loading {}", path.display()))?;
      Ok(Self {
        session: Mutex::new(session),
      })
    }
  }

  impl EmotionModel for OnnxEmotionModel {
    fn predict(&self, tensor: &ClassifierTensor) -> anyhow::Result<[f32; 7]> {
      let side = INPUT_SIZE as usize;
      let shape = [1_usize, side, side, 1];
      let data: Vec<f32> = tensor.iter().copied().collect();
      let input = Value::from_array((shape, data)).map_err(|e: ort::Error| anyhow!(e.to_string()))?;

      let mut session = self
        .session
        .lock()
        .map_err(|_| anyhow!("classifier session poisoned"))?;
      let outputs = session
        .run(ort::inputs![input])
        .map_err(|e: ort::Error| anyhow!(e.to_string()))?;
      let output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("no output from classifier"))?;
      let extracted = output
        .1
        .try_extract_tensor::<f32>()
        .map_err(|e: ort::Error| anyhow!(e.to_string()))?;
      let values: Vec<f32> = extracted.1.iter().copied().collect();

      values
        .get(..7)
        .and_then(|s| <[f32; 7]>::try_from(s).ok())
        .ok_or_else(|| anyhow!("expected 7 class scores, got {}", values.len()))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

  struct FixedModel([f32; 7]);

  impl EmotionModel for FixedModel {
    fn predict(&self, tensor: &ClassifierTensor) -> anyhow::Result<[f32; 7]> {
      assert_eq!(tensor.shape(), &[1, 48, 48, 1]);
      Ok(self.0)
    }
  }

  fn face_png() -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([200, 180, 160])))
      .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
      .unwrap();
    out
  }

  #[test]
  fn arg_max_picks_label_and_confidence() {
    let result = Classification::from_probabilities([0.05, 0.0, 0.05, 0.7, 0.1, 0.05, 0.05]);
    assert_eq!(result.label, EmotionLabel::Happy);
    assert!((result.confidence - 0.7).abs() < 1e-6);
  }

  #[test]
  fn percentages_cover_all_seven_lowercase_labels() {
    let result = Classification::from_probabilities([0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.4]);
    let map = result.percentages();
    assert_eq!(map.len(), 7);
    assert!((map["surprise"] - 40.0).abs() < 1e-4);
    assert!((map["angry"] - 10.0).abs() < 1e-4);
  }

  #[test]
  fn unavailable_classifier_reports_model_unavailable() {
    let classifier = EmotionClassifier::unavailable();
    assert!(!classifier.is_loaded());
    assert!(matches!(classifier.classify(&face_png()), Err(CompanionError::ModelUnavailable)));
  }

  #[test]
  fn missing_model_file_degrades_to_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = EmotionClassifier::load(&dir.path().join("absent.onnx"));
    assert!(!classifier.is_loaded());
  }

  #[test]
  fn classify_runs_preprocessing_and_model() {
    let classifier = EmotionClassifier::new(Box::new(FixedModel([0.0, 0.0, 0.0, 0.0, 0.0, 0.9, 0.1])));
    let result = classifier.classify(&face_png()).unwrap();
    assert_eq!(result.label, EmotionLabel::Sad);
  }

  #[test]
  fn classify_surfaces_decode_errors() {
    let classifier = EmotionClassifier::new(Box::new(FixedModel([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])));
    assert!(matches!(classifier.classify(b"nope"), Err(CompanionError::Decode(_))));
  }
}
