//! Shrinks chat images before they are inlined into a vision request.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;

use crate::error::{CompanionError, CompanionResult};

pub const MAX_DIMENSION: u32 = 1024;
pub const JPEG_QUALITY: u8 = 95;

/// Accepts bare base64 or a `data:<mime>;base64,<payload>` URL.
pub fn decode_image_payload(payload: &str) -> CompanionResult<Vec<u8>> {
  let trimmed = payload.trim();
  let encoded = match trimmed.strip_prefix("data:") {
    Some(rest) => rest
      .split_once(',')
      .map(|(_, data)| data)
      .ok_or_else(|| CompanionError::ImageProcessing("malformed data URL".to_string()))?,
    None => trimmed,
  };
  base64::engine::general_purpose::STANDARD
    .decode(encoded.trim())
    .map_err(|e| CompanionError::ImageProcessing(e.to_string()))
}

/// Downscales so neither side exceeds `MAX_DIMENSION` (never upscales) and re-encodes as JPEG.
pub fn resize_for_transport(bytes: &[u8]) -> CompanionResult<Vec<u8>> {
  let img = image::load_from_memory(bytes).map_err(|e| CompanionError::ImageProcessing(e.to_string()))?;
  let (width, height) = img.dimensions();
  let img = if width > MAX_DIMENSION || height > MAX_DIMENSION {
    img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
  } else {
    img
  };

  // JPEG has no alpha channel.
  let rgb = img.to_rgb8();
  let mut out = Vec::new();
  {
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
      .encode_image(&rgb)
      .map_err(|e| CompanionError::ImageProcessing(e.to_string()))?;
  }
  Ok(out)
}

/// Full path from the client payload to the data URL placed in the image part.
pub fn prepare_vision_image(payload: &str) -> CompanionResult<String> {
  let raw = decode_image_payload(payload)?;
  let jpeg = resize_for_transport(&raw)?;
  let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
  Ok(format!("data:image/jpeg;base64,{encoded}"))
}
