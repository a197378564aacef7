//! Face image to classifier input tensor.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array4;

use crate::error::{CompanionError, CompanionResult};

pub const INPUT_SIZE: u32 = 48;

/// Shape `(1, 48, 48, 1)`, values in `[0, 1]`.
pub type ClassifierTensor = Array4<f32>;

pub fn preprocess(image: &DynamicImage) -> ClassifierTensor {
  let gray = image.to_luma8();
  let resized = imageops::resize(&gray, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

  let side = INPUT_SIZE as usize;
  Array4::from_shape_fn((1, side, side, 1), |(_, y, x, _)| {
    resized.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
  })
}

pub fn preprocess_bytes(bytes: &[u8]) -> CompanionResult<ClassifierTensor> {
  let image = image::load_from_memory(bytes).map_err(|e| CompanionError::Decode(e.to_string()))?;
  Ok(preprocess(&image))
}
