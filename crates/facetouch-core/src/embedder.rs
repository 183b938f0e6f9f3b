//! MobileNet frame embedder via ONNX Runtime.
//!
//! Runs a MobileNet feature extractor (classification head removed) over
//! a whole camera frame and returns the pooled activation vector.

use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const MOBILENET_INPUT_SIZE: usize = 224;
// MobileNet expects inputs scaled to [-1, 1].
const MOBILENET_MEAN: f32 = 127.5;
const MOBILENET_STD: f32 = 127.5;
const MOBILENET_MODEL_VERSION: &str = "mobilenet_v2";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} (export a MobileNet feature extractor to ONNX and place it in the model dir)")]
    ModelNotFound(String),
    #[error("invalid frame: {width}x{height} with {len} bytes")]
    InvalidFrame { width: u32, height: u32, len: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a grayscale frame into a fixed-length feature vector.
pub trait EmbeddingProvider {
    fn embed(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Embedding, EmbedderError>;
}

/// MobileNet-based frame embedder.
pub struct MobileNetEmbedder {
    session: Session,
}

impl MobileNetEmbedder {
    /// Load the MobileNet ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded MobileNet model"
        );

        Ok(Self { session })
    }

    /// Resize a grayscale frame to 224x224 and pack it into a NCHW float tensor.
    fn preprocess(pixels: &[u8], width: u32, height: u32) -> Result<Array4<f32>, EmbedderError> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || pixels.len() < expected {
            return Err(EmbedderError::InvalidFrame {
                width,
                height,
                len: pixels.len(),
            });
        }

        let gray = GrayImage::from_raw(width, height, pixels[..expected].to_vec()).ok_or(
            EmbedderError::InvalidFrame {
                width,
                height,
                len: pixels.len(),
            },
        )?;

        let size = MOBILENET_INPUT_SIZE;
        let resized = imageops::resize(&gray, size as u32, size as u32, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let normalized = (pixel.0[0] as f32 - MOBILENET_MEAN) / MOBILENET_STD;
            let (x, y) = (x as usize, y as usize);
            // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }

        Ok(tensor)
    }
}

impl EmbeddingProvider for MobileNetEmbedder {
    fn embed(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Embedding, EmbedderError> {
        let input = Self::preprocess(pixels, width, height)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("feature extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.is_empty() {
            return Err(EmbedderError::InferenceFailed("model returned an empty tensor".into()));
        }

        Ok(Embedding::normalized(raw, Some(MOBILENET_MODEL_VERSION.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let frame = vec![128u8; 64 * 48];
        let tensor = MobileNetEmbedder::preprocess(&frame, 64, 48).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, MOBILENET_INPUT_SIZE, MOBILENET_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization_range() {
        let black = MobileNetEmbedder::preprocess(&vec![0u8; 32 * 32], 32, 32).unwrap();
        let white = MobileNetEmbedder::preprocess(&vec![255u8; 32 * 32], 32, 32).unwrap();
        assert!((black[[0, 0, 10, 10]] + 1.0).abs() < 1e-6);
        assert!((white[[0, 2, 10, 10]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let frame: Vec<u8> = (0..40 * 30).map(|i| (i % 251) as u8).collect();
        let tensor = MobileNetEmbedder::preprocess(&frame, 40, 30).unwrap();
        for y in (0..MOBILENET_INPUT_SIZE).step_by(7) {
            for x in (0..MOBILENET_INPUT_SIZE).step_by(7) {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        let result = MobileNetEmbedder::preprocess(&[0u8; 10], 4, 4);
        assert!(matches!(result, Err(EmbedderError::InvalidFrame { len: 10, .. })));
        assert!(MobileNetEmbedder::preprocess(&[], 0, 0).is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let result = MobileNetEmbedder::load("/nonexistent/mobilenet_v2.onnx");
        assert!(matches!(result, Err(EmbedderError::ModelNotFound(_))));
    }
}
