//! facetouch-core: Frame embedding and touch classification.
//!
//! Uses a MobileNet feature extractor via ONNX Runtime to embed camera
//! frames, and a cosine k-NN classifier trained on two labels.

pub mod classifier;
pub mod embedder;
pub mod types;

pub use classifier::{Classifier, ClassifierError, KnnClassifier};
pub use embedder::{EmbedderError, EmbeddingProvider, MobileNetEmbedder};
pub use types::{Embedding, Example, Label, ParseLabelError, Prediction};

use std::path::PathBuf;

/// Default location of the ONNX model files.
///
/// `$XDG_DATA_HOME/facetouch/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facetouch/models")
}
