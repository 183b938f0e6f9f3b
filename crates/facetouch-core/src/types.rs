use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Classification category for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "touched")]
    Touched,
    #[serde(rename = "not_touch", alias = "not_touched")]
    NotTouched,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Touched, Label::NotTouched];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Touched => "touched",
            Label::NotTouched => "not_touch",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown label {0:?} (expected \"touched\" or \"not_touch\")")]
pub struct ParseLabelError(pub String);

impl FromStr for Label {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "touched" => Ok(Label::Touched),
            "not_touch" | "not_touched" => Ok(Label::NotTouched),
            _ => Err(ParseLabelError(s.to_string())),
        }
    }
}

/// Frame embedding vector (1280-dimensional for MobileNetV2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "mobilenet_v2").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Build an embedding scaled to unit L2 norm. Zero vectors are kept as-is.
    pub fn normalized(raw: Vec<f32>, model_version: Option<String>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self {
            values,
            model_version,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// A labelled training example held by a classifier.
#[derive(Debug, Clone)]
pub struct Example {
    pub embedding: Embedding,
    pub label: Label,
}

/// Outcome of classifying one embedding.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub label: Label,
    /// Per-label confidence in [0, 1]. Labels without examples are absent.
    pub confidences: HashMap<Label, f32>,
}

impl Prediction {
    /// Confidence for `label`, 0.0 when the classifier has no opinion on it.
    pub fn confidence(&self, label: Label) -> f32 {
        self.confidences.get(&label).copied().unwrap_or(0.0)
    }

    /// True when the predicted label is `label` and its confidence is strictly above `threshold`.
    pub fn exceeds(&self, label: Label, threshold: f32) -> bool {
        self.label == label && self.confidence(label) > threshold
    }
}
