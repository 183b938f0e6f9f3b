//! k-nearest-neighbour classifier over frame embeddings.
//!
//! Examples are kept in memory and only ever appended. Prediction ranks
//! every stored example by cosine similarity and lets the top `k` vote.

use crate::types::{Embedding, Example, Label, Prediction};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub const DEFAULT_K: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum ClassifierError {
    #[error("classifier has no examples; train both labels first")]
    Empty,
    #[error("embedding dimension mismatch: examples have {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Holds labelled examples and predicts labels for new embeddings.
pub trait Classifier {
    fn add_example(&mut self, embedding: Embedding, label: Label) -> Result<(), ClassifierError>;
    fn predict(&self, embedding: &Embedding) -> Result<Prediction, ClassifierError>;
    fn example_count(&self) -> usize;
    fn label_counts(&self) -> BTreeMap<Label, usize>;
}

/// Cosine-similarity k-NN classifier.
pub struct KnnClassifier {
    k: usize,
    examples: Vec<Example>,
}

impl KnnClassifier {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            examples: Vec::new(),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn expected_dim(&self) -> Option<usize> {
        self.examples.first().map(|e| e.embedding.dim())
    }
}

impl Default for KnnClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_K)
    }
}

impl Classifier for KnnClassifier {
    fn add_example(&mut self, embedding: Embedding, label: Label) -> Result<(), ClassifierError> {
        if let Some(expected) = self.expected_dim() {
            if embedding.dim() != expected {
                return Err(ClassifierError::DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                });
            }
        }
        self.examples.push(Example { embedding, label });
        Ok(())
    }

    fn predict(&self, embedding: &Embedding) -> Result<Prediction, ClassifierError> {
        let expected = self.expected_dim().ok_or(ClassifierError::Empty)?;
        if embedding.dim() != expected {
            return Err(ClassifierError::DimensionMismatch {
                expected,
                actual: embedding.dim(),
            });
        }

        let mut ranked: Vec<(f32, Label)> = self
            .examples
            .iter()
            .map(|ex| (embedding.similarity(&ex.embedding), ex.label))
            .collect();
        // Stable sort keeps insertion order among equal similarities.
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let votes_cast = self.k.min(ranked.len());
        let mut votes: HashMap<Label, usize> = HashMap::new();
        for (_, label) in &ranked[..votes_cast] {
            *votes.entry(*label).or_default() += 1;
        }

        let nearest = ranked[0].1;
        let top = votes.values().copied().max().unwrap_or(0);
        let label = if votes.get(&nearest) == Some(&top) {
            nearest
        } else {
            votes
                .iter()
                .filter(|&(_, &n)| n == top)
                .map(|(l, _)| *l)
                .min()
                .unwrap_or(nearest)
        };

        let mut confidences: HashMap<Label, f32> = HashMap::new();
        for ex in &self.examples {
            confidences.entry(ex.label).or_insert(0.0);
        }
        for (l, n) in votes {
            confidences.insert(l, n as f32 / votes_cast as f32);
        }

        tracing::trace!(
            ?label,
            k = votes_cast,
            best_similarity = ranked[0].0,
            "knn prediction"
        );

        Ok(Prediction { label, confidences })
    }

    fn example_count(&self) -> usize {
        self.examples.len()
    }

    fn label_counts(&self) -> BTreeMap<Label, usize> {
        let mut counts = BTreeMap::new();
        for ex in &self.examples {
            *counts.entry(ex.label).or_default() += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn trained() -> KnnClassifier {
        let mut knn = KnnClassifier::new(3);
        knn.add_example(emb(&[1.0, 0.0]), Label::Touched).unwrap();
        knn.add_example(emb(&[0.9, 0.1]), Label::Touched).unwrap();
        knn.add_example(emb(&[0.95, 0.05]), Label::Touched).unwrap();
        knn.add_example(emb(&[0.0, 1.0]), Label::NotTouched).unwrap();
        knn.add_example(emb(&[0.1, 0.9]), Label::NotTouched).unwrap();
        knn
    }

    #[test]
    fn test_predict_empty() {
        let knn = KnnClassifier::default();
        assert_eq!(knn.predict(&emb(&[1.0])).unwrap_err(), ClassifierError::Empty);
    }

    #[test]
    fn test_predict_unanimous() {
        let p = trained().predict(&emb(&[1.0, 0.02])).unwrap();
        assert_eq!(p.label, Label::Touched);
        assert!((p.confidence(Label::Touched) - 1.0).abs() < 1e-6);
        // Label with examples but no votes is reported at 0.
        assert_eq!(p.confidences.get(&Label::NotTouched), Some(&0.0));
    }

    #[test]
    fn test_predict_split_vote() {
        let p = trained().predict(&emb(&[0.2, 1.0])).unwrap();
        assert_eq!(p.label, Label::NotTouched);
        assert!((p.confidence(Label::NotTouched) - 2.0 / 3.0).abs() < 1e-6);
        assert!((p.confidence(Label::Touched) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_k_larger_than_examples() {
        let mut knn = KnnClassifier::new(10);
        knn.add_example(emb(&[1.0, 0.0]), Label::Touched).unwrap();
        knn.add_example(emb(&[0.0, 1.0]), Label::NotTouched).unwrap();
        let p = knn.predict(&emb(&[1.0, 0.1])).unwrap();
        // 1-1 tie goes to the nearest example.
        assert_eq!(p.label, Label::Touched);
        assert!((p.confidence(Label::Touched) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_single_label_only() {
        let mut knn = KnnClassifier::new(3);
        knn.add_example(emb(&[1.0, 0.0]), Label::NotTouched).unwrap();
        let p = knn.predict(&emb(&[0.0, 1.0])).unwrap();
        assert_eq!(p.label, Label::NotTouched);
        assert_eq!(p.confidence(Label::Touched), 0.0);
        assert!(!p.confidences.contains_key(&Label::Touched));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut knn = trained();
        assert_eq!(
            knn.add_example(emb(&[1.0, 0.0, 0.0]), Label::Touched),
            Err(ClassifierError::DimensionMismatch { expected: 2, actual: 3 })
        );
        assert!(matches!(
            knn.predict(&emb(&[1.0])),
            Err(ClassifierError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert_eq!(knn.example_count(), 5);
    }

    #[test]
    fn test_label_counts_only_grow() {
        let mut knn = trained();
        let counts = knn.label_counts();
        assert_eq!(counts[&Label::Touched], 3);
        assert_eq!(counts[&Label::NotTouched], 2);

        knn.add_example(emb(&[1.0, 0.0]), Label::Touched).unwrap();
        knn.add_example(emb(&[1.0, 0.0]), Label::Touched).unwrap();
        assert_eq!(knn.example_count(), 7);
        assert_eq!(knn.label_counts()[&Label::Touched], 5);
    }

    #[test]
    fn test_k_zero_clamped() {
        assert_eq!(KnnClassifier::new(0).k(), 1);
    }
}
