//! Embedding vectors and the embedding function abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::{IndexError, IndexResult};

/// Default dimensionality of [`HashingEmbedder`].
pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

/// Wrapper type around an immutable floating-point embedding.
#[derive(Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Creates a new embedding from owned values.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidRecord`] when the supplied vector is empty
    /// or contains non-finite values.
    pub fn new(values: Vec<f32>) -> IndexResult<Self> {
        if values.is_empty() {
            return Err(IndexError::InvalidRecord("embedding vector must not be empty"));
        }
        if !values.iter().all(|value| value.is_finite()) {
            return Err(IndexError::InvalidRecord(
                "embedding vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: Arc::<[f32]>::from(values.into_boxed_slice()),
        })
    }

    /// Returns an immutable view of the embedding data.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality of the embedding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always `false` for a constructed vector; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in `[-1, 1]`; zero when either vector has no magnitude.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] when the lengths differ.
    pub fn cosine(&self, other: &Self) -> IndexResult<f32> {
        if self.len() != other.len() {
            return Err(IndexError::DimensionMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        let denominator = self.magnitude() * other.magnitude();
        if denominator == 0.0 {
            return Ok(0.0);
        }
        Ok((self.dot(other) / denominator).clamp(-1.0, 1.0))
    }

    fn dot(&self, other: &Self) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    fn magnitude(&self) -> f32 {
        self.values
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt()
    }
}

impl std::fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimensions", &self.len())
            .finish()
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EmbeddingVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Self::new(values).map_err(serde::de::Error::custom)
    }
}

/// Text embedding function.
///
/// The index and the retriever must use the same instance; the fingerprint is
/// persisted next to the vectors so a model change invalidates the store.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds one piece of text.
    async fn embed(&self, text: &str) -> IndexResult<EmbeddingVector>;

    /// Stable identifier of the model and its settings.
    fn fingerprint(&self) -> String;
}

/// Deterministic, dependency-free embedder based on signed feature hashing.
///
/// Each lowercase word contributes to one bucket, and its character trigrams
/// contribute at half weight so inflected forms still overlap. Vectors are L2
/// normalised.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Creates an embedder producing vectors of `dimensions` length.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidRecord`] when `dimensions` is zero.
    pub fn new(dimensions: usize) -> IndexResult<Self> {
        if dimensions == 0 {
            return Err(IndexError::InvalidRecord("embedding dimensions must be non-zero"));
        }
        Ok(Self { dimensions })
    }

    /// Output dimensionality.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Synchronous embedding, used by the async trait method.
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0_f32; self.dimensions];
        for token in tokenize(text) {
            self.accumulate(&mut values, token.as_bytes(), 1.0);
            let padded: Vec<char> = format!("^{token}$").chars().collect();
            for window in padded.windows(3) {
                let gram: String = window.iter().collect();
                self.accumulate(&mut values, gram.as_bytes(), 0.5);
            }
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut values {
                *value /= norm;
            }
        }
        values
    }

    fn accumulate(&self, values: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut head = [0_u8; 8];
        head.copy_from_slice(&digest[..8]);
        let bucket = u64::from_le_bytes(head) % self.dimensions as u64;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        // bucket < dimensions, which is a usize
        #[allow(clippy::cast_possible_truncation)]
        let bucket = bucket as usize;
        values[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> IndexResult<EmbeddingVector> {
        EmbeddingVector::new(self.embed_sync(text))
    }

    fn fingerprint(&self) -> String {
        format!("hashing-v1:{}", self.dimensions)
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "for", "from", "how", "i", "in", "is",
    "it", "me", "my", "of", "on", "or", "please", "the", "this", "to", "what", "with", "you",
];

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_vectors() {
        let err = EmbeddingVector::new(vec![]).expect_err("empty vector should error");
        assert!(matches!(err, IndexError::InvalidRecord(_)));
    }

    #[test]
    fn rejects_non_finite_values() {
        let err = EmbeddingVector::new(vec![1.0, f32::NAN]).expect_err("nan not allowed");
        assert!(matches!(err, IndexError::InvalidRecord(_)));
    }

    #[test]
    fn cosine_handles_zero_and_mismatch() {
        let zero = EmbeddingVector::new(vec![0.0, 0.0]).unwrap();
        let unit = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        assert!(zero.cosine(&unit).unwrap().abs() < f32::EPSILON);

        let wide = EmbeddingVector::new(vec![1.0, 0.0, 0.0]).unwrap();
        assert!(matches!(
            unit.cosine(&wide),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn hashing_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let a = embedder.embed("Current time and date").await.unwrap();
        let b = embedder.embed("current TIME, and date!").await.unwrap();
        assert_eq!(a.as_slice(), b.as_slice());

        let norm: f32 = a.as_slice().iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn related_text_scores_higher_than_unrelated() {
        let embedder = HashingEmbedder::default();
        let tool = embedder
            .embed("get_current_time current date and time clock")
            .await
            .unwrap();
        let related = embedder.embed("what time is it now").await.unwrap();
        let unrelated = embedder.embed("list enrolled students").await.unwrap();
        assert!(tool.cosine(&related).unwrap() > tool.cosine(&unrelated).unwrap());
    }

    #[test]
    fn fingerprint_tracks_dimensions() {
        assert_ne!(
            HashingEmbedder::new(8).unwrap().fingerprint(),
            HashingEmbedder::new(16).unwrap().fingerprint()
        );
    }
}
