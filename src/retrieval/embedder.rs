//! Embedding functions for policy retrieval.
//!
//! The desk ships a deterministic, dependency-free hashed bag-of-tokens
//! embedder as the always-available fallback. A semantic model can be
//! plugged in behind the same trait.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Turns texts into fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    /// Embedder name, recorded for audit.
    fn name(&self) -> &str;

    /// Embed a batch of texts. Must be deterministic for identical input.
    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>>;
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+").unwrap())
}

/// Hashed bag-of-tokens embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dim` buckets,
/// counts accumulate, and the vector is L2-normalized.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut value = [0u8; 8];
        value.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(value) % self.dim as u64) as usize
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash-bag"
    }

    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts
            .iter()
            .map(|text| {
                let mut vec = vec![0.0f32; self.dim];
                let lowered = text.to_lowercase();
                for token in token_re().find_iter(&lowered) {
                    vec[self.bucket(token.as_str())] += 1.0;
                }
                let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in &mut vec {
                        *v /= norm;
                    }
                }
                vec
            })
            .collect()
    }
}

/// Cosine distance between two vectors (0 = identical direction).
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a * norm_b)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed(&["warranty covers heating defects".to_string()]);
        let b = embedder.embed(&["warranty covers heating defects".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_is_l2_normalized() {
        let embedder = HashEmbedder::default();
        let vec = &embedder.embed(&["water damage exclusion".to_string()])[0];
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::default();
        let vec = &embedder.embed(&[String::new()])[0];
        assert!(vec.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn similar_texts_are_closer_than_dissimilar() {
        let embedder = HashEmbedder::default();
        let vecs = embedder.embed(&[
            "warranty period three months coverage".to_string(),
            "warranty period coverage duration".to_string(),
            "banana smoothie recipe blender".to_string(),
        ]);
        let near = cosine_distance(&vecs[0], &vecs[1]);
        let far = cosine_distance(&vecs[0], &vecs[2]);
        assert!(near < far);
    }

    #[test]
    fn identical_texts_have_zero_distance() {
        let embedder = HashEmbedder::default();
        let vecs = embedder.embed(&[
            "no heat from the dryer".to_string(),
            "no heat from the dryer".to_string(),
        ]);
        assert!(cosine_distance(&vecs[0], &vecs[1]).abs() < 1e-5);
    }
}
