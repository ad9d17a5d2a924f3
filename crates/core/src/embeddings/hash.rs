use super::Embedder;
use sha2::{Digest, Sha256};

pub const HASH_MODEL_ID: &str = "hash-sha256";

/// Deterministic, model-free embedding derived from SHA-256 digests of the
/// text. Identical text always maps to the identical unit vector.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(super::DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        HASH_MODEL_ID
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        hash_embedding(text, self.dimensions)
    }
}

/// Counter-mode digest stream: block `k` is `SHA256(text || k)`, each byte
/// becomes one component in `[-0.5, 0.5]`, then the vector is L2-normalised.
pub fn hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let dimensions = dimensions.max(1);
    let mut vector = Vec::with_capacity(dimensions);
    let mut counter = 0u32;

    while vector.len() < dimensions {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();

        vector.extend(
            digest
                .iter()
                .take(dimensions - vector.len())
                .map(|byte| f32::from(*byte) / 255.0 - 0.5),
        );
        counter = counter.wrapping_add(1);
    }

    normalize(&mut vector);
    vector
}

/// Scales `vector` to unit length in place. Zero vectors are left untouched.
pub(crate) fn normalize(vector: &mut [f32]) {
    let magnitude = vector
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
        .sqrt();

    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value = (f64::from(*value) / magnitude) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(vector: &[f32]) -> f64 {
        vector
            .iter()
            .map(|value| f64::from(*value) * f64::from(*value))
            .sum::<f64>()
            .sqrt()
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow");
        let second = embedder.embed("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = HashEmbedder::new(32);
        assert_eq!(embedder.embed("abc").len(), 32);
        assert_eq!(HashEmbedder::new(384).embed("abc").len(), 384);
        assert_eq!(HashEmbedder::new(7).embed("abc").len(), 7);
    }

    #[test]
    fn vectors_have_unit_norm() {
        let long = "long text ".repeat(200);
        for text in ["", "a", "machine learning", long.as_str()] {
            let vector = hash_embedding(text, 384);
            assert!((norm(&vector) - 1.0).abs() < 1e-6, "norm drifted for {text:?}");
        }
    }

    #[test]
    fn components_do_not_repeat_every_digest() {
        let vector = hash_embedding("repetition check", 64);
        assert_ne!(&vector[..32], &vector[32..]);
    }

    #[test]
    fn different_text_gives_different_vectors() {
        assert_ne!(hash_embedding("alpha", 16), hash_embedding("beta", 16));
    }
}
