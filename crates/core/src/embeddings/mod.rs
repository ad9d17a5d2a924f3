#[cfg(feature = "candle")]
pub mod bert;
pub mod hash;

pub use hash::{hash_embedding, HashEmbedder, HASH_MODEL_ID};

use crate::error::EmbeddingError;
use crate::models::RetrievalOptions;
use std::sync::OnceLock;
use tracing::{info, warn};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Maps text to a fixed-length vector. Implementations must be infallible and
/// deterministic for a given text and model identity.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;

    fn embed(&self, text: &str) -> Vec<f32>;

    /// Each text is embedded on its own; the output for one text never
    /// depends on its neighbours in the batch.
    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// A learned sentence encoder that may be missing or fail at inference time.
pub trait EmbeddingModel: Send + Sync {
    fn id(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

type ModelLoader =
    Box<dyn Fn() -> Result<Box<dyn EmbeddingModel>, EmbeddingError> + Send + Sync>;

/// Uses a learned model when one can be loaded and the hash embedding
/// otherwise.
///
/// The model is loaded on the first `embed` call, at most once per embedder.
/// A failed load is remembered and every later call goes straight to the
/// fallback.
pub struct FallbackEmbedder {
    dimensions: usize,
    loader: ModelLoader,
    model: OnceLock<Option<Box<dyn EmbeddingModel>>>,
    fallback: HashEmbedder,
}

impl FallbackEmbedder {
    pub fn new<F, M>(dimensions: usize, loader: F) -> Self
    where
        F: Fn() -> Result<M, EmbeddingError> + Send + Sync + 'static,
        M: EmbeddingModel + 'static,
    {
        Self {
            dimensions,
            loader: Box::new(move || {
                loader().map(|model| Box::new(model) as Box<dyn EmbeddingModel>)
            }),
            model: OnceLock::new(),
            fallback: HashEmbedder::new(dimensions),
        }
    }

    /// An embedder that never tries to load a model.
    pub fn hash_only(dimensions: usize) -> Self {
        Self {
            dimensions,
            loader: Box::new(|| {
                Err(EmbeddingError::Unavailable(
                    "no embedding model configured".to_string(),
                ))
            }),
            model: OnceLock::new(),
            fallback: HashEmbedder::new(dimensions),
        }
    }

    /// Picks the model backend compiled into this build, reading its location
    /// from `options.model_dir`.
    #[cfg(feature = "candle")]
    pub fn from_options(options: &RetrievalOptions) -> Self {
        let dir = bert::resolve_model_dir(options.model_dir.as_deref());
        Self::new(options.embedding_dimensions, move || {
            bert::BertEmbedder::load(&dir)
        })
    }

    #[cfg(not(feature = "candle"))]
    pub fn from_options(options: &RetrievalOptions) -> Self {
        Self::hash_only(options.embedding_dimensions)
    }

    /// Whether the learned model is in use. Does not trigger a load.
    pub fn is_model_loaded(&self) -> bool {
        self.model.get().is_some_and(Option::is_some)
    }

    fn model(&self) -> Option<&dyn EmbeddingModel> {
        self.model
            .get_or_init(|| match (self.loader)() {
                Ok(model) if model.dimensions() == self.dimensions => {
                    info!(model = model.id(), dimensions = self.dimensions, "embedding model loaded");
                    Some(model)
                }
                Ok(model) => {
                    let error = EmbeddingError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: model.dimensions(),
                    };
                    warn!(model = model.id(), %error, "using hash embeddings instead");
                    None
                }
                Err(error) => {
                    warn!(%error, "using hash embeddings instead");
                    None
                }
            })
            .as_deref()
    }
}

impl Embedder for FallbackEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        match self.model() {
            Some(model) => model.id(),
            None => HASH_MODEL_ID,
        }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        if let Some(model) = self.model() {
            match model.encode(text) {
                Ok(vector) if vector.len() == self.dimensions => return vector,
                Ok(vector) => warn!(
                    expected = self.dimensions,
                    actual = vector.len(),
                    "model returned a vector of the wrong size"
                ),
                Err(error) => warn!(%error, "model inference failed"),
            }
        }
        self.fallback.embed(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ConstantModel {
        dimensions: usize,
        fail_inference: bool,
    }

    impl EmbeddingModel for ConstantModel {
        fn id(&self) -> &str {
            "constant"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn encode(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.fail_inference {
                return Err(EmbeddingError::Inference("boom".to_string()));
            }
            let mut vector = vec![0.0; self.dimensions];
            vector[0] = 1.0;
            Ok(vector)
        }
    }

    #[test]
    fn model_is_loaded_lazily_and_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let embedder = FallbackEmbedder::new(4, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ConstantModel {
                dimensions: 4,
                fail_inference: false,
            })
        });

        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert!(!embedder.is_model_loaded());

        assert_eq!(embedder.embed("a"), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(embedder.embed("b"), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(embedder.model_id(), "constant");
        assert!(embedder.is_model_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_load_is_not_retried() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let embedder = FallbackEmbedder::new(8, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<ConstantModel, _>(EmbeddingError::Unavailable("missing".to_string()))
        });

        let first = embedder.embed("same text");
        let second = embedder.embed("same text");

        assert_eq!(first, hash_embedding("same text", 8));
        assert_eq!(first, second);
        assert_eq!(embedder.model_id(), HASH_MODEL_ID);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn model_with_wrong_dimensions_is_rejected() {
        let embedder = FallbackEmbedder::new(8, || {
            Ok(ConstantModel {
                dimensions: 3,
                fail_inference: false,
            })
        });

        assert_eq!(embedder.embed("x").len(), 8);
        assert!(!embedder.is_model_loaded());
    }

    #[test]
    fn inference_errors_fall_back_per_call() {
        let embedder = FallbackEmbedder::new(6, || {
            Ok(ConstantModel {
                dimensions: 6,
                fail_inference: true,
            })
        });

        assert_eq!(embedder.embed("text"), hash_embedding("text", 6));
    }

    #[test]
    fn batch_matches_individual_calls() {
        let embedder = FallbackEmbedder::hash_only(16);
        let texts = vec!["one".to_string(), "two".to_string(), "one".to_string()];
        let batch = embedder.embed_batch(&texts);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], embedder.embed("one"));
        assert_eq!(batch[1], embedder.embed("two"));
        assert_eq!(batch[0], batch[2]);
    }
}
