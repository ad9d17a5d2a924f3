//! BERT-family sentence encoder running on Candle.
//!
//! Loads a model from a local directory holding `config.json`,
//! `tokenizer.json` and `model.safetensors` (for example
//! `sentence-transformers/all-MiniLM-L6-v2`, 384 dimensions). Nothing is
//! downloaded: a missing directory simply means the model is unavailable.

use super::hash::normalize;
use super::EmbeddingModel;
use crate::error::EmbeddingError;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

/// Directory searched when no model location is configured.
pub const DEFAULT_MODEL_DIR: &str = "models/all-MiniLM-L6-v2";

/// Maximum sequence length fed to the encoder.
const MAX_TOKENS: usize = 512;

pub fn resolve_model_dir(configured: Option<&str>) -> PathBuf {
    PathBuf::from(configured.unwrap_or(DEFAULT_MODEL_DIR))
}

/// Caps encodings at `MAX_TOKENS`, special tokens included, so long inputs
/// still end with `[SEP]`.
fn bounded(mut tokenizer: Tokenizer) -> tokenizers::Result<Tokenizer> {
    tokenizer.with_truncation(Some(TruncationParams {
        max_length: MAX_TOKENS,
        ..TruncationParams::default()
    }))?;
    Ok(tokenizer)
}

fn token_ids(tokenizer: &Tokenizer, text: &str) -> Result<Vec<u32>, EmbeddingError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|error| EmbeddingError::Inference(format!("tokenization failed: {error}")))?;

    let ids = encoding.get_ids().to_vec();
    if ids.is_empty() {
        return Err(EmbeddingError::Inference("text produced no tokens".to_string()));
    }
    Ok(ids)
}

pub struct BertEmbedder {
    id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimensions: usize,
}

impl BertEmbedder {
    pub fn load(dir: &Path) -> Result<Self, EmbeddingError> {
        let unavailable =
            |what: &str, error: String| EmbeddingError::Unavailable(format!("{what} in {}: {error}", dir.display()));

        if !dir.is_dir() {
            return Err(unavailable("model directory", "not found".to_string()));
        }

        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
        debug!(path = %dir.display(), ?device, "loading embedding model");

        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|error| unavailable("tokenizer.json", error.to_string()))
            .and_then(|tokenizer| {
                bounded(tokenizer).map_err(|error| unavailable("tokenizer.json", error.to_string()))
            })?;

        let raw_config = std::fs::read_to_string(dir.join("config.json"))
            .map_err(|error| unavailable("config.json", error.to_string()))?;
        let config: Config = serde_json::from_str(&raw_config)
            .map_err(|error| unavailable("config.json", error.to_string()))?;
        let dimensions = serde_json::from_str::<Value>(&raw_config)
            .ok()
            .and_then(|value| value.get("hidden_size").and_then(Value::as_u64))
            .ok_or_else(|| unavailable("config.json", "missing hidden_size".to_string()))?
            as usize;

        let weights = dir.join("model.safetensors");
        // SAFETY: the weights file is memory-mapped read-only and not modified
        // while the model is alive.
        #[allow(unsafe_code)]
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)
                .map_err(|error| unavailable("model.safetensors", error.to_string()))?
        };
        let model = BertModel::load(vb, &config)
            .map_err(|error| unavailable("model weights", error.to_string()))?;

        let id = dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("bert")
            .to_string();

        Ok(Self {
            id,
            model,
            tokenizer,
            device,
            dimensions,
        })
    }

    /// Mean of the last hidden states over all tokens of a single sequence.
    fn mean_pooled(&self, ids: &[u32]) -> candle_core::Result<Vec<f32>> {
        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;
        let attention_mask = input_ids.ones_like()?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        hidden
            .mean(1)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()
    }
}

impl EmbeddingModel for BertEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let ids = token_ids(&self.tokenizer, text)?;

        let mut vector = self
            .mean_pooled(&ids)
            .map_err(|error| EmbeddingError::Inference(error.to_string()))?;
        normalize(&mut vector);
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_directory_wins() {
        assert_eq!(
            resolve_model_dir(Some("/opt/models/minilm")),
            PathBuf::from("/opt/models/minilm")
        );
        assert_eq!(resolve_model_dir(None), PathBuf::from(DEFAULT_MODEL_DIR));
    }

    const WORD_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": { "type": "BertProcessing", "sep": ["[SEP]", 2], "cls": ["[CLS]", 1] },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[UNK]": 0, "[CLS]": 1, "[SEP]": 2, "pump": 3 },
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn long_input_keeps_closing_separator() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let tokenizer = bounded(WORD_TOKENIZER.parse::<Tokenizer>()?)?;

        let ids = token_ids(&tokenizer, &"pump ".repeat(600))?;
        assert_eq!(ids.len(), MAX_TOKENS);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&2));

        let short = token_ids(&tokenizer, "pump pump")?;
        assert_eq!(short, vec![1, 3, 3, 2]);
        Ok(())
    }

    #[test]
    fn missing_directory_is_unavailable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("absent");

        let result = BertEmbedder::load(&missing);
        assert!(matches!(result, Err(EmbeddingError::Unavailable(_))));
        Ok(())
    }

    #[test]
    fn incomplete_directory_is_unavailable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("config.json"), "{}")?;

        let result = BertEmbedder::load(dir.path());
        assert!(matches!(result, Err(EmbeddingError::Unavailable(_))));
        Ok(())
    }
}
