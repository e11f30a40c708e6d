//! Encoder backends.
//!
//! The model weights and tokenizer are an external collaborator: the gateway
//! only needs a blocking `encode` it can call from a worker thread. The
//! production backend wraps a local ONNX embedding model; tests inject a
//! deterministic stub through the same trait.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::EmbeddingError;

pub trait EncoderBackend: Send + Sync {
    /// Encode a batch of texts. Blocking; callers run this on a worker
    /// thread. Output dimensionality is whatever the model produces; the
    /// embedder truncates and renormalizes.
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn name(&self) -> &'static str;
}

/// Local ONNX embedding model. Inference is serialized through a mutex; the
/// backing runtime does not support concurrent sessions on shared hosts.
pub struct OnnxBackend {
    model: Mutex<TextEmbedding>,
}

impl OnnxBackend {
    /// Load the model. Expensive; the embedder calls this at most once per
    /// process and only on first use.
    pub fn load() -> Result<Self, EmbeddingError> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::BGESmallENV15).with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::Unavailable(format!("model load failed: {e}")))?;

        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl EncoderBackend for OnnxBackend {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::Unavailable("encoder mutex poisoned".to_string()))?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::Unavailable(format!("inference failed: {e}")))
    }

    fn name(&self) -> &'static str {
        "onnx-local"
    }
}
