//! Embeddings via an OpenAI-compatible `/embeddings` endpoint.
//!
//! Default model `text-embedding-3-small` (1536 dimensions); any
//! OpenAI-compatible provider works through a custom config.

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

use crate::cache::embedder::{Embedder, EmbedderError};

/// OpenAI Embeddings client implementing [`Embedder`].
pub struct OpenAIEmbedder {
    config: OpenAIConfig,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbedder {
    /// API key from `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_config(OpenAIConfig::new(), model)
    }

    /// Custom config: base URL, API key, or another compatible provider.
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config,
            model,
            dimensions,
        }
    }

    fn model_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let inputs: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let input = if inputs.len() == 1 {
            EmbeddingInput::String(inputs.into_iter().next().unwrap_or_default())
        } else {
            EmbeddingInput::StringArray(inputs)
        };

        let client = Client::with_config(self.config.clone());
        let response = client
            .embeddings()
            .create(CreateEmbeddingRequest {
                input,
                model: self.model.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| EmbedderError::Embedding(format!("embeddings API error: {}", e)))?;

        if response.data.len() != texts.len() {
            return Err(EmbedderError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}
