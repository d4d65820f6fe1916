use async_trait::async_trait;
use marketlens_common::{EngineError, EngineResult};
use tracing::debug;

use super::types::*;
use crate::traits::{ChatModel, EmbedModel, GenerateOptions};
use crate::util::classify_http_error;

/// Chat client for an Ollama server. One instance per model so the fast
/// path and the deep workflow can point at different models.
pub struct OllamaChat {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl OllamaChat {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> EngineResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: ModelOptions {
                temperature: opts.temperature,
                num_predict: opts.max_tokens,
            },
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "Ollama generate request");

        let response = self
            .http
            .post(&url)
            .timeout(opts.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_http_error("llm", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Upstream(format!(
                "Ollama generate error ({status}): {error_text}"
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("Ollama generate body: {e}")))?;
        Ok(body.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embedding client for an Ollama server (BGE-M3 or similar).
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dim: usize,
    http: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, dim: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dim,
            http: reqwest::Client::new(),
        }
    }

    /// Check the server is reachable. Used by readiness probes only.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Ollama embedder ping failed");
                false
            }
        }
    }
}

#[async_trait]
impl EmbedModel for OllamaEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .http
            .post(&url)
            .timeout(std::time::Duration::from_secs(30))
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_http_error("embedder", e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(EngineError::Upstream(format!(
                "Ollama embedding error ({status})"
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("Ollama embedding body: {e}")))?;

        if body.embedding.is_empty() {
            return Err(EngineError::Upstream("empty embedding returned".into()));
        }
        Ok(body.embedding)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
