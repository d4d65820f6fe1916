use std::time::Duration;

use async_trait::async_trait;
use marketlens_common::EngineResult;

/// Options for a single generation call. `timeout` bounds the HTTP request;
/// callers must never pass a timeout longer than their own deadline.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4000,
            timeout: Duration::from_secs(45),
        }
    }
}

impl GenerateOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Prompt in, text out. The caller decides whether the output is Markdown
/// or JSON; parsing happens above this seam.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> EngineResult<String>;

    /// Model identifier, for logs and trace payloads.
    fn model_name(&self) -> &str;
}

/// Dense embedding provider with a fixed dimension.
#[async_trait]
pub trait EmbedModel: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dim(&self) -> usize;
}
