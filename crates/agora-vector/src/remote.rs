//! Hosted embedding providers.
//!
//! Both providers speak JSON over `reqwest` and classify failures the same
//! way: HTTP 429 becomes [`Error::RateLimited`] (with the server's
//! `Retry-After` when present), anything else becomes [`Error::Provider`].
//! Neither retries; the failover chain decides what happens next.

use std::time::Duration;

use agora_core::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::embedding::{EmbedPurpose, EmbeddingProvider};

/// Default OpenAI-compatible API root.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default OpenAI embedding model.
pub const OPENAI_MODEL: &str = "text-embedding-3-small";

/// Default Hugging Face Inference API root.
pub const HUGGINGFACE_BASE_URL: &str = "https://api-inference.huggingface.co";

/// Default Hugging Face embedding model.
pub const HUGGINGFACE_MODEL: &str = "intfloat/multilingual-e5-small";

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a non-success response into the matching provider error.
async fn classify_failure(provider: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Error::rate_limited(provider, retry_after(&response));
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Error::provider(provider, format!("HTTP {status}: {body}"))
}

fn parse_vector(provider: &str, value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| Error::provider(provider, "embedding is not an array"))?
        .iter()
        .map(|x| {
            x.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::provider(provider, "embedding contains a non-number"))
        })
        .collect()
}

// ============================================================================
// OpenAI
// ============================================================================

/// OpenAI-compatible `/embeddings` provider.
pub struct OpenAiEmbeddingProvider {
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider that requests vectors of `dimension` from `model`.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            dimension,
            client: reqwest::Client::new(),
        }
    }

    /// Point the provider at a different API root (proxies, compatible servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, input: &[&str]) -> Value {
        json!({
            "model": self.model,
            "input": input,
            "dimensions": self.dimension,
        })
    }

    fn parse_response(&self, body: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
        let data = body["data"]
            .as_array()
            .ok_or_else(|| Error::provider(self.name(), "response has no data array"))?;

        let mut out: Vec<(u64, Vec<f32>)> = data
            .iter()
            .enumerate()
            .map(|(pos, item)| {
                let index = item["index"].as_u64().unwrap_or(pos as u64);
                parse_vector(self.name(), &item["embedding"]).map(|v| (index, v))
            })
            .collect::<Result<_>>()?;
        out.sort_by_key(|(index, _)| *index);

        if out.len() != expected {
            return Err(Error::provider(
                self.name(),
                format!("expected {expected} embeddings, got {}", out.len()),
            ));
        }
        Ok(out.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        self.embed_batch(&[text], purpose)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider(self.name(), "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str], _purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(texts))
            .send()
            .await
            .map_err(|e| Error::provider(self.name(), format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(classify_failure(self.name(), response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::provider(self.name(), format!("invalid response: {e}")))?;
        self.parse_response(&body, texts.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "openai"
    }
}

impl std::fmt::Debug for OpenAiEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("dimension", &self.dimension)
            .finish()
    }
}

// ============================================================================
// Hugging Face
// ============================================================================

/// Hugging Face Inference API feature-extraction provider.
///
/// E5-style models are asymmetric, so inputs are prefixed with `query: ` or
/// `passage: ` according to the purpose.
pub struct HuggingFaceEmbeddingProvider {
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
    client: reqwest::Client,
}

impl HuggingFaceEmbeddingProvider {
    /// Create a provider for `model`, whose output has `dimension` values.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: HUGGINGFACE_BASE_URL.to_string(),
            dimension,
            client: reqwest::Client::new(),
        }
    }

    /// Point the provider at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn inputs(texts: &[&str], purpose: EmbedPurpose) -> Vec<String> {
        let prefix = match purpose {
            EmbedPurpose::Query => "query: ",
            EmbedPurpose::Document => "passage: ",
        };
        texts.iter().map(|t| format!("{prefix}{t}")).collect()
    }

    /// Accepts either one vector per input or token-level matrices, which
    /// are mean-pooled.
    fn pool(&self, value: &Value) -> Result<Vec<f32>> {
        let rows = value
            .as_array()
            .ok_or_else(|| Error::provider(self.name(), "embedding is not an array"))?;
        if rows.first().is_some_and(Value::is_array) {
            let tokens: Vec<Vec<f32>> = rows
                .iter()
                .map(|row| parse_vector(self.name(), row))
                .collect::<Result<_>>()?;
            let width = tokens.first().map(Vec::len).unwrap_or(0);
            let mut mean = vec![0.0f32; width];
            for token in &tokens {
                for (acc, x) in mean.iter_mut().zip(token) {
                    *acc += x;
                }
            }
            let n = tokens.len().max(1) as f32;
            mean.iter_mut().for_each(|x| *x /= n);
            Ok(mean)
        } else {
            parse_vector(self.name(), value)
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceEmbeddingProvider {
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        self.embed_batch(&[text], purpose)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider(self.name(), "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str], purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/pipeline/feature-extraction/{}",
            self.base_url, self.model
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "inputs": Self::inputs(texts, purpose),
                "options": { "wait_for_model": true },
            }))
            .send()
            .await
            .map_err(|e| Error::provider(self.name(), format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(classify_failure(self.name(), response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::provider(self.name(), format!("invalid response: {e}")))?;
        let items = body
            .as_array()
            .ok_or_else(|| Error::provider(self.name(), "response is not an array"))?;
        if items.len() != texts.len() {
            return Err(Error::provider(
                self.name(),
                format!("expected {} embeddings, got {}", texts.len(), items.len()),
            ));
        }
        items.iter().map(|item| self.pool(item)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

impl std::fmt::Debug for HuggingFaceEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceEmbeddingProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("dimension", &self.dimension)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
