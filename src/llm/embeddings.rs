//! Embedding providers.
//!
//! `Embedder` mirrors the `LlmProvider` enum-dispatch shape: one variant per
//! backend, built once at startup from config. The OpenAI-compatible variant
//! calls `/v1/embeddings`; the hash variant is a deterministic, offline
//! feature-hashing embedder used for tests and keyless local runs.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::config::EmbeddingsConfig;
use crate::llm::ProviderError;

// ── Embedder enum ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Embedder {
    OpenAi(OpenAiEmbedder),
    Hash(HashEmbedder),
}

impl Embedder {
    /// Embed a batch of texts, one vector per input, in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Embedder::OpenAi(e) => e.embed(texts).await,
            Embedder::Hash(e) => Ok(texts.iter().map(|t| e.embed_one(t)).collect()),
        }
    }
}

/// Construct an `Embedder` from config and an optional API key.
pub fn build(config: &EmbeddingsConfig, api_key: Option<String>) -> Result<Embedder, ProviderError> {
    match config.provider.as_str() {
        "hash" => Ok(Embedder::Hash(HashEmbedder::new(config.dimensions))),
        "openai" | "openai-compatible" => {
            let e = OpenAiEmbedder::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.timeout_seconds,
                api_key,
            )?;
            Ok(Embedder::OpenAi(e))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}

// ── OpenAI-compatible backend ─────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/embeddings`.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(
        api_base_url: String,
        model: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_base_url, model, api_key })
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let payload = EmbeddingsRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        debug!(model = %payload.model, inputs = texts.len(), "sending embeddings request");

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "embeddings request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            error!(%status, "embeddings request returned HTTP error");
            return Err(ProviderError::Request(format!("HTTP {status}: {body}")));
        }

        let parsed = response.json::<EmbeddingsResponse>().await.map_err(|e| {
            ProviderError::Request(format!("failed to parse embeddings response: {e}"))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(ProviderError::Request(format!(
                "embeddings response count mismatch: sent {}, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API does not guarantee order — sort by index before returning.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

// ── Hash backend ──────────────────────────────────────────────────────────────

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimensions`
/// buckets; the resulting count vector is L2-normalised. Not a semantic
/// model — but stable across runs, which is what tests and keyless local
/// setups need: texts sharing tokens score higher than disjoint ones.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(raw) % self.dimensions as u64) as usize;
            // Sign bit from the tail of the digest keeps unrelated tokens from
            // accumulating into purely positive collisions.
            if digest[31] & 1 == 0 {
                vec[bucket] += 1.0;
            } else {
                vec[bucket] -= 1.0;
            }
        }

        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}
