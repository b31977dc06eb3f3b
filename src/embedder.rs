//! Text-to-vector boundary. The retrieval core only ever calls [`Embedder::embed`].

use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{Number, State};
use crate::error::{RagError, Result};

/// Deterministic, batched text embedding. All vectors from one instance share a length.
pub trait Embedder: Send + Sync {
    /// Identifies the embedding space; vectors from embedders with different names do not mix.
    fn name(&self) -> String;

    /// One vector per input, in input order.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<Number>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<Number>> {
        self.embed(&[text])?
            .pop()
            .ok_or_else(|| RagError::Embedding("embedder returned no vector".into()))
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<Number>>> {
        (**self).embed(texts)
    }
}

impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<Number>>> {
        (**self).embed(texts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    Hash,
    Ollama,
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hash" => Ok(EmbedderKind::Hash),
            "ollama" => Ok(EmbedderKind::Ollama),
            other => Err(format!("unknown embedder '{}'", other)),
        }
    }
}

impl EmbedderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedderKind::Hash => "hash",
            EmbedderKind::Ollama => "ollama",
        }
    }
}

/// Builds the embedder selected in configuration. Call once and share the result.
pub fn from_state(state: &State) -> Result<Box<dyn Embedder>> {
    match state.embedder {
        EmbedderKind::Hash => Ok(Box::new(HashEmbedder::new(state.hash_dimensions)?)),
        EmbedderKind::Ollama => Ok(Box::new(OllamaEmbedder::new(
            &state.ollama_url,
            state.embed_model.clone(),
            state.request_timeout,
            state.embed_batch_size,
        )?)),
    }
}

/// Offline bag-of-words embedder: every lower-cased alphanumeric token adds 1.0
/// to the bucket its SHA-256 digest selects.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::InvalidArgument(
                "hash embedder needs at least one dimension".into(),
            ));
        }
        Ok(Self { dimensions })
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dimensions as u64) as usize
    }

    fn embed_text(&self, text: &str) -> Result<Vec<Number>> {
        if text.trim().is_empty() {
            return Err(RagError::Embedding("cannot embed empty text".into()));
        }
        let mut vector = vec![0.0; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }
        Ok(vector)
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> String {
        format!("hash:{}", self.dimensions)
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<Number>>> {
        texts.iter().map(|text| self.embed_text(text)).collect()
    }
}

/// Blocking client for Ollama's `/api/embed` endpoint.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    batch_size: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: String, timeout: Duration, batch_size: usize) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(RagError::InvalidArgument("missing embedding model name".into()));
        }
        if batch_size == 0 {
            return Err(RagError::InvalidArgument("batch size must be at least 1".into()));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| RagError::embedding(format!("failed to build HTTP client: {}", err)))?;
        let endpoint = format!("{}/api/embed", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            batch_size,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<Number>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: inputs,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| RagError::embedding(format!("request to {} failed: {}", self.endpoint, err)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RagError::Embedding(format!(
                "Ollama embeddings request failed ({}): {}",
                status, body
            )));
        }
        let parsed: EmbedResponse = resp
            .json()
            .map_err(|err| RagError::embedding(format!("failed to parse embedding response: {}", err)))?;
        check_batch(parsed.embeddings, inputs.len())
    }
}

impl Embedder for OllamaEmbedder {
    fn name(&self) -> String {
        format!("ollama:{}", self.model)
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<Number>>> {
        if let Some(position) = texts.iter().position(|text| text.trim().is_empty()) {
            return Err(RagError::Embedding(format!(
                "input {} is empty",
                position
            )));
        }
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!("embedding batch of {} via {}", batch.len(), self.endpoint);
            vectors.extend(self.embed_batch(batch)?);
        }
        check_batch(vectors, texts.len())
    }
}

/// Rejects responses with the wrong count or ragged dimensions.
fn check_batch(vectors: Vec<Vec<Number>>, expected: usize) -> Result<Vec<Vec<Number>>> {
    if vectors.len() != expected {
        return Err(RagError::Embedding(format!(
            "embedder returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(first) = vectors.first() {
        let dim = first.len();
        if dim == 0 {
            return Err(RagError::Embedding("embedder returned an empty vector".into()));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(RagError::Embedding(format!(
                "embedder returned vectors of length {} and {}",
                dim,
                bad.len()
            )));
        }
    }
    Ok(vectors)
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<Number>>,
}
