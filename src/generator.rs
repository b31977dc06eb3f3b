use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::{Number, State};
use crate::document::Document;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::retriever::Retriever;

/// Turns a question plus retrieved context into an answer.
pub trait AnswerGenerator: Send + Sync {
    fn generate(&self, query: &str, context: &str) -> Result<String>;
}

pub fn build_prompt(query: &str, context: &str) -> String {
    format!("Context: {}\nQuestion: {}\nAnswer:", context, query)
}

/// Blocking client for Ollama's non-streaming `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(RagError::InvalidArgument("missing generation model name".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RagError::Generation(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model,
        })
    }

    pub fn from_state(state: &State) -> Result<Self> {
        Self::new(
            &state.ollama_url,
            state.generate_model.clone(),
            state.request_timeout,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl AnswerGenerator for OllamaGenerator {
    fn generate(&self, query: &str, context: &str) -> Result<String> {
        let prompt = build_prompt(query, context);
        debug!("prompt for {}:\n{}", self.model, prompt);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: false,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|err| RagError::Generation(format!("request to {} failed: {}", self.endpoint, err)))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RagError::Generation(format!(
                "Ollama returned {}: {}",
                status, text
            )));
        }
        let parsed: GenerateResponse = resp
            .json()
            .map_err(|err| RagError::Generation(format!("failed to parse Ollama response: {}", err)))?;
        Ok(parsed.response)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub query: String,
    pub context: Document,
    pub score: Number,
    pub answer: String,
}

/// Retrieves the best passage for `query` and hands both to `generator`.
pub fn answer<E: Embedder, G: AnswerGenerator + ?Sized>(
    retriever: &Retriever<E>,
    generator: &G,
    query: &str,
) -> Result<Answer> {
    let hit = retriever.retrieve(query)?;
    info!(
        "retrieved document {} (score {:.4}) for the question",
        hit.document.id, hit.score
    );
    let start = Instant::now();
    let answer = generator.generate(query, &hit.document.text)?;
    debug!("generation took {:?}", start.elapsed());
    Ok(Answer {
        query: query.to_string(),
        context: hit.document,
        score: hit.score,
        answer,
    })
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}
