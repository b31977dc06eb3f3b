use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::embedder::EmbedderKind;
use crate::index::SearchMethod;
use crate::vector_ops::Metric;

pub type Number = f32;

pub const EPSILON: f32 = 1e-6;

pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Resolved runtime settings. Sources, later wins: built-in defaults,
/// `vekta_rag_config.*` in the working directory, `VEKTA_RAG_*` variables.
#[derive(Debug, Clone)]
pub struct State {
    pub docs_dir: PathBuf,
    pub index_path: PathBuf,
    pub chunk_size: usize,
    pub top_k: usize,
    pub search_method: SearchMethod,
    pub metric: Metric,
    pub ann_num_projections: usize,
    pub embedder: EmbedderKind,
    pub hash_dimensions: usize,
    pub embed_batch_size: usize,
    pub ollama_url: String,
    pub embed_model: String,
    pub generate_model: String,
    pub request_timeout: Duration,
    pub crawl_base_url: String,
    pub crawl_max_pages: usize,
    pub content_selector: String,
    pub log_dir: Option<PathBuf>,
}

impl State {
    pub fn new() -> Result<Self> {
        let mut config = Config::default();
        #[allow(deprecated)]
        {
            config.merge(ConfigFile::with_name("vekta_rag_config").required(false))?;
            config.merge(Environment::with_prefix("VEKTA_RAG"))?;
        }
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let docs_dir: String = optional(config, "docs_dir")?.unwrap_or_else(|| "scraped_pages".into());
        let index_path: String =
            optional(config, "index_path")?.unwrap_or_else(|| "vekta_rag.index".into());
        let chunk_size = optional(config, "chunk_size")?.unwrap_or(DEFAULT_CHUNK_SIZE);
        let top_k = optional(config, "top_k")?.unwrap_or(1);
        let search_method = parsed::<SearchMethod>(config, "search_method")?.unwrap_or(SearchMethod::Exact);
        let metric = parsed::<Metric>(config, "metric")?.unwrap_or(Metric::InnerProduct);
        let ann_num_projections = optional(config, "ann_num_projections")?.unwrap_or(10);
        let embedder = parsed::<EmbedderKind>(config, "embedder")?.unwrap_or(EmbedderKind::Hash);
        let hash_dimensions = optional(config, "hash_dimensions")?.unwrap_or(384);
        let embed_batch_size = optional(config, "embed_batch_size")?.unwrap_or(32);
        let ollama_url =
            optional(config, "ollama_url")?.unwrap_or_else(|| "http://localhost:11434".to_string());
        let embed_model =
            optional(config, "embed_model")?.unwrap_or_else(|| "nomic-embed-text".to_string());
        let generate_model =
            optional(config, "generate_model")?.unwrap_or_else(|| "orca-mini".to_string());
        let request_timeout_secs: u64 = optional(config, "request_timeout_secs")?.unwrap_or(60);
        let crawl_base_url = optional(config, "crawl_base_url")?
            .unwrap_or_else(|| "https://www.niet.co.in/blog".to_string());
        let crawl_max_pages = optional(config, "crawl_max_pages")?.unwrap_or(5);
        let content_selector =
            optional(config, "content_selector")?.unwrap_or_else(|| "#primary".to_string());
        let log_dir: Option<String> = optional(config, "log_dir")?;

        if chunk_size == 0 {
            anyhow::bail!("VEKTA_RAG_CHUNK_SIZE must be greater than zero.");
        }
        if top_k == 0 {
            anyhow::bail!("VEKTA_RAG_TOP_K must be greater than zero.");
        }
        if hash_dimensions == 0 {
            anyhow::bail!("VEKTA_RAG_HASH_DIMENSIONS must be greater than zero.");
        }
        if embed_batch_size == 0 {
            anyhow::bail!("VEKTA_RAG_EMBED_BATCH_SIZE must be greater than zero.");
        }

        Ok(Self {
            docs_dir: PathBuf::from(docs_dir),
            index_path: PathBuf::from(index_path),
            chunk_size,
            top_k,
            search_method,
            metric,
            ann_num_projections,
            embedder,
            hash_dimensions,
            embed_batch_size,
            ollama_url,
            embed_model,
            generate_model,
            request_timeout: Duration::from_secs(request_timeout_secs),
            crawl_base_url,
            crawl_max_pages,
            content_selector,
            log_dir: log_dir.map(PathBuf::from),
        })
    }

    pub fn print_config(&self) {
        println!("docs_dir={}", self.docs_dir.display());
        println!("index_path={}", self.index_path.display());
        println!("chunk_size={}", self.chunk_size);
        println!("top_k={}", self.top_k);
        println!("search_method={}", self.search_method.as_str());
        println!("metric={}", self.metric.as_str());
        println!("ann_num_projections={}", self.ann_num_projections);
        println!("embedder={}", self.embedder.as_str());
        println!("hash_dimensions={}", self.hash_dimensions);
        println!("embed_batch_size={}", self.embed_batch_size);
        println!("ollama_url={}", self.ollama_url);
        println!("embed_model={}", self.embed_model);
        println!("generate_model={}", self.generate_model);
        println!("request_timeout_secs={}", self.request_timeout.as_secs());
        println!("crawl_base_url={}", self.crawl_base_url);
        println!("crawl_max_pages={}", self.crawl_max_pages);
        println!("content_selector={}", self.content_selector);
        if let Some(dir) = &self.log_dir {
            println!("log_dir={}", dir.display());
        }
    }
}

/// A missing key is `None`; a present key of the wrong type is an error.
fn optional<T: DeserializeOwned>(config: &Config, key: &str) -> Result<Option<T>> {
    match config.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("invalid value for '{}'", key)),
    }
}

fn parsed<T>(config: &Config, key: &str) -> Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    match optional::<String>(config, key)? {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("invalid value for '{}': {}", key, err)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::builder().build().unwrap();
        let state = State::from_config(&config).unwrap();
        assert_eq!(state.docs_dir, PathBuf::from("scraped_pages"));
        assert_eq!(state.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(state.top_k, 1);
        assert_eq!(state.search_method, SearchMethod::Exact);
        assert_eq!(state.metric, Metric::InnerProduct);
        assert_eq!(state.embedder, EmbedderKind::Hash);
        assert_eq!(state.generate_model, "orca-mini");
        assert_eq!(state.request_timeout, Duration::from_secs(60));
        assert!(state.log_dir.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::builder()
            .set_override("chunk_size", 512)
            .unwrap()
            .set_override("search_method", "ann")
            .unwrap()
            .set_override("metric", "cosine")
            .unwrap()
            .set_override("embedder", "ollama")
            .unwrap()
            .set_override("log_dir", "logs")
            .unwrap()
            .build()
            .unwrap();
        let state = State::from_config(&config).unwrap();
        assert_eq!(state.chunk_size, 512);
        assert_eq!(state.search_method, SearchMethod::Ann);
        assert_eq!(state.metric, Metric::Cosine);
        assert_eq!(state.embedder, EmbedderKind::Ollama);
        assert_eq!(state.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = Config::builder()
            .set_override("chunk_size", 0)
            .unwrap()
            .build()
            .unwrap();
        assert!(State::from_config(&config).is_err());
    }

    #[test]
    fn unknown_search_method_is_rejected() {
        let config = Config::builder()
            .set_override("search_method", "hnsw")
            .unwrap()
            .build()
            .unwrap();
        let err = State::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("search_method"));
    }
}
