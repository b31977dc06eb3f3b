//! Retrieval core for a small retrieval-augmented-generation pipeline:
//! chunk documents, embed them, search by inner product, hand the best
//! passage to a language model.

pub mod ann;
pub mod config;
pub mod crawler;
pub mod document;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod index;
pub mod logging;
pub mod persist;
pub mod retriever;
pub mod store;
pub mod vector_ops;

pub use document::Document;
pub use embedder::{Embedder, HashEmbedder, OllamaEmbedder};
pub use error::{RagError, Result};
pub use generator::{AnswerGenerator, OllamaGenerator};
pub use index::{ScoredId, SearchMethod, VectorIndex};
pub use persist::Snapshot;
pub use retriever::{Hit, Retriever};
pub use store::{DocumentStore, IngestReport};
pub use vector_ops::Metric;
