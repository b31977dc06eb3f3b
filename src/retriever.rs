use std::time::Instant;
use tracing::{debug, info};

use crate::config::Number;
use crate::document::Document;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::index::{SearchMethod, VectorIndex};
use crate::store::DocumentStore;
use crate::vector_ops::Metric;

/// Texts sent to the embedder per call while building.
pub const BUILD_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub document: Document,
    pub score: Number,
}

/// Owns one store, the index built over it, and the embedder that produced the index.
///
/// Reads take `&self` and may run from many threads at once; anything that
/// changes the collection takes `&mut self`.
pub struct Retriever<E> {
    store: DocumentStore,
    index: VectorIndex,
    embedder: E,
}

impl<E: Embedder> Retriever<E> {
    /// Assembles prebuilt parts; the index must hold exactly one vector per document.
    pub fn new(store: DocumentStore, index: VectorIndex, embedder: E) -> Result<Self> {
        if store.count() != index.len() {
            return Err(RagError::Shape(format!(
                "store holds {} documents but index holds {} vectors",
                store.count(),
                index.len()
            )));
        }
        Ok(Self {
            store,
            index,
            embedder,
        })
    }

    /// Embeds every document and builds an exact inner-product index over them.
    pub fn build(store: DocumentStore, embedder: E) -> Result<Self> {
        Self::build_with(store, embedder, Metric::InnerProduct, SearchMethod::Exact, 10)
    }

    pub fn build_with(
        store: DocumentStore,
        embedder: E,
        metric: Metric,
        method: SearchMethod,
        ann_num_projections: usize,
    ) -> Result<Self> {
        let start = Instant::now();
        let embeddings = embed_documents(&embedder, store.documents())?;
        let index = VectorIndex::build_with(embeddings, metric, method, ann_num_projections)?;
        info!(
            "indexed {} documents with {} in {:?}",
            store.count(),
            embedder.name(),
            start.elapsed()
        );
        Self::new(store, index, embedder)
    }

    pub fn retrieve(&self, query: &str) -> Result<Hit> {
        self.retrieve_top_k(query, 1)?
            .into_iter()
            .next()
            .ok_or(RagError::EmptyIndex)
    }

    pub fn retrieve_top_k(&self, query: &str, k: usize) -> Result<Vec<Hit>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be a positive integer".into()));
        }
        if query.trim().is_empty() {
            return Err(RagError::InvalidQuery("query is empty".into()));
        }
        if self.index.is_empty() {
            return Err(RagError::EmptyIndex);
        }

        let query_vector = self.embedder.embed_one(query)?;
        let scored = self.index.search(&query_vector, k)?;
        debug!(
            "query {:?} -> {:?}",
            query,
            scored.iter().map(|s| (s.id, s.score)).collect::<Vec<_>>()
        );

        scored
            .into_iter()
            .map(|s| {
                Ok(Hit {
                    document: self.store.get(s.id)?.clone(),
                    score: s.score,
                })
            })
            .collect()
    }

    /// Embeds and appends more documents after the initial build.
    pub fn add_texts<S: Into<String>>(
        &mut self,
        texts: Vec<S>,
        source_url: Option<String>,
    ) -> Result<Vec<usize>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = texts.into_iter().map(Into::into).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&refs)?;
        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "embedder returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        let mut staged = self.store.clone();
        let mut index = self.index.clone();
        let mut ids = Vec::with_capacity(vectors.len());
        for (text, vector) in texts.into_iter().zip(vectors) {
            let id = index.insert(vector)?;
            staged.append(text, source_url.clone());
            ids.push(id);
        }
        self.store = staged;
        self.index = index;
        Ok(ids)
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn len(&self) -> usize {
        self.store.count()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

fn embed_documents<E: Embedder>(embedder: &E, documents: &[Document]) -> Result<Vec<Vec<Number>>> {
    let mut embeddings = Vec::with_capacity(documents.len());
    for batch in documents.chunks(BUILD_BATCH_SIZE) {
        let texts: Vec<&str> = batch.iter().map(|d| d.text.as_str()).collect();
        let vectors = embedder.embed(&texts)?;
        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "embedder returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        embeddings.extend(vectors);
    }
    Ok(embeddings)
}
