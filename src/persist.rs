use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::config::Number;
use crate::document::Document;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::index::{SearchMethod, VectorIndex};
use crate::retriever::Retriever;
use crate::store::DocumentStore;
use crate::vector_ops::Metric;

const FORMAT_VERSION: u32 = 1;

/// On-disk form of a built store and index.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub format_version: u32,
    pub embedder: String,
    pub metric: Metric,
    pub documents: Vec<Document>,
    pub embeddings: Vec<Vec<Number>>,
}

impl Snapshot {
    pub fn capture<E: Embedder>(retriever: &Retriever<E>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            embedder: retriever.embedder().name(),
            metric: retriever.index().metric(),
            documents: retriever.store().documents().to_vec(),
            embeddings: retriever.index().vectors().map(<[Number]>::to_vec).collect(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self).map_err(|err| RagError::Persistence(err.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                RagError::Persistence(format!("failed to create '{}': {}", parent.display(), err))
            })?;
        }
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(|err| {
            RagError::Persistence(format!("failed to create '{}': {}", tmp.display(), err))
        })?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|err| RagError::Persistence(format!("failed to write '{}': {}", tmp.display(), err)))?;
        fs::rename(&tmp, path).map_err(|err| {
            RagError::Persistence(format!("failed to move snapshot into '{}': {}", path.display(), err))
        })?;
        info!(
            "saved {} documents to {} ({} bytes)",
            self.documents.len(),
            path.display(),
            bytes.len()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            RagError::Persistence(format!("failed to open '{}': {}", path.display(), err))
        })?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|err| {
            RagError::Persistence(format!("failed to map '{}': {}", path.display(), err))
        })?;
        let snapshot: Snapshot = bincode::deserialize(&mmap[..]).map_err(|err| {
            RagError::Persistence(format!("'{}' is not a snapshot: {}", path.display(), err))
        })?;
        if snapshot.format_version != FORMAT_VERSION {
            return Err(RagError::Persistence(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.format_version, FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }

    /// Reassembles a retriever; `embedder` must be the one the snapshot was built with.
    pub fn into_retriever<E: Embedder>(
        self,
        embedder: E,
        method: SearchMethod,
        ann_num_projections: usize,
    ) -> Result<Retriever<E>> {
        let name = embedder.name();
        if name != self.embedder {
            return Err(RagError::Persistence(format!(
                "snapshot was built with '{}' but the configured embedder is '{}'",
                self.embedder, name
            )));
        }
        if self.documents.len() != self.embeddings.len() {
            return Err(RagError::Shape(format!(
                "snapshot holds {} documents but {} embeddings",
                self.documents.len(),
                self.embeddings.len()
            )));
        }
        let store = DocumentStore::from_documents(self.documents)?;
        let index = VectorIndex::from_stored(self.embeddings, self.metric, method, ann_num_projections)?;
        Retriever::new(store, index, embedder)
    }
}
