//! Ordered chunk storage and directory ingestion.
//!
//! Files are read in lexicographic order and cut into fixed-size character
//! windows, so two builds over the same directory assign the same ids.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{RagError, Result};

/// File extensions picked up by [`DocumentStore::build_from_files`].
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

const URL_MARKER: &str = "URL:";

#[derive(Debug, Default, Clone)]
pub struct DocumentStore {
    documents: Vec<Document>,
}

/// Result of a directory build: the documents that made it in plus the files that did not.
#[derive(Debug)]
pub struct IngestReport {
    pub store: DocumentStore,
    pub files_read: usize,
    pub failures: Vec<RagError>,
}

impl DocumentStore {
    pub fn build_from_texts<S: Into<String>>(
        texts: Vec<S>,
        source_urls: Option<Vec<String>>,
    ) -> Result<Self> {
        if let Some(urls) = &source_urls {
            if urls.len() != texts.len() {
                return Err(RagError::Shape(format!(
                    "{} texts but {} source urls",
                    texts.len(),
                    urls.len()
                )));
            }
        }

        let mut store = Self::default();
        match source_urls {
            Some(urls) => {
                for (text, url) in texts.into_iter().zip(urls) {
                    store.append(text.into(), Some(url));
                }
            }
            None => {
                for text in texts {
                    store.append(text.into(), None);
                }
            }
        }
        Ok(store)
    }

    pub fn build_from_files(dir: &Path, chunk_size: usize) -> Result<IngestReport> {
        if chunk_size == 0 {
            return Err(RagError::InvalidArgument("chunk_size must be at least 1".into()));
        }

        let entries = fs::read_dir(dir).map_err(|err| RagError::ingestion(dir, err))?;
        let mut failures = Vec::new();
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if path.is_file() && has_text_extension(&path) {
                        paths.push(path);
                    }
                }
                Err(err) => failures.push(RagError::ingestion(dir, err)),
            }
        }
        paths.sort();

        let mut store = Self::default();
        let mut files_read = 0;
        for path in paths {
            let content = match read_source(&path) {
                Ok(content) => content,
                Err(err) => {
                    warn!("skipping {}: {}", path.display(), err);
                    failures.push(err);
                    continue;
                }
            };
            let (source_url, body) = match split_url_marker(&content) {
                Ok(parts) => parts,
                Err(reason) => {
                    warn!("skipping {}: {}", path.display(), reason);
                    failures.push(RagError::Ingestion { path, reason });
                    continue;
                }
            };

            let before = store.count();
            for chunk in chunk_text(body, chunk_size) {
                store.append(chunk.to_string(), source_url.clone());
            }
            files_read += 1;
            debug!(
                "ingested {} as documents {}..{}",
                path.display(),
                before,
                store.count()
            );
        }

        Ok(IngestReport {
            store,
            files_read,
            failures,
        })
    }

    /// Rebuilds a store from documents whose ids must run 0, 1, 2, ...
    pub fn from_documents(documents: Vec<Document>) -> Result<Self> {
        if let Some((position, doc)) = documents
            .iter()
            .enumerate()
            .find(|(position, doc)| doc.id != *position)
        {
            return Err(RagError::Shape(format!(
                "document at position {} carries id {}",
                position, doc.id
            )));
        }
        Ok(Self { documents })
    }

    pub fn get(&self, id: usize) -> Result<&Document> {
        self.documents.get(id).ok_or(RagError::NotFound {
            id,
            count: self.documents.len(),
        })
    }

    pub fn count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub(crate) fn append(&mut self, text: String, source_url: Option<String>) -> usize {
        let id = self.documents.len();
        self.documents.push(Document {
            id,
            text,
            source_url,
        });
        id
    }
}

/// Splits `text` into consecutive windows of at most `chunk_size` characters.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<&str> {
    if chunk_size == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut taken = 0;
    for (offset, _) in text.char_indices() {
        if taken == chunk_size {
            chunks.push(&text[start..offset]);
            start = offset;
            taken = 0;
        }
        taken += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Separates an optional leading `URL: <value>` line (and the blank line after it) from the body.
pub fn split_url_marker(content: &str) -> std::result::Result<(Option<String>, &str), String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let Some(rest) = content.strip_prefix(URL_MARKER) else {
        return Ok((None, content));
    };
    let (line, body) = match rest.find('\n') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (rest, ""),
    };
    let url = line.trim();
    if url.is_empty() {
        return Err("URL marker line has no value".to_string());
    }
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    Ok((Some(url.to_string()), body))
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| TEXT_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn read_source(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|err| RagError::ingestion(path, err))?;
    String::from_utf8(bytes).map_err(|err| RagError::ingestion(path, err))
}
