use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Provenance of a document. Opaque to the index; carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub content_type: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DocumentMetadata {
    pub fn new(source: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content_type: content_type.into(),
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Atomic unit stored in the vector index. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub chunk_index: usize,
}

impl Chunk {
    /// Build a chunk whose id is derived from its provenance and text, so re-ingesting
    /// the same document yields the same ids.
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata, chunk_index: usize) -> Self {
        let content = content.into();
        let mut hasher = blake3::Hasher::new();
        hasher.update(metadata.source.as_bytes());
        hasher.update(&[0]);
        for (k, v) in &metadata.extra {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&chunk_index.to_le_bytes());
        hasher.update(content.as_bytes());
        let hex = hasher.finalize().to_hex();
        Self {
            id: hex[..16].to_owned(),
            content,
            metadata,
            chunk_index,
        }
    }

    /// Human-readable position, e.g. `products.csv row 3 #0`.
    #[must_use]
    pub fn position(&self) -> String {
        let mut out = self.metadata.source.clone();
        if let Some(row) = self.metadata.extra.get("row") {
            let _ = write!(out, " row {row}");
        }
        let _ = write!(out, " #{}", self.chunk_index);
        out
    }
}
