//! In-memory vector index with exhaustive cosine-similarity search.
//!
//! Entries are `(Chunk, embedding)` pairs kept in insertion order. The index is
//! built in bulk, may be extended with [`VectorIndex::append`], and is read-only
//! while queried: `query` takes `&self`, so one built index can serve concurrent
//! queries behind an `Arc`.

use std::sync::Arc;

use ragline_llm::LlmProvider;

use crate::document::Chunk;
use crate::error::IndexError;

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub score: f32,
}

pub struct VectorIndex<E> {
    embedder: Arc<E>,
    entries: Vec<(Arc<Chunk>, Vec<f32>)>,
    dimensions: Option<usize>,
}

impl<E> std::fmt::Debug for VectorIndex<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("entries", &self.entries.len())
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl<E: LlmProvider> VectorIndex<E> {
    #[must_use]
    pub fn empty(embedder: Arc<E>) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
            dimensions: None,
        }
    }

    /// Embed every chunk and build the index.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Ingestion`] if any chunk has empty text or fails to
    /// embed, and [`IndexError::IncompatibleEmbedding`] if the embedder returns
    /// vectors of differing length.
    pub async fn build(
        chunks: impl IntoIterator<Item = Chunk>,
        embedder: Arc<E>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::empty(embedder);
        index.append(chunks).await?;
        Ok(index)
    }

    /// Wrap precomputed embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Ingestion`] for empty text or empty vectors and
    /// [`IndexError::IncompatibleEmbedding`] on mixed dimensionality.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (Chunk, Vec<f32>)>,
        embedder: Arc<E>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::empty(embedder);
        let staged = entries
            .into_iter()
            .map(|(chunk, vector)| {
                if chunk.content.trim().is_empty() {
                    return Err(IndexError::ingestion(&chunk, "chunk text is empty", None));
                }
                Ok((chunk, vector))
            })
            .collect::<Result<Vec<_>, _>>()?;
        index.commit(staged)?;
        Ok(index)
    }

    /// Embed and add chunks after the existing entries. Either every chunk is
    /// added or none is.
    ///
    /// # Errors
    ///
    /// Same as [`VectorIndex::build`]; on error the index is unchanged.
    pub async fn append(
        &mut self,
        chunks: impl IntoIterator<Item = Chunk>,
    ) -> Result<usize, IndexError> {
        let mut staged = Vec::new();
        for chunk in chunks {
            if chunk.content.trim().is_empty() {
                return Err(IndexError::ingestion(&chunk, "chunk text is empty", None));
            }
            match self.embedder.embed(&chunk.content).await {
                Ok(vector) => staged.push((chunk, vector)),
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk.id, error = %e, "chunk embedding failed");
                    return Err(IndexError::ingestion(&chunk, e.to_string(), Some(e)));
                }
            }
        }
        let added = self.commit(staged)?;
        tracing::info!(
            added,
            total = self.entries.len(),
            dimensions = ?self.dimensions,
            provider = self.embedder.name(),
            "vector index updated"
        );
        Ok(added)
    }

    fn commit(&mut self, staged: Vec<(Chunk, Vec<f32>)>) -> Result<usize, IndexError> {
        let mut dims = self.dimensions;
        for (chunk, vector) in &staged {
            if vector.is_empty() {
                return Err(IndexError::ingestion(chunk, "embedding is empty", None));
            }
            match dims {
                Some(expected) if expected != vector.len() => {
                    return Err(IndexError::IncompatibleEmbedding {
                        expected,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
                None => dims = Some(vector.len()),
            }
        }
        let added = staged.len();
        self.dimensions = dims;
        self.entries
            .extend(staged.into_iter().map(|(c, v)| (Arc::new(c), v)));
        Ok(added)
    }

    /// Embed `text` and return up to `k` chunks by descending cosine similarity.
    /// Equal scores keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::QueryEmbedding`] if embedding fails and
    /// [`IndexError::IncompatibleEmbedding`] if its length differs from the index.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vector = self
            .embedder
            .embed(text)
            .await
            .map_err(IndexError::QueryEmbedding)?;
        let results = self.search_by_vector(&vector, k)?;
        tracing::debug!(k, returned = results.len(), "vector index query");
        Ok(results)
    }

    /// # Errors
    ///
    /// Returns [`IndexError::IncompatibleEmbedding`] on a dimension mismatch.
    pub fn search_by_vector(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if let Some(expected) = self.dimensions
            && expected != vector.len()
        {
            return Err(IndexError::IncompatibleEmbedding {
                expected,
                actual: vector.len(),
            });
        }
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|(chunk, stored)| ScoredChunk {
                chunk: Arc::clone(chunk),
                score: cosine_similarity(vector, stored),
            })
            .collect();
        // sort_by is stable, so ties stay in insertion order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|(c, _)| c.as_ref())
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }
}
