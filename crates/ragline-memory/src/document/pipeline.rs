use std::path::Path;
use std::sync::Arc;

use ragline_llm::LlmProvider;

use super::{Chunk, Document, DocumentError, TextSplitter, loader_for_path};
use crate::error::MemoryError;
use crate::vector_index::VectorIndex;

/// Load files, split them into chunks and embed the chunks into a [`VectorIndex`].
#[derive(Debug, Clone, Default)]
pub struct IngestionPipeline {
    splitter: TextSplitter,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(splitter: TextSplitter) -> Self {
        Self { splitter }
    }

    #[must_use]
    pub fn split_all(&self, documents: &[Document]) -> Vec<Chunk> {
        self.splitter.split_documents(documents)
    }

    /// # Errors
    ///
    /// Returns an error if the file extension is unsupported or loading fails.
    pub async fn load_and_split(&self, path: &Path) -> Result<Vec<Chunk>, DocumentError> {
        let loader = loader_for_path(path)?;
        let documents = loader.load(path).await?;
        let chunks = self.split_all(&documents);
        tracing::info!(
            path = %path.display(),
            documents = documents.len(),
            chunk_count = chunks.len(),
            "document split"
        );
        Ok(chunks)
    }

    /// Load every path in order and build one index over all of their chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if any file fails to load or any chunk fails to embed.
    pub async fn build_index<E: LlmProvider>(
        &self,
        paths: &[impl AsRef<Path>],
        embedder: Arc<E>,
    ) -> Result<VectorIndex<E>, MemoryError> {
        let mut chunks = Vec::new();
        for path in paths {
            chunks.extend(self.load_and_split(path.as_ref()).await?);
        }
        Ok(VectorIndex::build(chunks, embedder).await?)
    }
}
