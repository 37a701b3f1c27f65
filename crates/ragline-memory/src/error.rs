use ragline_llm::LlmError;

use crate::document::DocumentError;

/// Failures building or querying a [`crate::VectorIndex`].
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to ingest chunk {chunk_id} from {origin}: {reason}")]
    Ingestion {
        chunk_id: String,
        origin: String,
        reason: String,
        #[source]
        cause: Option<LlmError>,
    },

    #[error("incompatible embedding: index has {expected} dimensions, got {actual}")]
    IncompatibleEmbedding { expected: usize, actual: usize },

    #[error("failed to embed query: {0}")]
    QueryEmbedding(#[source] LlmError),
}

impl IndexError {
    pub(crate) fn ingestion(
        chunk: &crate::Chunk,
        reason: impl Into<String>,
        cause: Option<LlmError>,
    ) -> Self {
        Self::Ingestion {
            chunk_id: chunk.id.clone(),
            origin: chunk.position(),
            reason: reason.into(),
            cause,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Index(#[from] IndexError),
}
