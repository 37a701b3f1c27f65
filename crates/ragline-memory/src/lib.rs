//! Document ingestion and in-memory vector retrieval for ragline.

pub mod document;
pub mod error;
pub mod vector_index;

pub use document::{
    Chunk, CsvLoader, Document, DocumentError, DocumentLoader, DocumentMetadata,
    IngestionPipeline, SplitterConfig, TextLoader, TextSplitter, loader_for_path,
};
pub use error::{IndexError, MemoryError};
pub use vector_index::{ScoredChunk, VectorIndex};
