#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV column {column:?} not found in {source_path}")]
    MissingColumn {
        column: String,
        source_path: String,
    },
}
