use std::fmt::Write as _;
use std::path::Path;
use std::pin::Pin;

use super::super::{
    DEFAULT_MAX_FILE_SIZE, Document, DocumentError, DocumentLoader, DocumentMetadata,
};

/// Loads a CSV file as one document per data row.
///
/// Each row is rendered as `column: value` lines in header order. Metadata
/// carries the file path as `source` and the 0-based data row as `extra["row"]`.
/// With `source_column` set, that column's value replaces the path as `source`.
pub struct CsvLoader {
    pub max_file_size: u64,
    pub delimiter: u8,
    pub source_column: Option<String>,
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            delimiter: b',',
            source_column: None,
        }
    }
}

impl CsvLoader {
    #[must_use]
    pub fn with_source_column(mut self, column: impl Into<String>) -> Self {
        self.source_column = Some(column.into());
        self
    }

    /// Parse CSV text already in memory. `origin` becomes the default `source`.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed CSV or when `source_column` is not a header.
    pub fn parse(&self, origin: &str, data: &str) -> Result<Vec<Document>, DocumentError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(data.as_bytes());
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_owned())
            .collect();

        let source_idx = match &self.source_column {
            Some(col) => Some(headers.iter().position(|h| h == col).ok_or_else(|| {
                DocumentError::MissingColumn {
                    column: col.clone(),
                    source_path: origin.to_owned(),
                }
            })?),
            None => None,
        };

        let mut docs = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let mut content = String::new();
            for (i, value) in record.iter().enumerate() {
                let name = headers.get(i).map_or("", String::as_str);
                if !content.is_empty() {
                    content.push('\n');
                }
                let _ = write!(content, "{name}: {}", value.trim());
            }
            if content.trim().is_empty() {
                continue;
            }
            let source = source_idx
                .and_then(|i| record.get(i))
                .map_or_else(|| origin.to_owned(), str::to_owned);
            docs.push(Document {
                content,
                metadata: DocumentMetadata::new(source, "text/csv")
                    .with_extra("row", row.to_string()),
            });
        }
        Ok(docs)
    }
}

impl DocumentLoader for CsvLoader {
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<Document>, DocumentError>> + Send + '_>>
    {
        let path = path.to_path_buf();
        Box::pin(async move {
            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > self.max_file_size {
                return Err(DocumentError::FileTooLarge(meta.len()));
            }
            let data = tokio::fs::read_to_string(&path).await?;
            let docs = self.parse(&path.display().to_string(), &data)?;
            tracing::debug!(path = %path.display(), rows = docs.len(), "loaded csv document");
            Ok(docs)
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["csv"]
    }
}
