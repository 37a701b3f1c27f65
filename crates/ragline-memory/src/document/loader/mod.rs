mod csv_loader;
mod text;

use std::path::Path;

pub use csv_loader::CsvLoader;
pub use text::TextLoader;

use super::{DocumentError, DocumentLoader};

/// Pick a loader from the file extension: `.csv` uses [`CsvLoader`], and
/// `.txt`, `.md` and `.markdown` use [`TextLoader`].
///
/// # Errors
///
/// Returns [`DocumentError::UnsupportedFormat`] for anything else.
pub fn loader_for_path(path: &Path) -> Result<Box<dyn DocumentLoader>, DocumentError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let csv = CsvLoader::default();
    if csv.supported_extensions().contains(&ext.as_str()) {
        return Ok(Box::new(csv));
    }
    let text = TextLoader::default();
    if text.supported_extensions().contains(&ext.as_str()) {
        return Ok(Box::new(text));
    }
    Err(DocumentError::UnsupportedFormat(path.display().to_string()))
}
