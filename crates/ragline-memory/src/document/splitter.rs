use super::types::{Chunk, Document};

/// Sizes are measured in characters, not bytes.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub sentence_aware: bool,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            sentence_aware: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    #[must_use]
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Split one document. Whitespace-only pieces are dropped, so every returned
    /// chunk has non-empty text.
    #[must_use]
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap;

        let pieces = if self.config.sentence_aware {
            let sentences: Vec<String> = split_sentences(&document.content)
                .into_iter()
                .flat_map(|s| {
                    if s.chars().count() > size {
                        split_chars(&s, size, 0)
                    } else {
                        vec![s]
                    }
                })
                .collect();
            merge_sentences(&sentences, size, overlap)
        } else {
            split_chars(&document.content, size, overlap)
        };

        pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .enumerate()
            .map(|(i, content)| Chunk::new(content, document.metadata.clone(), i))
            .collect()
    }

    #[must_use]
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents.iter().flat_map(|d| self.split(d)).collect()
    }
}

/// Break on blank lines and on `.`, `?`, `!` followed by a space. Separators stay
/// attached to the preceding piece so concatenation reproduces the input.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        let Some(&(next_i, next)) = iter.peek() else {
            break;
        };
        let boundary = match c {
            '\n' if next == '\n' => {
                iter.next();
                Some(next_i + next.len_utf8())
            }
            '.' | '?' | '!' if next == ' ' => Some(i + c.len_utf8()),
            _ => None,
        };
        if let Some(end) = boundary
            && !text[start..end].trim().is_empty()
        {
            sentences.push(text[start..end].to_owned());
            start = end;
        }
    }

    if start < text.len() && !text[start..].trim().is_empty() {
        sentences.push(text[start..].to_owned());
    }
    sentences
}

/// Greedily pack sentences into chunks of at most `chunk_size` characters. When a
/// chunk closes, the trailing sentences fitting in `chunk_overlap` seed the next one.
fn merge_sentences(sentences: &[String], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let lens: Vec<usize> = sentences.iter().map(|s| s.chars().count()).collect();
    let mut chunks = Vec::new();
    let mut window = 0..0;
    let mut current_len = 0;

    for idx in 0..sentences.len() {
        if !window.is_empty() && current_len + lens[idx] > chunk_size {
            chunks.push(sentences[window.clone()].concat());

            let mut keep_from = idx;
            let mut kept = 0;
            while keep_from > window.start
                && kept + lens[keep_from - 1] <= chunk_overlap
                && kept + lens[keep_from - 1] + lens[idx] <= chunk_size
            {
                keep_from -= 1;
                kept += lens[keep_from];
            }
            window = keep_from..idx;
            current_len = kept;
        }
        window.end = idx + 1;
        current_len += lens[idx];
    }

    if !window.is_empty() {
        chunks.push(sentences[window].concat());
    }
    chunks
}

fn split_chars(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + chunk_size).min(char_count);
        chunks.push(text[bounds[start]..bounds[end]].to_owned());
        if end == char_count {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::types::DocumentMetadata;

    fn make_doc(content: &str) -> Document {
        Document {
            content: content.to_owned(),
            metadata: DocumentMetadata::new("test", "text/plain"),
        }
    }

    fn splitter(chunk_size: usize, chunk_overlap: usize, sentence_aware: bool) -> TextSplitter {
        TextSplitter::new(SplitterConfig {
            chunk_size,
            chunk_overlap,
            sentence_aware,
        })
    }

    #[test]
    fn empty_document() {
        let chunks = TextSplitter::default().split(&make_doc(""));
        assert!(chunks.is_empty());
    }

    #[test]
    fn whitespace_document() {
        let chunks = TextSplitter::default().split(&make_doc("  \n\n \t"));
        assert!(chunks.is_empty());
    }

    #[test]
    fn single_small_chunk() {
        let chunks = TextSplitter::default().split(&make_doc("Hello world."));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "Hello world.");
        assert_eq!(chunks[0].metadata.source, "test");
    }

    #[test]
    fn sentence_aware_splitting() {
        let text = "First sentence. Second sentence. Third sentence.";
        let chunks = splitter(20, 5, true).split(&make_doc(text));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "First sentence.");
        assert_eq!(chunks[2].content, " Third sentence.");
    }

    #[test]
    fn sentence_overlap_repeats_tail() {
        let chunks = splitter(6, 3, true).split(&make_doc("A. B. C. D."));
        assert!(chunks.len() > 1);
        assert!(chunks[1].content.starts_with(" B."));
    }

    #[test]
    fn long_sentence_is_hard_split() {
        let text = "x".repeat(25);
        let chunks = splitter(10, 0, true).split(&make_doc(&text));
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 10));
    }

    #[test]
    fn char_splitting_with_overlap() {
        let chunks = splitter(10, 3, false).split(&make_doc("abcdefghijklmnopqrstuvwxyz"));
        assert_eq!(chunks[0].content, "abcdefghij");
        assert_eq!(chunks[1].content, "hijklmnopq");
        assert_eq!(chunks.last().unwrap().content, "vwxyz");
    }

    #[test]
    fn char_split_multibyte() {
        let chunks = split_chars("héllo wörld", 4, 0);
        assert_eq!(chunks, vec!["héll", "o wö", "rld"]);
    }

    #[test]
    fn char_split_full_overlap_makes_progress() {
        let chunks = split_chars("abcde", 3, 3);
        assert_eq!(chunks, vec!["abc", "bcd", "cde"]);
    }

    #[test]
    fn sentence_boundaries() {
        assert_eq!(split_sentences("First paragraph.\n\nSecond paragraph.").len(), 2);
        assert_eq!(split_sentences("Is this a question? Yes it is.").len(), 2);
        assert_eq!(split_sentences("Wow! Amazing.").len(), 2);
        assert_eq!(split_sentences("Hello world"), vec!["Hello world"]);
    }

    #[test]
    fn split_documents_keeps_per_document_indices() {
        let docs = vec![make_doc("One."), make_doc("Two.")];
        let chunks = TextSplitter::default().split_documents(&docs);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.chunk_index == 0));
        assert_ne!(chunks[0].id, chunks[1].id);
    }

    mod proptest_splitter {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            #[test]
            fn split_never_panics(
                content in "\\PC{0,2000}",
                chunk_size in 1usize..500,
                chunk_overlap in 0usize..500,
                sentence_aware in proptest::bool::ANY,
            ) {
                let _ = splitter(chunk_size, chunk_overlap, sentence_aware).split(&make_doc(&content));
            }

            #[test]
            fn sentences_concatenate_to_input(content in "[a-z .!?\n]{0,300}") {
                let joined: String = split_sentences(&content).concat();
                prop_assert_eq!(joined.trim(), content.trim());
            }

            #[test]
            fn windows_preserve_non_space_text(
                content in "[a-z ]{1,500}",
                chunk_size in 1usize..200,
            ) {
                let chunks = splitter(chunk_size, 0, false).split(&make_doc(&content));
                let joined: String = chunks.iter().flat_map(|c| c.content.chars()).filter(|c| *c != ' ').collect();
                let expected: String = content.chars().filter(|c| *c != ' ').collect();
                prop_assert_eq!(joined, expected);
            }

            #[test]
            fn chunks_are_bounded_indexed_and_non_empty(
                content in "[a-z. !?]{1,800}",
                chunk_size in 1usize..200,
                chunk_overlap in 0usize..100,
                sentence_aware in proptest::bool::ANY,
            ) {
                let chunks = splitter(chunk_size, chunk_overlap, sentence_aware).split(&make_doc(&content));
                for (i, chunk) in chunks.iter().enumerate() {
                    prop_assert_eq!(chunk.chunk_index, i);
                    prop_assert!(!chunk.content.trim().is_empty());
                    prop_assert!(chunk.content.chars().count() <= chunk_size);
                }
            }
        }
    }
}
