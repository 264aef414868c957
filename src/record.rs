//! Chunk record identity, hashing, and provenance assembly.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::window::{ChunkingConfig, Window};

/// Strategy tag stamped on every chunk produced by the window builder.
pub const CHUNK_STRATEGY: &str = "paragraph-overlap";

/// Book-level provenance duplicated onto every chunk for denormalized
/// retrieval. Values are identical across all chunks of one book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookInfo {
    /// Stable identifier the chunk ids derive from.
    pub slug: String,
    /// Dublin Core title, when the container declares one.
    pub title: Option<String>,
    /// Dublin Core creator.
    pub author: Option<String>,
    /// Dublin Core language.
    pub language: Option<String>,
    /// Dublin Core publisher.
    pub publisher: Option<String>,
    /// Dublin Core identifier (usually an ISBN).
    pub isbn: Option<String>,
    /// Filesystem path of the source container.
    pub source_epub_path: String,
    /// Epoch milliseconds when extraction ran.
    pub extracted_at_epoch_ms: u64,
}

/// Chapter-level provenance for one spine document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// Zero-based position in the book's spine.
    pub order: usize,
    /// Spine idref, when the container exposes one.
    pub id: Option<String>,
    /// Resolved chapter title.
    pub title: String,
    /// Container-relative file the chapter text came from.
    pub file: Option<String>,
    /// Table-of-contents href, when one matched the chapter file.
    pub href: Option<String>,
}

/// Windowing metadata describing how one chunk was cut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Sequential index across the whole book, in chapter-then-window order.
    pub index: usize,
    /// Chunking strategy tag ([`CHUNK_STRATEGY`]).
    pub strategy: String,
    /// Token estimate of the chunk text.
    pub approx_tokens: usize,
    /// Token budget the run was configured with.
    pub max_tokens: usize,
    /// Overlap target the run was configured with.
    pub overlap_tokens: usize,
    /// Index of the first paragraph in the source window.
    pub start_paragraph: usize,
    /// Exclusive index one past the last paragraph.
    pub end_paragraph_exclusive: usize,
    /// Lowercase hex SHA-256 of the trimmed chunk text.
    pub text_sha256: String,
}

/// Self-describing persisted unit: one embedding input plus its identity
/// and provenance, serialized as one JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Globally unique id derived from the book slug and chunk index.
    pub chunk_id: String,
    /// Book provenance.
    pub book: BookInfo,
    /// Chapter provenance.
    pub chapter: ChapterInfo,
    /// Chunk metadata.
    pub chunk: ChunkInfo,
    /// The chunk's literal (trimmed) text.
    pub text: String,
}

/// Deterministic chunk identity: slug plus the zero-padded sequential index.
pub fn chunk_id(slug: &str, index: usize) -> String {
    format!("{slug}-{index:04}")
}

/// Lowercase hex SHA-256 digest of `text`.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Prepends a synthesized chapter-title pseudo-paragraph for retrieval
/// context. A first paragraph already equal to the heading literal is left
/// alone so the title never appears twice, and an empty chapter stays
/// empty rather than gaining a title-only chunk.
pub fn inject_heading(mut paragraphs: Vec<String>, title: &str) -> Vec<String> {
    let heading = title.trim();
    if heading.is_empty() || paragraphs.is_empty() {
        return paragraphs;
    }
    if paragraphs.first().map(String::as_str) == Some(heading) {
        return paragraphs;
    }
    paragraphs.insert(0, heading.to_string());
    paragraphs
}

/// Turns one chapter's windows into records, assigning indices from
/// `first_index` onward.
///
/// Returns the records together with the next free index, so callers thread
/// the book-wide count through chapter processing explicitly instead of
/// sharing a mutable counter. Windows whose trimmed text is empty are
/// dropped without consuming an index.
pub fn assemble_chapter(
    book: &BookInfo,
    chapter: &ChapterInfo,
    windows: &[Window],
    config: &ChunkingConfig,
    first_index: usize,
) -> (Vec<ChunkRecord>, usize) {
    let mut records = Vec::with_capacity(windows.len());
    let mut index = first_index;
    for window in windows {
        let text = window.text.trim();
        if text.is_empty() {
            continue;
        }
        records.push(ChunkRecord {
            chunk_id: chunk_id(&book.slug, index),
            book: book.clone(),
            chapter: chapter.clone(),
            chunk: ChunkInfo {
                index,
                strategy: CHUNK_STRATEGY.to_string(),
                approx_tokens: window.approx_tokens,
                max_tokens: config.max_tokens,
                overlap_tokens: config.overlap_tokens,
                start_paragraph: window.start,
                end_paragraph_exclusive: window.end_exclusive,
                text_sha256: sha256_hex(text),
            },
            text: text.to_string(),
        });
        index += 1;
    }
    (records, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_book() -> BookInfo {
        BookInfo {
            slug: "test-book".to_string(),
            title: Some("Test Book".to_string()),
            author: None,
            language: Some("en".to_string()),
            publisher: None,
            isbn: None,
            source_epub_path: "books/test.epub".to_string(),
            extracted_at_epoch_ms: 1_700_000_000_000,
        }
    }

    fn test_chapter(order: usize) -> ChapterInfo {
        ChapterInfo {
            order,
            id: Some(format!("ch{order}")),
            title: format!("Chapter {}", order + 1),
            file: Some(format!("OEBPS/ch{order}.xhtml")),
            href: None,
        }
    }

    fn window(start: usize, end: usize, text: &str) -> Window {
        Window {
            start,
            end_exclusive: end,
            text: text.to_string(),
            approx_tokens: crate::text::estimate_tokens(text),
        }
    }

    #[test]
    fn hash_is_deterministic_and_content_sensitive() {
        let digest = sha256_hex("the quick brown fox");
        assert_eq!(digest, sha256_hex("the quick brown fox"));
        assert_ne!(digest, sha256_hex("the quick brown fix"));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn chunk_ids_are_zero_padded() {
        assert_eq!(chunk_id("moby-dick", 0), "moby-dick-0000");
        assert_eq!(chunk_id("moby-dick", 137), "moby-dick-0137");
        assert_eq!(chunk_id("moby-dick", 12345), "moby-dick-12345");
    }

    #[test]
    fn index_threads_across_chapters() {
        let book = test_book();
        let config = ChunkingConfig::default();
        let first = [window(0, 1, "alpha beta"), window(1, 2, "gamma delta")];
        let second = [window(0, 1, "epsilon zeta")];

        let (records_a, next) = assemble_chapter(&book, &test_chapter(0), &first, &config, 0);
        let (records_b, next) = assemble_chapter(&book, &test_chapter(1), &second, &config, next);

        assert_eq!(records_a.len(), 2);
        assert_eq!(records_b.len(), 1);
        assert_eq!(next, 3);
        assert_eq!(records_a[1].chunk.index, 1);
        assert_eq!(records_b[0].chunk.index, 2);
        assert_eq!(records_b[0].chunk_id, "test-book-0002");
    }

    #[test]
    fn blank_windows_are_dropped_without_consuming_indices() {
        let book = test_book();
        let config = ChunkingConfig::default();
        let windows = [window(0, 1, "   "), window(1, 2, "real content")];
        let (records, next) = assemble_chapter(&book, &test_chapter(0), &windows, &config, 0);

        assert_eq!(records.len(), 1);
        assert_eq!(next, 1);
        assert_eq!(records[0].chunk.index, 0);
        assert_eq!(records[0].text, "real content");
    }

    #[test]
    fn heading_injection_skips_duplicates() {
        let paragraphs = vec!["Chapter One".to_string(), "body".to_string()];
        let unchanged = inject_heading(paragraphs.clone(), "Chapter One");
        assert_eq!(unchanged, paragraphs);

        let injected = inject_heading(vec!["body".to_string()], "Chapter One");
        assert_eq!(injected, vec!["Chapter One", "body"]);

        let blank_title = inject_heading(vec!["body".to_string()], "   ");
        assert_eq!(blank_title, vec!["body"]);

        let empty_chapter = inject_heading(Vec::new(), "Chapter One");
        assert!(empty_chapter.is_empty());
    }

    #[test]
    fn records_round_trip_through_json() {
        let book = test_book();
        let config = ChunkingConfig::default();
        let windows = [window(0, 2, "alpha beta\n\ngamma")];
        let (records, _) = assemble_chapter(&book, &test_chapter(0), &windows, &config, 0);

        let line = serde_json::to_string(&records[0]).expect("serialize");
        let back: ChunkRecord = serde_json::from_str(&line).expect("deserialize");
        assert_eq!(back.chunk_id, records[0].chunk_id);
        assert_eq!(back.chunk.text_sha256, records[0].chunk.text_sha256);
        assert_eq!(back.text, "alpha beta\n\ngamma");
    }
}
