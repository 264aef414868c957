//! EPUB container loading and chapter text extraction.
//!
//! This module is deliberately thin plumbing: it opens a container, walks
//! the spine, flattens each chapter's markup to plain text, and resolves
//! chapter titles from the table of contents. Everything downstream works
//! on the returned strings and never touches the container again.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use epub::doc::{EpubDoc, NavPoint};
use tracing::{debug, warn};

use crate::record::{BookInfo, ChapterInfo};

// Wide enough that html2text never inserts hard wraps of its own.
const TEXT_WIDTH: usize = 10_000;

/// One spine document flattened to plain text, with its provenance.
#[derive(Debug, Clone)]
pub struct ChapterText {
    /// Chapter provenance carried onto every chunk.
    pub info: ChapterInfo,
    /// Extracted chapter text. May be empty for image-only documents.
    pub text: String,
}

/// Extracted book: metadata plus chapter texts in spine order.
#[derive(Debug, Clone)]
pub struct BookSource {
    /// Book provenance carried onto every chunk.
    pub book: BookInfo,
    /// Readable chapters in spine order. Unreadable ones are skipped.
    pub chapters: Vec<ChapterText>,
    /// Spine documents whose content could not be read.
    pub skipped_chapters: usize,
}

/// Opens an EPUB and extracts metadata plus per-chapter plain text.
///
/// A chapter whose content cannot be read is logged and skipped; partial
/// extraction is preferred over failing the whole book. Only a container
/// that cannot be opened at all is an error.
pub fn load_book(path: &Path, slug: Option<&str>) -> Result<BookSource> {
    let mut doc = EpubDoc::new(path)
        .with_context(|| format!("failed to open EPUB at {}", path.display()))?;

    let slug = match slug {
        Some(slug) => slug.to_string(),
        None => slugify(
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("book"),
        ),
    };
    let book = BookInfo {
        slug,
        title: doc.mdata("title").map(|m| m.value.clone()),
        author: doc.mdata("creator").map(|m| m.value.clone()),
        language: doc.mdata("language").map(|m| m.value.clone()),
        publisher: doc.mdata("publisher").map(|m| m.value.clone()),
        isbn: doc.mdata("identifier").map(|m| m.value.clone()),
        source_epub_path: path.display().to_string(),
        extracted_at_epoch_ms: epoch_ms(),
    };

    let toc = flatten_toc(&doc.toc);
    let mut chapters = Vec::new();
    let mut skipped_chapters = 0usize;
    let mut order = 0usize;
    loop {
        let id = doc.get_current_id();
        let file = doc.get_current_path().map(|p| p.display().to_string());
        match doc.get_current_str() {
            Some((markup, _mime)) => {
                let text = chapter_plain_text(&markup, order);
                let toc_match = file.as_deref().and_then(|file| toc_lookup(&toc, file));
                let title = toc_match
                    .map(|(label, _)| label.to_string())
                    .unwrap_or_else(|| format!("Chapter {}", order + 1));
                let href = toc_match.map(|(_, href)| href.to_string());
                debug!(order, chars = text.len(), %title, "extracted chapter");
                chapters.push(ChapterText {
                    info: ChapterInfo {
                        order,
                        id,
                        title,
                        file,
                        href,
                    },
                    text,
                });
            }
            None => {
                skipped_chapters += 1;
                warn!(
                    order,
                    file = file.as_deref().unwrap_or("<unknown>"),
                    "chapter content missing, skipping"
                );
            }
        }
        order += 1;
        if !doc.go_next() {
            break;
        }
    }

    Ok(BookSource {
        book,
        chapters,
        skipped_chapters,
    })
}

fn chapter_plain_text(markup: &str, order: usize) -> String {
    match html2text::from_read(markup.as_bytes(), TEXT_WIDTH) {
        Ok(plain) => plain,
        Err(err) => {
            warn!(order, "html2text failed, keeping raw markup: {err}");
            markup.to_string()
        }
    }
}

/// Lowercases and dashes a file stem into a usable book slug.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(ch.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "book".to_string()
    } else {
        slug
    }
}

/// Epoch milliseconds, clamped to zero on clock errors.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

fn flatten_toc(points: &[NavPoint]) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    collect_toc(points, &mut entries);
    entries
}

fn collect_toc(points: &[NavPoint], entries: &mut Vec<(String, String)>) {
    for point in points {
        entries.push((point.label.clone(), point.content.display().to_string()));
        collect_toc(&point.children, entries);
    }
}

/// Finds the first toc entry whose target (fragment stripped) names `file`.
fn toc_lookup<'a>(entries: &'a [(String, String)], file: &str) -> Option<(&'a str, &'a str)> {
    entries.iter().find_map(|(label, href)| {
        let target = href.split('#').next().unwrap_or(href);
        if target.is_empty() {
            return None;
        }
        (target == file || target.ends_with(file) || file.ends_with(target))
            .then_some((label.as_str(), href.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation_runs() {
        assert_eq!(slugify("Moby Dick; Or, The Whale"), "moby-dick-or-the-whale");
        assert_eq!(slugify("  --- "), "book");
        assert_eq!(slugify("War_and_Peace (1869)"), "war-and-peace-1869");
    }

    #[test]
    fn toc_lookup_ignores_fragments() {
        let entries = vec![
            ("Preface".to_string(), "OEBPS/pre.xhtml".to_string()),
            ("Chapter 1".to_string(), "OEBPS/ch1.xhtml#start".to_string()),
        ];
        let hit = toc_lookup(&entries, "OEBPS/ch1.xhtml").expect("match");
        assert_eq!(hit.0, "Chapter 1");
        assert_eq!(hit.1, "OEBPS/ch1.xhtml#start");
        assert!(toc_lookup(&entries, "OEBPS/ch2.xhtml").is_none());
    }
}
