//! Chunk-file discovery and lenient line parsing for ingestion.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::record::ChunkRecord;

/// File name the chunker writes; discovery orders these ahead of strays.
pub const CANONICAL_FILE_NAME: &str = "chunks.jsonl";

/// Why a chunk-file line was skipped instead of ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The line was not valid JSON for a chunk record.
    Malformed,
    /// The record parsed but its chunk id, book slug, or text was blank.
    MissingIdentity,
}

impl SkipReason {
    /// Stable label used as a counter key in run summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::MissingIdentity => "missing_identity",
        }
    }
}

/// Outcome of parsing one non-blank chunk-file line.
///
/// Skips never abort the stream; callers tally the reason and move on to
/// the next line.
#[derive(Debug)]
pub enum ParsedLine {
    /// A complete record ready for upsert.
    Record(ChunkRecord),
    /// A line dropped for the given reason.
    Skipped(SkipReason),
}

/// Parses one non-blank line into a record or a counted skip.
pub fn parse_line(line: &str) -> ParsedLine {
    let record: ChunkRecord = match serde_json::from_str(line) {
        Ok(record) => record,
        Err(_) => return ParsedLine::Skipped(SkipReason::Malformed),
    };
    if record.chunk_id.trim().is_empty()
        || record.book.slug.trim().is_empty()
        || record.text.trim().is_empty()
    {
        return ParsedLine::Skipped(SkipReason::MissingIdentity);
    }
    ParsedLine::Record(record)
}

/// Recursively collects `.jsonl` files under `root`.
///
/// Files named [`CANONICAL_FILE_NAME`] sort first, then everything else in
/// lexical path order, so re-runs visit files in a stable sequence. A
/// `root` that is itself a file is returned as the only entry.
pub fn discover_chunk_files(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut files = Vec::new();
    walk(root, &mut files)?;
    files.sort_by_key(|path| {
        let canonical = path
            .file_name()
            .map_or(false, |name| name == CANONICAL_FILE_NAME);
        (!canonical, path.clone())
    });
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("jsonl") {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    use crate::record::{assemble_chapter, BookInfo, ChapterInfo};
    use crate::window::{ChunkingConfig, Window};

    fn sample_record_line() -> String {
        let book = BookInfo {
            slug: "sample".to_string(),
            title: None,
            author: None,
            language: None,
            publisher: None,
            isbn: None,
            source_epub_path: "sample.epub".to_string(),
            extracted_at_epoch_ms: 0,
        };
        let chapter = ChapterInfo {
            order: 0,
            id: None,
            title: "Chapter 1".to_string(),
            file: None,
            href: None,
        };
        let windows = [Window {
            start: 0,
            end_exclusive: 1,
            text: "hello world".to_string(),
            approx_tokens: 2,
        }];
        let (records, _) =
            assemble_chapter(&book, &chapter, &windows, &ChunkingConfig::default(), 0);
        serde_json::to_string(&records[0]).expect("serialize")
    }

    #[test]
    fn parses_complete_records() {
        match parse_line(&sample_record_line()) {
            ParsedLine::Record(record) => {
                assert_eq!(record.chunk_id, "sample-0000");
                assert_eq!(record.text, "hello world");
            }
            ParsedLine::Skipped(reason) => panic!("unexpected skip: {reason:?}"),
        }
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert!(matches!(
            parse_line("{not json"),
            ParsedLine::Skipped(SkipReason::Malformed)
        ));
        assert!(matches!(
            parse_line("{\"chunk_id\": \"x\"}"),
            ParsedLine::Skipped(SkipReason::Malformed)
        ));
    }

    #[test]
    fn blank_identity_fields_are_skipped() {
        let line = sample_record_line().replace("\"hello world\"", "\"   \"");
        assert!(matches!(
            parse_line(&line),
            ParsedLine::Skipped(SkipReason::MissingIdentity)
        ));
    }

    #[test]
    fn discovery_orders_canonical_files_first() {
        let root = tempfile::tempdir().expect("tempdir");
        let nested = root.path().join("book-a");
        fs::create_dir_all(&nested).expect("mkdir");
        for path in [
            root.path().join("zz-extra.jsonl"),
            nested.join(CANONICAL_FILE_NAME),
            nested.join("aa-notes.jsonl"),
            nested.join("ignored.txt"),
        ] {
            File::create(&path)
                .and_then(|mut file| file.write_all(b""))
                .expect("create");
        }

        let files = discover_chunk_files(root.path()).expect("discover");
        let names: Vec<_> = files
            .iter()
            .map(|path| {
                path.strip_prefix(root.path())
                    .expect("prefix")
                    .display()
                    .to_string()
            })
            .collect();
        assert_eq!(
            names,
            vec![
                format!("book-a/{CANONICAL_FILE_NAME}"),
                "book-a/aa-notes.jsonl".to_string(),
                "zz-extra.jsonl".to_string(),
            ]
        );
    }

    #[test]
    fn discovery_accepts_a_single_file_root() {
        let root = tempfile::tempdir().expect("tempdir");
        let file = root.path().join("chunks.jsonl");
        File::create(&file).expect("create");
        let files = discover_chunk_files(&file).expect("discover");
        assert_eq!(files, vec![file]);
    }
}
