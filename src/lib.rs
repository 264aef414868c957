#![warn(missing_docs)]
//! Core library for the bindery book-to-retrieval-chunks pipeline.

pub mod book;
pub mod chunkfile;
pub mod embedder;
pub mod record;
pub mod runlog;
pub mod store;
pub mod text;
pub mod window;

pub use book::{load_book, BookSource, ChapterText};
pub use chunkfile::{discover_chunk_files, parse_line, ParsedLine, SkipReason};
pub use record::{assemble_chapter, BookInfo, ChapterInfo, ChunkRecord};
pub use runlog::RunSummary;
pub use store::DbOptions;
pub use window::{build_windows, ChunkingConfig, Window};
