use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use bindery::book::load_book;
use bindery::chunkfile::CANONICAL_FILE_NAME;
use bindery::record::{assemble_chapter, inject_heading};
use bindery::runlog::RunSummary;
use bindery::text::split_paragraphs;
use bindery::window::{build_windows, ChunkingConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "bindery-chunker",
    about = "Chunk an EPUB into retrieval-ready JSONL records"
)]
struct ChunkerCli {
    /// Path to the source EPUB
    #[arg(long, env = "BINDERY_EPUB")]
    epub: PathBuf,

    /// Book slug; derived from the file name when omitted
    #[arg(long, env = "BINDERY_SLUG")]
    slug: Option<String>,

    /// Directory receiving one working directory per book
    #[arg(long, env = "BINDERY_OUT_DIR", default_value = "data")]
    out_dir: PathBuf,

    /// Approximate token budget per chunk
    #[arg(long, env = "BINDERY_MAX_TOKENS", default_value_t = 256)]
    max_tokens: usize,

    /// Approximate token overlap between adjacent chunks
    #[arg(long, env = "BINDERY_OVERLAP_TOKENS", default_value_t = 48)]
    overlap_tokens: usize,

    /// Prepend each chapter title as a pseudo-paragraph before windowing
    #[arg(
        long,
        env = "BINDERY_INJECT_HEADING",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    inject_chapter_heading: bool,

    /// Run-log file receiving one summary line per invocation
    #[arg(long, env = "BINDERY_RUN_LOG", default_value = "logs/chunker_runs.jsonl")]
    run_log: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = ChunkerCli::parse();

    // Budget validation happens before the container is even opened.
    let config = ChunkingConfig {
        max_tokens: cli.max_tokens,
        overlap_tokens: cli.overlap_tokens,
    };
    config.validate()?;

    let source = load_book(&cli.epub, cli.slug.as_deref())?;
    let book_dir = cli.out_dir.join(&source.book.slug);
    fs::create_dir_all(&book_dir)
        .with_context(|| format!("failed to create {}", book_dir.display()))?;
    let output_path = book_dir.join(CANONICAL_FILE_NAME);
    let output = File::create(&output_path)
        .with_context(|| format!("failed to create {}", output_path.display()))?;
    let mut writer = BufWriter::new(output);

    let mut summary = RunSummary::start("chunker");
    for _ in 0..source.skipped_chapters {
        summary.processed += 1;
        summary.failed += 1;
        summary.record_skip("missing_chapter");
    }

    let mut next_index = 0usize;
    let mut total_chunks = 0usize;
    for chapter in &source.chapters {
        summary.processed += 1;
        let mut paragraphs = split_paragraphs(&chapter.text);
        if cli.inject_chapter_heading {
            paragraphs = inject_heading(paragraphs, &chapter.info.title);
        }
        let windows = build_windows(&paragraphs, &config);
        let (records, next) =
            assemble_chapter(&source.book, &chapter.info, &windows, &config, next_index);
        next_index = next;

        for record in &records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        if records.is_empty() {
            summary.record_skip("empty_chapter");
        } else {
            summary.keep_sample(&records[0]);
        }
        summary.succeeded += 1;
        total_chunks += records.len();
        eprintln!(
            "chapter {} ({}): {} paragraphs, {} chunks...",
            chapter.info.order,
            chapter.info.title,
            paragraphs.len(),
            records.len()
        );
    }
    writer.flush()?;

    println!(
        "wrote {} chunk{} from {} chapter{} to {}",
        total_chunks,
        if total_chunks == 1 { "" } else { "s" },
        source.chapters.len(),
        if source.chapters.len() == 1 { "" } else { "s" },
        output_path.display()
    );

    summary.finish_and_append(&cli.run_log)?;
    Ok(())
}
