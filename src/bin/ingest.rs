use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bindery::chunkfile::{discover_chunk_files, parse_line, ParsedLine};
use bindery::record::ChunkRecord;
use bindery::runlog::RunSummary;
use bindery::store::{self, DbOptions};
use clap::Parser;
use tokio_postgres::Client;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "bindery-ingest",
    about = "Load chunk JSONL files into Postgres with idempotent upserts"
)]
struct IngestCli {
    /// Root directory (or single file) holding chunk JSONL files
    #[arg(long, env = "BINDERY_CHUNKS_ROOT", default_value = "data")]
    root: PathBuf,

    #[command(flatten)]
    db: DbOptions,

    /// Rows buffered per upsert transaction
    #[arg(long, env = "BINDERY_BATCH_SIZE", default_value_t = 128)]
    batch_size: usize,

    /// Create the extension and tables before ingesting
    #[arg(long, env = "BINDERY_PREPARE_SCHEMA", default_value_t = true)]
    prepare_schema: bool,

    /// Parse and count records without touching the database
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Run-log file receiving one summary line per invocation
    #[arg(long, env = "BINDERY_RUN_LOG", default_value = "logs/ingest_runs.jsonl")]
    run_log: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = IngestCli::parse();
    let batch_size = cli.batch_size.max(1);

    let files = discover_chunk_files(&cli.root)?;
    if files.is_empty() {
        println!("no chunk files under {}; nothing to do.", cli.root.display());
        return Ok(());
    }

    let mut client = if cli.dry_run {
        println!("dry run enabled; parsing only, no database writes");
        None
    } else {
        let client = cli.db.connect().await?;
        if cli.prepare_schema {
            store::ensure_schema(&client).await?;
        }
        Some(client)
    };

    let mut summary = RunSummary::start("ingest");
    let mut seen_slugs: HashSet<String> = HashSet::new();
    let mut batch: Vec<ChunkRecord> = Vec::with_capacity(batch_size);
    let mut upserted = 0usize;

    for file in &files {
        eprintln!("ingesting {}...", file.display());
        let reader = BufReader::new(
            File::open(file).with_context(|| format!("failed to open {}", file.display()))?,
        );
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| {
                format!("failed to read line {} of {}", line_no + 1, file.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            summary.processed += 1;
            match parse_line(&line) {
                ParsedLine::Skipped(reason) => summary.record_skip(reason.label()),
                ParsedLine::Record(record) => {
                    if seen_slugs.insert(record.book.slug.clone()) {
                        if let Some(client) = client.as_ref() {
                            if let Err(err) = upsert_book(client, &record).await {
                                eprintln!("book upsert for {} failed: {err:#}", record.book.slug);
                            }
                        }
                    }
                    summary.keep_sample(&record);
                    batch.push(record);
                    if batch.len() >= batch_size {
                        flush_batch(client.as_mut(), &batch, file, &mut summary, &mut upserted)
                            .await;
                        batch.clear();
                    }
                }
            }
        }
        // Flush at the file boundary so a failed batch names the right source.
        flush_batch(client.as_mut(), &batch, file, &mut summary, &mut upserted).await;
        batch.clear();
    }

    if upserted > 0 {
        println!();
    }
    println!(
        "ingest complete: {} row{} upserted, {} failed, {} skipped from {} file{}.",
        upserted,
        if upserted == 1 { "" } else { "s" },
        summary.failed,
        summary.skipped.values().sum::<usize>(),
        files.len(),
        if files.len() == 1 { "" } else { "s" },
    );
    summary.finish_and_append(&cli.run_log)?;
    Ok(())
}

async fn flush_batch(
    client: Option<&mut Client>,
    batch: &[ChunkRecord],
    source: &Path,
    summary: &mut RunSummary,
    upserted: &mut usize,
) {
    if batch.is_empty() {
        return;
    }
    let Some(client) = client else {
        // Dry run: the batch parsed cleanly, which is all we can verify.
        summary.succeeded += batch.len();
        return;
    };
    match upsert_chunk_batch(client, batch).await {
        Ok(()) => {
            summary.succeeded += batch.len();
            *upserted += batch.len();
            render_progress(*upserted);
        }
        Err(err) => {
            summary.failed += batch.len();
            eprintln!(
                "batch of {} chunk{} from {} failed, continuing: {err:#}",
                batch.len(),
                if batch.len() == 1 { "" } else { "s" },
                source.display()
            );
        }
    }
}

async fn upsert_book(client: &Client, record: &ChunkRecord) -> Result<()> {
    let book = &record.book;
    let extracted_at = as_i64(book.extracted_at_epoch_ms, "extracted_at")?;
    client
        .execute(
            store::book_upsert_sql(),
            &[
                &book.slug,
                &book.title,
                &book.author,
                &book.language,
                &book.publisher,
                &book.isbn,
                &book.source_epub_path,
                &extracted_at,
            ],
        )
        .await
        .with_context(|| format!("failed to upsert book {}", book.slug))?;
    Ok(())
}

async fn upsert_chunk_batch(client: &mut Client, batch: &[ChunkRecord]) -> Result<()> {
    let transaction = client.transaction().await?;
    let statement = transaction.prepare(store::chunk_upsert_sql()).await?;
    for record in batch {
        let chunk = &record.chunk;
        let chapter = &record.chapter;
        let chapter_order = as_i64(chapter.order, "chapter_order")?;
        let chunk_index = as_i64(chunk.index, "chunk_index")?;
        let approx_tokens = as_i64(chunk.approx_tokens, "approx_tokens")?;
        let max_tokens = as_i64(chunk.max_tokens, "max_tokens")?;
        let overlap_tokens = as_i64(chunk.overlap_tokens, "overlap_tokens")?;
        let start_paragraph = as_i64(chunk.start_paragraph, "start_paragraph")?;
        let end_paragraph = as_i64(chunk.end_paragraph_exclusive, "end_paragraph_exclusive")?;
        transaction
            .execute(
                &statement,
                &[
                    &record.chunk_id,
                    &record.book.slug,
                    &chapter_order,
                    &chapter.id,
                    &chapter.title,
                    &chapter.file,
                    &chapter.href,
                    &chunk_index,
                    &chunk.strategy,
                    &approx_tokens,
                    &max_tokens,
                    &overlap_tokens,
                    &start_paragraph,
                    &end_paragraph,
                    &chunk.text_sha256,
                    &record.text,
                ],
            )
            .await
            .with_context(|| format!("failed to upsert chunk {}", record.chunk_id))?;
    }
    transaction.commit().await?;
    Ok(())
}

fn render_progress(upserted: usize) {
    let plural = if upserted == 1 { "" } else { "s" };
    print!("\rupserted {} chunk{}...", upserted, plural);
    let _ = io::stdout().flush();
}

fn as_i64<T>(value: T, field: &str) -> Result<i64>
where
    i64: TryFrom<T>,
    T: Copy + std::fmt::Display,
{
    i64::try_from(value).map_err(|_| anyhow!("{} value {} exceeds i64 range", field, value))
}
