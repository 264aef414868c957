use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bindery::embedder::openai::OpenAiEmbedder;
use bindery::embedder::vector_literal;
use bindery::runlog::RunSummary;
use bindery::store::{self, DbOptions};
use clap::Parser;
use serde_json::json;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "bindery-embedder",
    about = "Embed stored chunks via an OpenAI-compatible API"
)]
struct EmbedCli {
    #[command(flatten)]
    db: DbOptions,

    /// API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    /// Embedding model identifier (e.g. text-embedding-3-small)
    #[arg(
        long,
        env = "BINDERY_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    openai_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "BINDERY_OPENAI_DIMENSIONS")]
    openai_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "BINDERY_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "BINDERY_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    openai_timeout_secs: u64,

    /// Number of retries for rate limits or transient errors
    #[arg(long, env = "BINDERY_OPENAI_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Fixed sleep between embedding calls, in milliseconds
    #[arg(long, env = "BINDERY_EMBED_DELAY_MS", default_value_t = 0)]
    delay_ms: u64,

    /// Extra SQL predicate ANDed into the pending-chunk query
    #[arg(long, env = "BINDERY_EMBED_FILTER")]
    filter: Option<String>,

    /// Cap on the number of rows embedded this run
    #[arg(long, env = "BINDERY_EMBED_LIMIT")]
    limit: Option<u64>,

    /// List pending rows without calling the API or updating anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Run-log file receiving one summary line per invocation
    #[arg(long, env = "BINDERY_RUN_LOG", default_value = "logs/embedder_runs.jsonl")]
    run_log: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = EmbedCli::parse();

    let embedder = OpenAiEmbedder::new(
        cli.openai_api_key,
        cli.openai_base_url,
        cli.openai_model,
        cli.openai_dimensions,
        Duration::from_secs(cli.openai_timeout_secs.max(1)),
        cli.max_retries.max(1),
    )?;
    let client = cli.db.connect().await?;

    let pending_sql = store::pending_chunks_sql(cli.filter.as_deref(), cli.limit);
    let rows = client
        .query(&pending_sql, &[])
        .await
        .context("failed to query chunks pending embedding")?;
    eprintln!("{} chunk(s) pending embedding...", rows.len());

    let mut summary = RunSummary::start("embedder");
    if cli.dry_run {
        summary.processed = rows.len();
        println!(
            "dry run enabled; {} chunk(s) would be embedded with {}.",
            rows.len(),
            embedder.model()
        );
        summary.finish_and_append(&cli.run_log)?;
        return Ok(());
    }

    let update = client
        .prepare(store::embedding_update_sql())
        .await
        .context("failed to prepare embedding update")?;
    let delay = Duration::from_millis(cli.delay_ms);

    for (position, row) in rows.iter().enumerate() {
        let chunk_id: &str = row.get(0);
        let text: &str = row.get(1);
        summary.processed += 1;

        match embedder.embed(text).await {
            Ok(vector) => {
                let literal = vector_literal(&vector);
                let stored = client
                    .execute(&update, &[&chunk_id, &literal, &embedder.model()])
                    .await;
                match stored {
                    Ok(_) => {
                        summary.succeeded += 1;
                        summary.keep_sample(&json!({
                            "chunk_id": chunk_id,
                            "embedding_model": embedder.model(),
                            "dimensions": vector.len(),
                        }));
                    }
                    Err(err) => {
                        summary.failed += 1;
                        eprintln!("storing embedding for {chunk_id} failed: {err}");
                    }
                }
            }
            Err(err) => {
                summary.failed += 1;
                eprintln!("embedding {chunk_id} failed: {err:#}");
            }
        }

        if (position + 1) % 25 == 0 {
            eprintln!(
                "embedded {}/{} ({} failed)...",
                summary.succeeded,
                rows.len(),
                summary.failed
            );
        }
        // One call per chunk with a plain fixed pause between calls; callers
        // needing real backpressure must add it upstream.
        if !delay.is_zero() && position + 1 < rows.len() {
            sleep(delay).await;
        }
    }

    println!(
        "embedding complete: {} succeeded, {} failed of {} chunk(s).",
        summary.succeeded,
        summary.failed,
        rows.len()
    );
    summary.finish_and_append(&cli.run_log)?;
    Ok(())
}
