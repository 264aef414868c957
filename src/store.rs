//! Postgres connection options, schema management, and SQL builders.
//!
//! The SQL lives here as pure builders so the statement shapes stay
//! unit-testable without a database; the binaries own the actual round
//! trips.

use anyhow::{Context, Result};
use clap::Args;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, Config, NoTls};

/// Database connection flags shared by every binary that touches Postgres.
#[derive(Args, Debug, Clone)]
pub struct DbOptions {
    /// Postgres host
    #[arg(long, env = "BINDERY_DB_HOST", default_value = "localhost")]
    pub db_host: String,

    /// Postgres port
    #[arg(long, env = "BINDERY_DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    /// Database name
    #[arg(long, env = "BINDERY_DB_NAME", default_value = "bindery")]
    pub db_name: String,

    /// Database user
    #[arg(long, env = "BINDERY_DB_USER", default_value = "postgres")]
    pub db_user: String,

    /// Database password
    #[arg(long, env = "BINDERY_DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub db_password: String,

    /// SSL mode: disable, prefer, or require
    #[arg(long, env = "BINDERY_DB_SSLMODE", default_value = "prefer")]
    pub db_sslmode: String,
}

impl DbOptions {
    /// Assembles the discrete flags into a `tokio_postgres` config.
    pub fn client_config(&self) -> Result<Config> {
        let mut config = Config::new();
        config
            .host(&self.db_host)
            .port(self.db_port)
            .dbname(&self.db_name)
            .user(&self.db_user)
            .ssl_mode(parse_sslmode(&self.db_sslmode)?);
        if !self.db_password.is_empty() {
            config.password(&self.db_password);
        }
        Ok(config)
    }

    /// Connects and parks the connection task on the runtime.
    pub async fn connect(&self) -> Result<Client> {
        let config = self.client_config()?;
        let (client, connection) = config.connect(NoTls).await.with_context(|| {
            format!(
                "failed to connect to Postgres at {}:{}/{}",
                self.db_host, self.db_port, self.db_name
            )
        })?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                eprintln!("postgres connection error: {err}");
            }
        });
        Ok(client)
    }
}

fn parse_sslmode(input: &str) -> Result<SslMode> {
    match input.trim().to_ascii_lowercase().as_str() {
        "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" => Ok(SslMode::Require),
        other => anyhow::bail!("unsupported sslmode {other:?} (expected disable/prefer/require)"),
    }
}

/// Idempotently creates the extension and both tables.
pub async fn ensure_schema(client: &Client) -> Result<()> {
    client
        .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
        .await
        .context("failed to ensure pgvector extension")?;
    client
        .execute(BOOKS_DDL, &[])
        .await
        .context("failed to create books table")?;
    client
        .execute(CHUNKS_DDL, &[])
        .await
        .context("failed to create chunks table")?;
    Ok(())
}

/// `books` table: one row per ingested book slug.
pub const BOOKS_DDL: &str = "CREATE TABLE IF NOT EXISTS books (
    book_slug TEXT PRIMARY KEY,
    title TEXT,
    author TEXT,
    language TEXT,
    publisher TEXT,
    isbn TEXT,
    source_epub_path TEXT,
    extracted_at BIGINT
)";

/// `chunks` table: one row per chunk; embedding columns filled in later.
pub const CHUNKS_DDL: &str = "CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT PRIMARY KEY,
    book_slug TEXT NOT NULL,
    chapter_order BIGINT NOT NULL,
    chapter_id TEXT,
    chapter_title TEXT,
    chapter_file TEXT,
    chapter_href TEXT,
    chunk_index BIGINT NOT NULL,
    chunk_strategy TEXT NOT NULL,
    approx_tokens BIGINT NOT NULL,
    max_tokens BIGINT NOT NULL,
    overlap_tokens BIGINT NOT NULL,
    start_paragraph BIGINT NOT NULL,
    end_paragraph_exclusive BIGINT NOT NULL,
    text_sha256 TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding VECTOR,
    embedding_model TEXT,
    embedding_created_at TIMESTAMPTZ
)";

/// Upsert for one book row; latest write wins on conflict.
pub fn book_upsert_sql() -> &'static str {
    "INSERT INTO books \
        (book_slug, title, author, language, publisher, isbn, source_epub_path, extracted_at) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
        ON CONFLICT (book_slug) DO UPDATE SET \
            title = EXCLUDED.title, \
            author = EXCLUDED.author, \
            language = EXCLUDED.language, \
            publisher = EXCLUDED.publisher, \
            isbn = EXCLUDED.isbn, \
            source_epub_path = EXCLUDED.source_epub_path, \
            extracted_at = EXCLUDED.extracted_at"
}

/// Upsert for one chunk row. Embedding columns are deliberately untouched
/// so re-ingesting chunk files never wipes vectors already computed.
pub fn chunk_upsert_sql() -> &'static str {
    "INSERT INTO chunks \
        (chunk_id, book_slug, chapter_order, chapter_id, chapter_title, chapter_file, \
         chapter_href, chunk_index, chunk_strategy, approx_tokens, max_tokens, overlap_tokens, \
         start_paragraph, end_paragraph_exclusive, text_sha256, text) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
        ON CONFLICT (chunk_id) DO UPDATE SET \
            book_slug = EXCLUDED.book_slug, \
            chapter_order = EXCLUDED.chapter_order, \
            chapter_id = EXCLUDED.chapter_id, \
            chapter_title = EXCLUDED.chapter_title, \
            chapter_file = EXCLUDED.chapter_file, \
            chapter_href = EXCLUDED.chapter_href, \
            chunk_index = EXCLUDED.chunk_index, \
            chunk_strategy = EXCLUDED.chunk_strategy, \
            approx_tokens = EXCLUDED.approx_tokens, \
            max_tokens = EXCLUDED.max_tokens, \
            overlap_tokens = EXCLUDED.overlap_tokens, \
            start_paragraph = EXCLUDED.start_paragraph, \
            end_paragraph_exclusive = EXCLUDED.end_paragraph_exclusive, \
            text_sha256 = EXCLUDED.text_sha256, \
            text = EXCLUDED.text"
}

/// Stores one embedding by chunk id. The vector arrives as the bracketed
/// literal form and is cast server-side.
pub fn embedding_update_sql() -> &'static str {
    "UPDATE chunks SET \
        embedding = $2::vector, \
        embedding_model = $3, \
        embedding_created_at = now() \
        WHERE chunk_id = $1"
}

/// Selects chunks still missing a vector, oldest ids first so reruns after
/// a partial failure pick up deterministically.
pub fn pending_chunks_sql(filter: Option<&str>, limit: Option<u64>) -> String {
    let mut sql = String::from("SELECT chunk_id, text FROM chunks WHERE embedding IS NULL");
    if let Some(fragment) = filter {
        let fragment = fragment.trim();
        if !fragment.is_empty() {
            sql.push_str(" AND (");
            sql.push_str(fragment);
            sql.push(')');
        }
    }
    sql.push_str(" ORDER BY chunk_id");
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upserts_target_primary_keys() {
        assert!(book_upsert_sql().contains("ON CONFLICT (book_slug) DO UPDATE"));
        assert!(chunk_upsert_sql().contains("ON CONFLICT (chunk_id) DO UPDATE"));
        assert!(chunk_upsert_sql().contains("$16"));
        assert!(!chunk_upsert_sql().contains("embedding"));
    }

    #[test]
    fn pending_query_composes_filter_and_limit() {
        assert_eq!(
            pending_chunks_sql(None, None),
            "SELECT chunk_id, text FROM chunks WHERE embedding IS NULL ORDER BY chunk_id"
        );
        let filtered = pending_chunks_sql(Some("book_slug = 'moby-dick'"), Some(50));
        assert!(filtered.contains("AND (book_slug = 'moby-dick')"));
        assert!(filtered.ends_with("LIMIT 50"));
        let blank = pending_chunks_sql(Some("   "), None);
        assert!(!blank.contains("AND"));
    }

    #[test]
    fn sslmode_parsing_accepts_known_modes_only() {
        assert!(parse_sslmode("disable").is_ok());
        assert!(parse_sslmode(" Prefer ").is_ok());
        assert!(parse_sslmode("require").is_ok());
        assert!(parse_sslmode("verify-full").is_err());
    }

    #[test]
    fn db_options_build_a_config() {
        let options = DbOptions {
            db_host: "db.internal".to_string(),
            db_port: 5433,
            db_name: "library".to_string(),
            db_user: "ingest".to_string(),
            db_password: "secret".to_string(),
            db_sslmode: "disable".to_string(),
        };
        assert!(options.client_config().is_ok());
    }
}
