use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables used by the queue and the built-in SQLite stores.
/// Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Durable job queue: one row per uploaded document.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            kb_id TEXT NOT NULL,
            location TEXT NOT NULL,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            source_url TEXT,
            chunk_size INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            content_length INTEGER NOT NULL DEFAULT -1,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            queued_at INTEGER NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_claim
         ON ingestion_jobs(status, deleted, queued_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            kb_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            latest_insert_time INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Parent-chunk text persisted during vector indexing.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parent_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            kb_id TEXT NOT NULL,
            text TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_parent_chunks_document
         ON parent_chunks(document_id)",
    )
    .execute(pool)
    .await?;

    // Built-in vector store: one embedding blob per chunk.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            kb_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_chunks_document
         ON vector_chunks(document_id)",
    )
    .execute(pool)
    .await?;

    // Built-in keyword store: FTS5 virtual table.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='keyword_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE keyword_fts USING fts5(
                entry_id UNINDEXED,
                document_id UNINDEXED,
                kb_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}
