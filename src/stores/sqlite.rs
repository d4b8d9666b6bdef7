//! SQLite-backed store implementations used by the CLI.
//!
//! The vector store keeps one embedding BLOB per chunk in `vector_chunks`
//! and runs brute-force cosine similarity in Rust; the keyword store is an
//! FTS5 virtual table. Both key entries by deterministic ids so replaying
//! a job overwrites rather than duplicates.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::models::DocumentChunk;

use super::{build_parent_chunks, KeywordStore, StoreHit, VectorStore, VectorUpsert};

/// Vector index over `vector_chunks`, embedding via an injected [`Embedder`].
pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(
        &self,
        _owner_id: &str,
        chunks: &[DocumentChunk],
        chunk_size: i64,
    ) -> Result<VectorUpsert> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let id = format!(
                "{}_c{}",
                chunk.metadata.document_id, chunk.metadata.chunk_index
            );
            sqlx::query(
                r#"
                INSERT INTO vector_chunks (id, document_id, kb_id, chunk_index, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&id)
            .bind(&chunk.metadata.document_id)
            .bind(&chunk.metadata.kb_id)
            .bind(chunk.metadata.chunk_index)
            .bind(&chunk.text)
            .bind(vec_to_blob(vector))
            .execute(&self.pool)
            .await?;
        }

        let parent_size = (chunk_size.max(1) as usize).saturating_mul(2);
        Ok(VectorUpsert {
            chunk_count: chunks.len() as i64,
            parent_chunks: build_parent_chunks(chunks, parent_size),
        })
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vector_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        _expr: Option<&str>,
        top_k: i64,
        partition_keys: &[String],
    ) -> Result<Vec<StoreHit>> {
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))?;

        let sql = format!(
            "SELECT document_id, kb_id, chunk_index, text, embedding FROM vector_chunks{}",
            partition_clause("kb_id", partition_keys.len())
        );
        let mut q = sqlx::query(&sql);
        for key in partition_keys {
            q = q.bind(key);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut hits: Vec<StoreHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64;
                let kb_id: String = row.get("kb_id");
                let document_id: String = row.get("document_id");
                let chunk_index: i64 = row.get("chunk_index");
                StoreHit {
                    content: row.get("text"),
                    metadata: serde_json::json!({
                        "kb_id": kb_id,
                        "document_id": document_id,
                        "chunk_index": chunk_index,
                    }),
                    score: Some(similarity),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k as usize);
        Ok(hits)
    }
}

/// Keyword index over the `keyword_fts` FTS5 table.
pub struct SqliteKeywordStore {
    pool: SqlitePool,
}

impl SqliteKeywordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeywordStore for SqliteKeywordStore {
    async fn upsert(&self, chunks: &[DocumentChunk], ids: &[String]) -> Result<Vec<String>> {
        anyhow::ensure!(chunks.len() == ids.len(), "chunks/ids length mismatch");

        // FTS5 has no ON CONFLICT; delete-then-insert keyed by the
        // deterministic entry id gives the same idempotence.
        let mut tx = self.pool.begin().await?;
        for (chunk, id) in chunks.iter().zip(ids.iter()) {
            sqlx::query("DELETE FROM keyword_fts WHERE entry_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO keyword_fts (entry_id, document_id, kb_id, text) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&chunk.metadata.document_id)
            .bind(&chunk.metadata.kb_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(ids.to_vec())
    }

    async fn search(
        &self,
        query: &str,
        top_k: i64,
        partition_keys: &[String],
    ) -> Result<Vec<StoreHit>> {
        let sql = format!(
            "SELECT document_id, kb_id, text, rank FROM keyword_fts
             WHERE keyword_fts MATCH ?{}
             ORDER BY rank LIMIT ?",
            partition_clause_and("kb_id", partition_keys.len())
        );
        let mut q = sqlx::query(&sql).bind(fts_escape(query));
        for key in partition_keys {
            q = q.bind(key);
        }
        let rows = q.bind(top_k).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                let kb_id: String = row.get("kb_id");
                let document_id: String = row.get("document_id");
                StoreHit {
                    content: row.get("text"),
                    metadata: serde_json::json!({
                        "kb_id": kb_id,
                        "document_id": document_id,
                    }),
                    // BM25 rank is lower-is-better; negate so higher = better.
                    score: Some(-rank),
                }
            })
            .collect())
    }
}

/// ` WHERE col IN (?, …)` for n keys, empty string for none.
fn partition_clause(col: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let placeholders = vec!["?"; n].join(", ");
    format!(" WHERE {} IN ({})", col, placeholders)
}

/// ` AND col IN (?, …)` for n keys, empty string for none.
fn partition_clause_and(col: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let placeholders = vec!["?"; n].join(", ");
    format!(" AND {} IN ({})", col, placeholders)
}

/// Quote each term so FTS5 operators in user queries cannot break the
/// MATCH expression.
fn fts_escape(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}
