//! The durable ingestion job queue.
//!
//! One SQLite table is the single source of truth for job state; every
//! status transition goes through this module. Claiming marks the oldest
//! pending job in a shard `claimed` in a single `UPDATE … RETURNING`
//! statement, so two workers scanning the same shard can never claim the
//! same row (SQLite serializes writers; the statement is atomic).

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{IngestionJob, JobStatus, NewJob, ParentChunk};

const JOB_COLUMNS: &str = "id, document_id, owner_id, name, kb_id, location, size_bytes, \
     source_url, chunk_size, status, content_length, chunk_count, queued_at, message, deleted";

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append a new pending job. Returns the queue row id.
    pub async fn enqueue(&self, job: &NewJob) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO ingestion_jobs
                (document_id, owner_id, name, kb_id, location, size_bytes,
                 source_url, chunk_size, status, queued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
            RETURNING id
            "#,
        )
        .bind(&job.document_id)
        .bind(&job.owner_id)
        .bind(&job.name)
        .bind(&job.kb_id)
        .bind(&job.location)
        .bind(job.size_bytes)
        .bind(&job.source_url)
        .bind(job.chunk_size)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    /// Atomically claim the oldest pending job in a shard, if any.
    ///
    /// The select-and-mark is one statement, so concurrent claimers on the
    /// same shard observe each job at most once. Returns `None` without
    /// error when the shard has no pending work.
    pub async fn claim_one(&self, shard: u32, worker_count: u32) -> Result<Option<IngestionJob>> {
        let sql = format!(
            r#"
            UPDATE ingestion_jobs SET status = 'claimed'
            WHERE id = (
                SELECT id FROM ingestion_jobs
                WHERE status = 'pending' AND deleted = 0 AND (id % ?) = ?
                ORDER BY queued_at ASC, id ASC
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(worker_count as i64)
            .bind(shard as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.map(job_from_row).transpose()
    }

    /// Write a pipeline outcome onto the job row.
    pub async fn update_result(
        &self,
        job_id: i64,
        status: JobStatus,
        content_length: i64,
        chunk_count: i64,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_jobs
             SET status = ?, content_length = ?, chunk_count = ?, message = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(content_length)
        .bind(chunk_count)
        .bind(message)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update only the progress message of a claimed job.
    pub async fn update_message(&self, job_id: i64, message: &str) -> Result<()> {
        sqlx::query("UPDATE ingestion_jobs SET message = ? WHERE id = ?")
            .bind(message)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Crash-recovery path: force a still-claimed job to `failed`.
    ///
    /// Guarded on `status = 'claimed'` so a late call after the pipeline
    /// already wrote a terminal status is a no-op.
    pub async fn release_claimed(&self, job_id: i64, message: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs SET status = 'failed', message = ?
             WHERE id = ? AND status = 'claimed'",
        )
        .bind(message)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, job_id: i64) -> Result<Option<IngestionJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(job_from_row).transpose()
    }

    /// Most recent jobs, newest first. Deleted jobs are excluded.
    pub async fn list(&self, limit: i64) -> Result<Vec<IngestionJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs
             WHERE deleted = 0 ORDER BY queued_at DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.into_iter().map(job_from_row).collect()
    }

    /// Logical delete: the rows stay for audit but disappear from claiming
    /// and listing.
    pub async fn mark_deleted(&self, document_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE ingestion_jobs SET deleted = 1 WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Persist parent-chunk windows produced by the vector stage.
    pub async fn store_parent_chunks(&self, parents: &[ParentChunk]) -> Result<()> {
        for parent in parents {
            sqlx::query(
                r#"
                INSERT INTO parent_chunks (id, document_id, kb_id, text)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET text = excluded.text
                "#,
            )
            .bind(&parent.id)
            .bind(&parent.document_id)
            .bind(&parent.kb_id)
            .bind(&parent.text)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn ensure_knowledge_base(&self, kb_id: &str, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_bases (kb_id, name) VALUES (?, ?)
            ON CONFLICT(kb_id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(kb_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stamp the knowledge base's latest insert time (called on claim).
    pub async fn touch_knowledge_base(&self, kb_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE knowledge_bases SET latest_insert_time = ? WHERE kb_id = ?")
            .bind(now)
            .bind(kb_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_knowledge_base_name(&self, kb_id: &str) -> Result<Option<String>> {
        let name = sqlx::query_scalar("SELECT name FROM knowledge_bases WHERE kb_id = ?")
            .bind(kb_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(name)
    }
}

fn job_from_row(row: SqliteRow) -> Result<IngestionJob> {
    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown job status in queue: {}", status_str))?;
    let deleted: i64 = row.get("deleted");

    Ok(IngestionJob {
        id: row.get("id"),
        document_id: row.get("document_id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        kb_id: row.get("kb_id"),
        location: row.get("location"),
        size_bytes: row.get("size_bytes"),
        source_url: row.get("source_url"),
        chunk_size: row.get("chunk_size"),
        status,
        content_length: row.get("content_length"),
        chunk_count: row.get("chunk_count"),
        queued_at: row.get("queued_at"),
        message: row.get("message"),
        deleted: deleted != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;

    pub(crate) async fn test_queue() -> (tempfile::TempDir, JobQueue) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("queue.sqlite"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        (tmp, JobQueue::new(pool))
    }

    pub(crate) fn new_job(name: &str) -> NewJob {
        NewJob {
            document_id: format!("doc-{name}"),
            owner_id: "owner".to_string(),
            name: name.to_string(),
            kb_id: "kb1".to_string(),
            location: format!("/tmp/{name}"),
            size_bytes: 10,
            source_url: None,
            chunk_size: 100,
        }
    }

    #[tokio::test]
    async fn test_enqueue_then_claim() {
        let (_tmp, queue) = test_queue().await;
        let id = queue.enqueue(&new_job("a.txt")).await.unwrap();

        let claimed = queue.claim_one((id % 1) as u32, 1).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Claimed);
        assert_eq!(claimed.content_length, -1);
        assert_eq!(claimed.chunk_count, 0);

        // Same shard now empty.
        assert!(queue.claim_one(0, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_shard() {
        let (_tmp, queue) = test_queue().await;
        let id = queue.enqueue(&new_job("a.txt")).await.unwrap();
        let other_shard = ((id + 1) % 2) as u32;
        assert!(queue.claim_one(other_shard, 2).await.unwrap().is_none());
        let own_shard = (id % 2) as u32;
        assert!(queue.claim_one(own_shard, 2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let (_tmp, queue) = test_queue().await;
        let first = queue.enqueue(&new_job("first.txt")).await.unwrap();
        let _second = queue.enqueue(&new_job("second.txt")).await.unwrap();

        // Same queued_at second is possible; the id tiebreak keeps order.
        let claimed = queue.claim_one(0, 1).await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
    }

    #[tokio::test]
    async fn test_deleted_jobs_not_claimable() {
        let (_tmp, queue) = test_queue().await;
        queue.enqueue(&new_job("a.txt")).await.unwrap();
        queue.mark_deleted("doc-a.txt").await.unwrap();
        assert!(queue.claim_one(0, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_result_round_trip() {
        let (_tmp, queue) = test_queue().await;
        let id = queue.enqueue(&new_job("a.txt")).await.unwrap();
        queue.claim_one(0, 1).await.unwrap().unwrap();
        queue
            .update_result(id, JobStatus::Succeeded, 10, 1, "{\"parse_time\":0.1}")
            .await
            .unwrap();

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.content_length, 10);
        assert_eq!(job.chunk_count, 1);
        assert!(job.message.contains("parse_time"));
    }

    #[tokio::test]
    async fn test_release_claimed_is_guarded() {
        let (_tmp, queue) = test_queue().await;
        let id = queue.enqueue(&new_job("a.txt")).await.unwrap();
        queue.claim_one(0, 1).await.unwrap().unwrap();

        assert!(queue.release_claimed(id, "worker crashed").await.unwrap());
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        // Already terminal: second release is a no-op.
        assert!(!queue.release_claimed(id, "late").await.unwrap());
    }

    #[tokio::test]
    async fn test_knowledge_base_bookkeeping() {
        let (_tmp, queue) = test_queue().await;
        queue.ensure_knowledge_base("kb1", "Runbooks").await.unwrap();
        queue.touch_knowledge_base("kb1").await.unwrap();
        assert_eq!(
            queue.get_knowledge_base_name("kb1").await.unwrap().as_deref(),
            Some("Runbooks")
        );
        assert_eq!(queue.get_knowledge_base_name("nope").await.unwrap(), None);
    }
}
