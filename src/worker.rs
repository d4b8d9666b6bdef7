//! The long-running worker loop.
//!
//! Each worker polls its current shard (see [`crate::shard`]), claims at
//! most one job per tick, runs it through the pipeline, and writes the
//! outcome back. The loop only exits on shutdown; queue errors cost one
//! poll cycle, never the worker. If the outcome write fails the claimed
//! row is forced to `failed` so the job cannot sit in `claimed` forever.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::models::IngestionJob;
use crate::pipeline::StagePipeline;
use crate::queue::JobQueue;
use crate::shard::{rotating_shard, wall_clock_minute};

pub struct WorkerLoop {
    ordinal: u32,
    worker_count: u32,
    idle_sleep: Duration,
    busy_sleep: Duration,
    queue: JobQueue,
    pipeline: Arc<StagePipeline>,
}

impl WorkerLoop {
    pub fn new(
        ordinal: u32,
        config: &WorkerConfig,
        queue: JobQueue,
        pipeline: Arc<StagePipeline>,
    ) -> Self {
        Self {
            ordinal,
            worker_count: config.count,
            idle_sleep: Duration::from_secs_f64(config.idle_sleep_secs),
            busy_sleep: Duration::from_secs_f64(config.busy_sleep_secs),
            queue,
            pipeline,
        }
    }

    /// Poll-claim-process until `shutdown` fires. A job already being
    /// processed when shutdown fires is finished and its outcome written
    /// before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            ordinal = self.ordinal,
            worker_count = self.worker_count,
            "worker started"
        );

        while !shutdown.is_cancelled() {
            let shard = rotating_shard(self.ordinal, wall_clock_minute(), self.worker_count);

            let pause = match self.queue.claim_one(shard, self.worker_count).await {
                Ok(Some(job)) => {
                    self.process(&job).await;
                    self.busy_sleep
                }
                Ok(None) => self.idle_sleep,
                Err(e) => {
                    error!(ordinal = self.ordinal, shard, error = ?e, "claim failed");
                    self.idle_sleep
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!(ordinal = self.ordinal, "worker stopped");
    }

    async fn process(&self, job: &IngestionJob) {
        let kb_name = self
            .queue
            .get_knowledge_base_name(&job.kb_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| job.kb_id.clone());
        info!(
            ordinal = self.ordinal,
            job_id = job.id,
            document_id = %job.document_id,
            kb = %kb_name,
            "claimed job"
        );

        if let Err(e) = self.queue.touch_knowledge_base(&job.kb_id).await {
            warn!(kb_id = %job.kb_id, error = ?e, "failed to stamp knowledge base");
        }

        let outcome = self.pipeline.run(job).await;
        let status = outcome.status;

        if let Err(e) = self
            .queue
            .update_result(
                job.id,
                outcome.status,
                outcome.content_length,
                outcome.chunk_count,
                &outcome.message,
            )
            .await
        {
            error!(job_id = job.id, error = ?e, "failed to write job outcome");
            // Best effort: do not leave the row claimed. Guarded update,
            // so nothing happens if the outcome did land.
            if let Err(e) = self
                .queue
                .release_claimed(job.id, "worker failed to record outcome")
                .await
            {
                error!(job_id = job.id, error = ?e, "failed to release claimed job");
            }
            return;
        }

        info!(
            ordinal = self.ordinal,
            job_id = job.id,
            status = %status,
            content_length = outcome.content_length,
            chunk_count = outcome.chunk_count,
            "job finished"
        );
    }
}
