use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::engine::GenerationEngine;
use crate::jobs::model::{JobRecord, JobStatus};
use crate::jobs::reconciler::{CompletionReconciler, ReconcileError};
use crate::jobs::repo::JobStore;
use crate::jobs::retry::next_poll_delay_seconds;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub worker_id: String,
    pub batch_size: i64,
    pub lease_secs: i64,
    pub stale_after_secs: i64,
    pub generation_timeout_secs: i64,
    pub interval: StdDuration,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct PollSummary {
    pub leased: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub expired: usize,
    pub errors: usize,
}

/// Fallback for lost callbacks: asks the engine about generating jobs that
/// have gone quiet and feeds the answer through the reconciler.
pub struct ReconcilePoller {
    jobs: Arc<dyn JobStore>,
    engine: Arc<dyn GenerationEngine>,
    reconciler: Arc<CompletionReconciler>,
    cfg: PollerConfig,
}

impl ReconcilePoller {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        engine: Arc<dyn GenerationEngine>,
        reconciler: Arc<CompletionReconciler>,
        cfg: PollerConfig,
    ) -> Self {
        Self {
            jobs,
            engine,
            reconciler,
            cfg,
        }
    }

    pub async fn tick(&self) -> anyhow::Result<PollSummary> {
        let leased = self
            .jobs
            .lease_due_polls(
                self.cfg.batch_size,
                &self.cfg.worker_id,
                self.cfg.lease_secs,
                self.cfg.stale_after_secs,
            )
            .await?;

        let mut summary = PollSummary {
            leased: leased.len(),
            ..PollSummary::default()
        };

        for job in leased {
            self.poll_one(&job, &mut summary).await?;
        }

        if summary.leased > 0 {
            tracing::info!(
                worker_id = %self.cfg.worker_id,
                leased = summary.leased,
                completed = summary.completed,
                failed = summary.failed,
                pending = summary.pending,
                expired = summary.expired,
                errors = summary.errors,
                "poll tick"
            );
        }
        Ok(summary)
    }

    async fn poll_one(&self, job: &JobRecord, summary: &mut PollSummary) -> anyhow::Result<()> {
        let started = job.submitted_at.unwrap_or(job.created_at);
        if Utc::now() - started >= Duration::seconds(self.cfg.generation_timeout_secs) {
            match self.reconciler.expire(job).await {
                Ok(rec) if rec.status() == JobStatus::Failed => summary.expired += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "expire failed");
                    summary.errors += 1;
                }
            }
            return Ok(());
        }

        let Some(external_job_ref) = job.external_job_ref.as_deref() else {
            // generating always carries a reference; nothing to ask about
            summary.errors += 1;
            return Ok(());
        };

        let state = match self.engine.status(external_job_ref).await {
            Ok(state) => state,
            Err(e) => {
                let delay = if e.is_retryable() {
                    self.backoff_secs(job.poll_attempts)
                } else {
                    self.reconciler.backoff().max_seconds
                };
                tracing::warn!(
                    job_id = %job.id,
                    external_job_ref,
                    error_code = e.kind.as_str(),
                    retryable = e.is_retryable(),
                    next_poll_in_secs = delay,
                    error = %e.message,
                    "engine status check failed"
                );
                self.jobs
                    .schedule_next_poll(job.id, Utc::now() + Duration::seconds(delay))
                    .await?;
                summary.errors += 1;
                return Ok(());
            }
        };

        match self.reconciler.reconcile(job.id, state).await {
            Ok(rec) => match rec.status() {
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Generating | JobStatus::Uploading => summary.pending += 1,
            },
            // already rescheduled by the reconciler
            Err(ReconcileError::Retryable(_)) => summary.errors += 1,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "reconcile failed");
                let delay = self.reconciler.backoff().max_seconds;
                self.jobs
                    .schedule_next_poll(job.id, Utc::now() + Duration::seconds(delay))
                    .await?;
                summary.errors += 1;
            }
        }
        Ok(())
    }

    fn backoff_secs(&self, attempts: i32) -> i64 {
        let mut rng = StdRng::from_entropy();
        next_poll_delay_seconds(attempts, self.reconciler.backoff(), &mut rng)
    }

    /// Poll forever. A failed tick is logged and retried after the interval.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(worker_id = %self.cfg.worker_id, error = %e, "poll tick failed");
            }
            tokio::time::sleep(self.cfg.interval).await;
        }
    }
}
