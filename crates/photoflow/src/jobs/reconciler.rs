//! Moves generating jobs to a terminal state from an engine result.
//!
//! Webhook callbacks and the poller both end up here, possibly at the same
//! time and possibly more than once for the same job. Terminal writes are
//! guarded on `status = 'generating'`, so exactly one caller wins and every
//! other call returns the winner's record unchanged.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use uuid::Uuid;

use crate::assets::{content_type_for_path, extension_for, AssetStore};
use crate::engine::{EngineError, EngineJobPayload, EngineState, GenerationEngine};
use crate::jobs::error_codes::FailureCode;
use crate::jobs::model::{JobRecord, JobStatus};
use crate::jobs::refund::refund_failed_job;
use crate::jobs::repo::JobStore;
use crate::jobs::retry::{next_poll_delay_seconds, BackoffConfig};
use crate::ledger::CreditLedger;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("callback job id does not match the job's external reference")]
    ExternalRefMismatch,

    /// Transient failure talking to the engine; the job stays generating.
    #[error("retryable engine error: {0}")]
    Retryable(EngineError),

    #[error("engine error: {0}")]
    Engine(EngineError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub refund_on_failure: bool,
    pub backoff: BackoffConfig,
}

pub struct CompletionReconciler {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn CreditLedger>,
    assets: Arc<dyn AssetStore>,
    engine: Arc<dyn GenerationEngine>,
    cfg: ReconcilerConfig,
}

impl CompletionReconciler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        assets: Arc<dyn AssetStore>,
        engine: Arc<dyn GenerationEngine>,
        cfg: ReconcilerConfig,
    ) -> Self {
        Self {
            jobs,
            ledger,
            assets,
            engine,
            cfg,
        }
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.cfg.backoff
    }

    /// Engine callback entry point.
    ///
    /// The callback is only a hint that something changed. It must name the
    /// engine job we submitted, and the result applied is the one the
    /// engine reports for that job, never the state carried in the body.
    pub async fn reconcile_callback(
        &self,
        job_id: Uuid,
        payload: EngineJobPayload,
    ) -> Result<JobRecord, ReconcileError> {
        let job = self.load(job_id).await?;
        let Some(actual) = job.external_job_ref.as_deref() else {
            tracing::warn!(job_id = %job_id, "callback for job the engine never accepted");
            return Err(ReconcileError::ExternalRefMismatch);
        };
        if payload.id.as_deref().map(str::trim) != Some(actual) {
            tracing::warn!(
                job_id = %job_id,
                external_job_ref = actual,
                callback_ref = payload.id.as_deref().unwrap_or("-"),
                "callback reference mismatch"
            );
            return Err(ReconcileError::ExternalRefMismatch);
        }
        if job.is_terminal() {
            if job.status() == JobStatus::Failed {
                self.maybe_refund(&job).await;
            }
            return Ok(job);
        }

        let state = match self.engine.status(actual).await {
            Ok(state) => state,
            Err(e) if e.is_retryable() => {
                tracing::warn!(job_id = %job_id, error_code = e.kind.as_str(), error = %e.message, "status check after callback failed");
                return Err(ReconcileError::Retryable(e));
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error_code = e.kind.as_str(), error = %e.message, "status check after callback failed");
                return Err(ReconcileError::Engine(e));
            }
        };
        self.apply(job, state).await
    }

    pub async fn reconcile(
        &self,
        job_id: Uuid,
        state: EngineState,
    ) -> Result<JobRecord, ReconcileError> {
        let job = self.load(job_id).await?;
        self.apply(job, state).await
    }

    /// Fail a job that has been generating for too long.
    pub async fn expire(&self, job: &JobRecord) -> Result<JobRecord, ReconcileError> {
        let age = (Utc::now() - job.submitted_at.unwrap_or(job.created_at)).num_seconds();
        self.fail(
            job,
            FailureCode::TimedOut,
            &format!("no engine result after {age}s"),
        )
        .await
    }

    async fn load(&self, job_id: Uuid) -> Result<JobRecord, ReconcileError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or(ReconcileError::NotFound(job_id))
    }

    async fn apply(&self, job: JobRecord, state: EngineState) -> Result<JobRecord, ReconcileError> {
        match job.status() {
            JobStatus::Completed => return Ok(job),
            JobStatus::Failed => {
                // Re-apply the refund policy; it is a no-op once done.
                self.maybe_refund(&job).await;
                return Ok(job);
            }
            JobStatus::Uploading => {
                tracing::debug!(job_id = %job.id, "result for job not yet accepted by engine; ignored");
                return Ok(job);
            }
            JobStatus::Generating => {}
        }

        match state {
            EngineState::Pending => {
                self.reschedule(&job).await?;
                Ok(self.load(job.id).await?)
            }
            EngineState::Failed { error } => {
                let message = error.unwrap_or_else(|| "engine reported failure".to_string());
                self.fail(&job, FailureCode::GenerationFailed, &message).await
            }
            EngineState::Succeeded { output_url } => self.store_output(&job, &output_url).await,
        }
    }

    async fn store_output(
        &self,
        job: &JobRecord,
        output_url: &str,
    ) -> Result<JobRecord, ReconcileError> {
        let downloaded = match self.engine.download(output_url).await {
            Ok(d) => d,
            Err(e) if e.is_retryable() => {
                tracing::warn!(job_id = %job.id, error_code = e.kind.as_str(), error = %e.message, "output download failed; will retry");
                self.reschedule(job).await?;
                return Err(ReconcileError::Retryable(e));
            }
            Err(e) => {
                return self
                    .fail(
                        job,
                        FailureCode::PostprocessFailed,
                        &format!("output download failed: {e}"),
                    )
                    .await;
            }
        };

        let content_type = if extension_for(&downloaded.content_type).is_some() {
            downloaded.content_type.clone()
        } else if let Some(ct) = content_type_for_path(output_url) {
            ct.to_string()
        } else {
            return self
                .fail(
                    job,
                    FailureCode::PostprocessFailed,
                    &format!("unsupported output content type {}", downloaded.content_type),
                )
                .await;
        };

        let asset = match self
            .assets
            .put(&job.owner_id, downloaded.bytes, &content_type)
            .await
        {
            Ok(a) => a,
            Err(e) => {
                return self
                    .fail(
                        job,
                        FailureCode::PostprocessFailed,
                        &format!("output persist failed: {e}"),
                    )
                    .await;
            }
        };

        let completed = match self.jobs.mark_completed(job.id, asset.as_str()).await {
            Ok(c) => c,
            Err(e) => {
                if let Err(del) = self.assets.delete(&job.owner_id, &asset).await {
                    tracing::debug!(job_id = %job.id, error = %del, "unrecorded output not removed");
                }
                return Err(e.into());
            }
        };

        match completed {
            Some(rec) => {
                tracing::info!(job_id = %rec.id, user_id = %rec.owner_id, output_ref = %asset, "job completed");
                Ok(rec)
            }
            None => {
                // Another reconcile finished the job first.
                if let Err(e) = self.assets.delete(&job.owner_id, &asset).await {
                    tracing::debug!(job_id = %job.id, error = %e, "duplicate output not removed");
                }
                Ok(self.load(job.id).await?)
            }
        }
    }

    async fn fail(
        &self,
        job: &JobRecord,
        code: FailureCode,
        message: &str,
    ) -> Result<JobRecord, ReconcileError> {
        match self
            .jobs
            .mark_failed(job.id, JobStatus::Generating, code, message)
            .await?
        {
            Some(rec) => {
                tracing::warn!(
                    job_id = %rec.id,
                    user_id = %rec.owner_id,
                    error_code = code.as_str(),
                    "job failed"
                );
                self.maybe_refund(&rec).await;
                Ok(rec)
            }
            None => Ok(self.load(job.id).await?),
        }
    }

    async fn maybe_refund(&self, job: &JobRecord) {
        if !self.cfg.refund_on_failure {
            return;
        }
        if let Err(e) = refund_failed_job(self.ledger.as_ref(), job).await {
            tracing::error!(job_id = %job.id, user_id = %job.owner_id, error = %e, "refund failed");
        }
    }

    async fn reschedule(&self, job: &JobRecord) -> anyhow::Result<()> {
        let mut rng = StdRng::from_entropy();
        let delay = next_poll_delay_seconds(job.poll_attempts, &self.cfg.backoff, &mut rng);
        self.jobs
            .schedule_next_poll(job.id, Utc::now() + Duration::seconds(delay))
            .await
    }
}
