use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::assets::{AssetError, AssetRef, AssetStore};
use crate::engine::{EngineError, EngineSubmission, GenerationEngine};
use crate::error::AppError;
use crate::jobs::error_codes::FailureCode;
use crate::jobs::model::{JobRecord, JobStatus, NewJob};
use crate::jobs::pricing::Pricing;
use crate::jobs::refund::refund_failed_job;
use crate::jobs::repo::JobStore;
use crate::jobs::validate::{validate_request, JobRequest, Limits};
use crate::ledger::{CreditLedger, DebitOutcome, LedgerError, LedgerReference};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("storage: {0}")]
    Storage(#[from] AssetError),

    #[error("engine refused job {job_id}: {source}")]
    Submission {
        job_id: Uuid,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<LedgerError> for GatewayError {
    fn from(e: LedgerError) -> Self {
        Self::Internal(e.into())
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidInput(msg) => AppError::Validation(msg),
            GatewayError::InsufficientCredits { balance, required } => {
                AppError::InsufficientCredits { balance, required }
            }
            GatewayError::Storage(e) => AppError::Storage(e.to_string()),
            GatewayError::Submission { job_id, source } => AppError::ExternalService {
                kind: source.kind,
                job_id: Some(job_id),
            },
            GatewayError::Internal(e) => AppError::Internal(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub pricing: Pricing,
    pub limits: Limits,
    /// Public base URL the engine can reach for completion callbacks.
    pub callback_base_url: Option<String>,
    /// Delay before the poller first looks at a new job.
    pub first_poll_after_secs: i64,
    pub refund_on_failure: bool,
}

/// Accepts a transformation request, uploads its media, hands it to the
/// engine and charges the user.
pub struct GenerationGateway {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn CreditLedger>,
    assets: Arc<dyn AssetStore>,
    engine: Arc<dyn GenerationEngine>,
    cfg: GatewayConfig,
}

impl GenerationGateway {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        assets: Arc<dyn AssetStore>,
        engine: Arc<dyn GenerationEngine>,
        cfg: GatewayConfig,
    ) -> Self {
        Self {
            jobs,
            ledger,
            assets,
            engine,
            cfg,
        }
    }

    pub fn cost_for(&self, req: &JobRequest) -> i64 {
        self.cfg.pricing.cost_for(req.kind)
    }

    pub async fn submit(&self, req: JobRequest) -> Result<JobRecord, GatewayError> {
        validate_request(&req, &self.cfg.limits).map_err(GatewayError::InvalidInput)?;

        let owner_id = req.owner_id.clone();
        let cost = self.cost_for(&req);

        // Fast rejection only; the debit below is what enforces the balance.
        let balance = self.ledger.balance(&owner_id).await?;
        if balance < cost {
            return Err(GatewayError::InsufficientCredits {
                balance,
                required: cost,
            });
        }

        let uploaded = self.upload_all(&req).await?;
        let (input_ref, extra_refs) = match uploaded.split_first() {
            Some((first, rest)) => (first.clone(), rest.to_vec()),
            None => return Err(anyhow::anyhow!("no media uploaded").into()),
        };

        let job_id = Uuid::new_v4();
        let params = json!({
            "kind": req.kind.as_str(),
            "preset": req.preset,
            "prompt": req.prompt,
            "aspect_ratio": req.aspect_ratio,
            "extra_input_refs": extra_refs.iter().map(AssetRef::as_str).collect::<Vec<_>>(),
        });

        let job = match self
            .jobs
            .insert_uploading(&NewJob {
                id: job_id,
                owner_id: owner_id.clone(),
                kind: req.kind,
                input_ref: input_ref.to_string(),
                params_json: params.clone(),
            })
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.discard_uploads(&owner_id, &uploaded).await;
                return Err(e.into());
            }
        };
        tracing::info!(job_id = %job.id, user_id = %owner_id, kind = req.kind.as_str(), "job created");

        let submission = EngineSubmission {
            job_id,
            kind: req.kind,
            input_refs: uploaded.iter().map(|r| r.to_string()).collect(),
            params,
            callback_url: self
                .cfg
                .callback_base_url
                .as_ref()
                .map(|base| format!("{base}/webhooks/generation/{job_id}")),
        };

        let external_job_ref = match self.engine.submit(&submission).await {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(
                    job_id = %job_id,
                    user_id = %owner_id,
                    error_code = err.kind.as_str(),
                    retryable = err.is_retryable(),
                    error = %err.message,
                    "engine submission failed"
                );
                self.jobs
                    .mark_failed(
                        job_id,
                        JobStatus::Uploading,
                        FailureCode::SubmissionFailed,
                        &err.to_string(),
                    )
                    .await?;
                return Err(GatewayError::Submission { job_id, source: err });
            }
        };

        let first_poll_at = Utc::now() + Duration::seconds(self.cfg.first_poll_after_secs.max(1));
        let generating = self
            .jobs
            .mark_generating(job_id, &external_job_ref, first_poll_at)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {job_id} left uploading before engine accept"))?;
        tracing::info!(
            job_id = %job_id,
            external_job_ref = %external_job_ref,
            "job generating"
        );

        match self
            .ledger
            .debit(&owner_id, cost, &LedgerReference::job_debit(job_id))
            .await
        {
            Ok(DebitOutcome::Debited { new_balance }) => {
                tracing::info!(job_id = %job_id, user_id = %owner_id, cost, new_balance, "job charged");
            }
            Ok(DebitOutcome::InsufficientCredits { balance }) => {
                // A concurrent submission spent the balance after the
                // pre-check. The engine job is already running and is wasted.
                tracing::warn!(
                    job_id = %job_id,
                    user_id = %owner_id,
                    balance,
                    cost,
                    "debit lost race; failing job"
                );
                let failed = self
                    .jobs
                    .mark_failed(
                        job_id,
                        JobStatus::Generating,
                        FailureCode::InsufficientCredits,
                        &format!("balance {balance} below cost {cost} at debit time"),
                    )
                    .await?;
                if failed.is_none() {
                    tracing::error!(
                        job_id = %job_id,
                        user_id = %owner_id,
                        "job finished before its debit was refused; output delivered uncharged"
                    );
                }
                return Err(GatewayError::InsufficientCredits {
                    balance,
                    required: cost,
                });
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, user_id = %owner_id, error = %e, "debit failed after engine accepted job");
                return Err(e.into());
            }
        }

        self.jobs.set_credits_charged(job_id, cost).await?;

        // A callback may have finished the job between mark_generating and
        // the charge; re-read so the caller sees the current state and a
        // failed job still gets its refund.
        let current = self.jobs.get(job_id).await?.unwrap_or(generating);
        if self.cfg.refund_on_failure && current.status() == JobStatus::Failed {
            if let Err(e) = refund_failed_job(self.ledger.as_ref(), &current).await {
                tracing::error!(job_id = %job_id, error = %e, "refund after early failure did not apply");
            }
        }
        Ok(current)
    }

    async fn upload_all(&self, req: &JobRequest) -> Result<Vec<AssetRef>, GatewayError> {
        let mut uploaded = Vec::with_capacity(1 + req.extra_media.len());
        for media in std::iter::once(&req.media).chain(req.extra_media.iter()) {
            match self
                .assets
                .put(&req.owner_id, media.bytes.clone(), &media.content_type)
                .await
            {
                Ok(r) => uploaded.push(r),
                Err(e) => {
                    tracing::warn!(user_id = %req.owner_id, error = %e, "media upload failed");
                    self.discard_uploads(&req.owner_id, &uploaded).await;
                    return Err(e.into());
                }
            }
        }
        Ok(uploaded)
    }

    async fn discard_uploads(&self, owner_id: &str, refs: &[AssetRef]) {
        for r in refs {
            if let Err(e) = self.assets.delete(owner_id, r).await {
                tracing::debug!(user_id = owner_id, asset = %r, error = %e, "orphan upload not removed");
            }
        }
    }
}
