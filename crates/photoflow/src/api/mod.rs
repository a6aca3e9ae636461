use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::gateway::GenerationGateway;
use crate::jobs::reconciler::CompletionReconciler;
use crate::jobs::repo::JobStore;
use crate::ledger::CreditLedger;
use crate::payments::PaymentWebhookVerifier;

pub mod auth;
pub mod models;
pub mod webhooks;

use auth::Caller;
use models::{CreateJobRequest, CreditsResponse, JobListResponse, JobView, ListQuery};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GenerationGateway>,
    pub reconciler: Arc<CompletionReconciler>,
    pub verifier: Arc<PaymentWebhookVerifier>,
    pub jobs: Arc<dyn JobStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub api_token: Option<String>,
    pub max_request_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_request_bytes;
    Router::new()
        // User-facing
        .route("/v1/jobs", get(list_jobs).post(create_job))
        .route("/v1/jobs/:id", get(get_job))
        .route("/v1/credits", get(get_credits))
        // Inbound webhooks
        .route(
            "/webhooks/generation/:job_id",
            post(webhooks::generation_callback),
        )
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Ops
        .route("/metrics/prom", get(metrics_prom))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub async fn create_job(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobView>), AppError> {
    let req = req.into_job_request(caller.user_id)?;
    let job = state.gateway.submit(req).await?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

pub async fn get_job(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, AppError> {
    // Someone else's job is indistinguishable from a missing one.
    match state.jobs.get(id).await? {
        Some(job) if job.owner_id == caller.user_id => Ok(Json(job.into())),
        _ => Err(AppError::NotFound),
    }
}

pub async fn list_jobs(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<ListQuery>,
) -> Result<Json<JobListResponse>, AppError> {
    let jobs = state
        .jobs
        .list_for_owner(&caller.user_id, q.limit.unwrap_or(50))
        .await?;
    Ok(Json(JobListResponse {
        jobs: jobs.into_iter().map(JobView::from).collect(),
    }))
}

pub async fn get_credits(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<ListQuery>,
) -> Result<Json<CreditsResponse>, AppError> {
    let balance = state
        .ledger
        .balance(&caller.user_id)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    let entries = state
        .ledger
        .history(&caller.user_id, q.limit.unwrap_or(20))
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(Json(CreditsResponse { balance, entries }))
}

pub async fn metrics_prom(State(state): State<AppState>) -> Response {
    match state.jobs.stats().await {
        Ok(s) => {
            let body = format!(
                concat!(
                    "# HELP photoflow_jobs Jobs by status\n",
                    "# TYPE photoflow_jobs gauge\n",
                    "photoflow_jobs{{status=\"uploading\"}} {}\n",
                    "photoflow_jobs{{status=\"generating\"}} {}\n",
                    "photoflow_jobs{{status=\"completed\"}} {}\n",
                    "photoflow_jobs{{status=\"failed\"}} {}\n",
                    "# HELP photoflow_poll_lag_seconds Oldest overdue status poll\n",
                    "# TYPE photoflow_poll_lag_seconds gauge\n",
                    "photoflow_poll_lag_seconds {}\n"
                ),
                s.uploading, s.generating, s.completed, s.failed, s.max_poll_lag_secs
            );
            (StatusCode::OK, body).into_response()
        }
        Err(e) => AppError::Internal(e).into_response(),
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
