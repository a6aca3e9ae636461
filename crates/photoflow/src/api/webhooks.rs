use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::api::models::CallbackAck;
use crate::api::AppState;
use crate::engine::EngineJobPayload;
use crate::error::AppError;
use crate::jobs::reconciler::ReconcileError;
use crate::payments::Accepted;

impl From<ReconcileError> for AppError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::NotFound(_) => AppError::NotFound,
            ReconcileError::ExternalRefMismatch => {
                AppError::validation("callback does not match this job")
            }
            ReconcileError::Retryable(err) | ReconcileError::Engine(err) => {
                AppError::ExternalService {
                    kind: err.kind,
                    job_id: None,
                }
            }
            ReconcileError::Internal(e) => AppError::Internal(e),
        }
    }
}

/// Engine completion callback. Safe to deliver any number of times. The
/// caller is unauthenticated, so it only learns the resulting status.
pub async fn generation_callback(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<CallbackAck>, AppError> {
    let payload: EngineJobPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(job_id = %job_id, error = %e, "generation callback malformed");
        AppError::validation("malformed callback body")
    })?;
    let job = state.reconciler.reconcile_callback(job_id, payload).await?;
    Ok(Json(CallbackAck {
        job_id: job.id,
        status: job.status,
    }))
}

/// Payment provider webhook. Takes the raw body: the signature covers the
/// exact bytes.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Accepted>, AppError> {
    let accepted = state.verifier.handle(&headers, &body).await?;
    Ok(Json(accepted))
}
