use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

/// Failure modes of the external generation engine, kept distinct so callers
/// can decide whether a retry is worth it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalErrorKind {
    Auth,
    RateLimit,
    Timeout,
    MalformedInput,
    MalformedResponse,
    Unavailable,
}

impl ExternalErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "ENGINE_AUTH",
            Self::RateLimit => "ENGINE_RATE_LIMIT",
            Self::Timeout => "ENGINE_TIMEOUT",
            Self::MalformedInput => "ENGINE_MALFORMED_INPUT",
            Self::MalformedResponse => "ENGINE_MALFORMED_RESPONSE",
            Self::Unavailable => "ENGINE_UNAVAILABLE",
        }
    }

    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::RateLimit | Self::Timeout | Self::Unavailable => ErrorClass::Retryable,
            Self::Auth | Self::MalformedInput | Self::MalformedResponse => ErrorClass::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Retryable
    }

    /// Text that is safe to show an end user. Never includes provider output.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RateLimit => "The generation service is busy. Please try again shortly.",
            Self::Timeout | Self::Unavailable => {
                "The generation service is temporarily unavailable. Please try again."
            }
            Self::MalformedInput => "The generation service could not process this image.",
            Self::Auth | Self::MalformedResponse => {
                "The generation service failed to accept the job. Our team has been notified."
            }
        }
    }
}

/// Error surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("not found")]
    NotFound,

    #[error("external service error: {}", kind.as_str())]
    ExternalService {
        kind: ExternalErrorKind,
        job_id: Option<Uuid>,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::Auth(_) => "auth_error",
            Self::NotFound => "not_found",
            Self::ExternalService { .. } => "external_service_error",
            Self::Storage(_) => "storage_error",
            Self::SignatureVerification(_) => "signature_verification_error",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Auth(_) | Self::SignatureVerification(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ExternalService { kind, .. } => match kind {
                ExternalErrorKind::RateLimit | ExternalErrorKind::Unavailable => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ExternalErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ExternalErrorKind::Auth
                | ExternalErrorKind::MalformedInput
                | ExternalErrorKind::MalformedResponse => StatusCode::BAD_GATEWAY,
            },
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message rendered to the caller. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Auth(msg) | Self::Conflict(msg) => msg.clone(),
            Self::InsufficientCredits { balance, required } => {
                format!("this transformation costs {required} credits; your balance is {balance}")
            }
            Self::NotFound => "not found".to_string(),
            Self::ExternalService { kind, .. } => kind.user_message().to_string(),
            Self::Storage(_) => "failed to store media, please retry".to_string(),
            Self::SignatureVerification(_) => "invalid signature".to_string(),
            Self::Internal(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error_code = self.code(), error = %self, "request failed");
        }
        let mut body = json!({
            "error": self.code(),
            "message": self.user_message(),
        });
        if let Self::ExternalService { kind, job_id } = &self {
            body["kind"] = json!(kind.as_str());
            body["retryable"] = json!(kind.is_retryable());
            if let Some(job_id) = job_id {
                body["job_id"] = json!(job_id);
            }
        }
        (status, Json(body)).into_response()
    }
}
