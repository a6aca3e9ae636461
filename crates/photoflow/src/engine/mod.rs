//! Boundary to the external generation engine.
//!
//! The engine accepts a job, hands back an opaque reference, and later
//! reports completion either through a callback or when asked for status.

pub mod http;
pub mod payload;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ExternalErrorKind;
use crate::jobs::model::TransformKind;

pub use http::HttpGenerationEngine;
pub use payload::EngineJobPayload;

#[derive(Debug, Clone, Serialize)]
pub struct EngineSubmission {
    pub job_id: Uuid,
    pub kind: TransformKind,
    pub input_refs: Vec<String>,
    pub params: serde_json::Value,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Pending,
    Succeeded { output_url: String },
    Failed { error: Option<String> },
}

#[derive(Debug, Clone)]
pub struct DownloadedAsset {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct EngineError {
    pub kind: ExternalErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ExternalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Map a non-success HTTP status from the engine.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ExternalErrorKind::Auth,
            429 => ExternalErrorKind::RateLimit,
            408 | 504 => ExternalErrorKind::Timeout,
            400 | 404 | 413 | 415 | 422 => ExternalErrorKind::MalformedInput,
            500..=599 => ExternalErrorKind::Unavailable,
            _ => ExternalErrorKind::MalformedResponse,
        };
        let mut message = format!("engine returned HTTP {status}");
        let snippet: String = body.chars().take(200).collect();
        if !snippet.trim().is_empty() {
            message.push_str(": ");
            message.push_str(snippet.trim());
        }
        Self::new(kind, message)
    }
}

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Enqueue a job; returns the engine's reference for it.
    async fn submit(&self, submission: &EngineSubmission) -> Result<String, EngineError>;

    async fn status(&self, external_job_ref: &str) -> Result<EngineState, EngineError>;

    async fn download(&self, output_url: &str) -> Result<DownloadedAsset, EngineError>;
}
