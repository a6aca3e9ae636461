use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::error_codes::FailureCode;
use crate::jobs::model::{JobRecord, TransformKind};
use crate::jobs::validate::{JobRequest, MediaUpload};
use crate::ledger::LedgerEntry;

#[derive(Debug, Deserialize)]
pub struct MediaInput {
    pub media_base64: String,
    pub content_type: String,
}

impl MediaInput {
    fn decode(self, field: &str) -> Result<MediaUpload, AppError> {
        let bytes = STANDARD
            .decode(self.media_base64.trim())
            .map_err(|_| AppError::validation(format!("{field} is not valid base64")))?;
        Ok(MediaUpload {
            bytes,
            content_type: self.content_type,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub kind: String,
    pub preset: String,
    pub prompt: Option<String>,
    pub aspect_ratio: Option<String>,
    pub media_base64: String,
    pub content_type: String,
    #[serde(default)]
    pub extra_media: Vec<MediaInput>,
}

impl CreateJobRequest {
    pub fn into_job_request(self, owner_id: String) -> Result<JobRequest, AppError> {
        let kind = TransformKind::parse(&self.kind).ok_or_else(|| {
            AppError::validation("kind must be one of restore, animate, compose")
        })?;
        let media = MediaInput {
            media_base64: self.media_base64,
            content_type: self.content_type,
        }
        .decode("media_base64")?;
        let extra_media = self
            .extra_media
            .into_iter()
            .enumerate()
            .map(|(i, m)| m.decode(&format!("extra_media[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobRequest {
            owner_id,
            kind,
            preset: self.preset,
            prompt: self.prompt,
            aspect_ratio: self.aspect_ratio,
            media,
            extra_media,
        })
    }
}

/// Job as shown to its owner. The stored error message is operator-only.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub kind: String,
    pub status: String,
    pub input_ref: String,
    pub output_ref: Option<String>,
    pub params: Value,
    pub credits_charged: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for JobView {
    fn from(job: JobRecord) -> Self {
        let error_message = job
            .error_code
            .as_deref()
            .map(|code| FailureCode::from_str(code).user_message().to_string());
        Self {
            id: job.id,
            kind: job.kind,
            status: job.status,
            input_ref: job.input_ref,
            output_ref: job.output_ref,
            params: job.params_json,
            credits_charged: job.credits_charged,
            error_code: job.error_code,
            error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub balance: i64,
    pub entries: Vec<LedgerEntry>,
}
