use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: String,
    pub status: String,

    pub external_job_ref: Option<String>,
    pub input_ref: String,
    pub output_ref: Option<String>,
    pub params_json: Value,

    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub credits_charged: Option<i64>,

    pub submitted_at: Option<DateTime<Utc>>,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub poll_locked_by: Option<String>,
    pub poll_lock_expires_at: Option<DateTime<Utc>>,
    pub poll_attempts: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Unknown strings (which the CHECK constraint rules out) read as failed.
    pub fn status(&self) -> JobStatus {
        JobStatus::parse(&self.status).unwrap_or(JobStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: TransformKind,
    pub input_ref: String,
    pub params_json: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Uploading,
    Generating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploading => "uploading",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(Self::Uploading),
            "generating" => Some(Self::Generating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only lifecycle: uploading -> generating -> completed | failed,
    /// plus uploading -> failed when the engine refuses the job.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Uploading, Self::Generating)
                | (Self::Uploading, Self::Failed)
                | (Self::Generating, Self::Completed)
                | (Self::Generating, Self::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Restore,
    Animate,
    Compose,
}

impl TransformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restore => "restore",
            Self::Animate => "animate",
            Self::Compose => "compose",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restore" => Some(Self::Restore),
            "animate" => Some(Self::Animate),
            "compose" => Some(Self::Compose),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_forward_only() {
        use JobStatus::*;
        assert!(Uploading.can_transition_to(Generating));
        assert!(Uploading.can_transition_to(Failed));
        assert!(Generating.can_transition_to(Completed));
        assert!(Generating.can_transition_to(Failed));

        assert!(!Uploading.can_transition_to(Completed));
        assert!(!Generating.can_transition_to(Uploading));
        for terminal in [Completed, Failed] {
            for next in [Uploading, Generating, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for s in ["uploading", "generating", "completed", "failed"] {
            assert_eq!(JobStatus::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(JobStatus::parse("queued"), None);
    }
}
