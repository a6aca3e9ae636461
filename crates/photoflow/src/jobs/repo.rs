use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::jobs::error_codes::FailureCode;
use crate::jobs::model::{JobRecord, JobStatus, NewJob};

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub uploading: i64,
    pub generating: i64,
    pub completed: i64,
    pub failed: i64,
    /// Seconds the most overdue generating job has waited past its next poll.
    pub max_poll_lag_secs: f64,
}

/// Persistence for job records.
///
/// State-changing writes are guarded on the expected current status and
/// return `None` when another writer got there first.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_uploading(&self, job: &NewJob) -> anyhow::Result<JobRecord>;

    async fn get(&self, job_id: Uuid) -> anyhow::Result<Option<JobRecord>>;

    async fn list_for_owner(&self, owner_id: &str, limit: i64) -> anyhow::Result<Vec<JobRecord>>;

    async fn mark_generating(
        &self,
        job_id: Uuid,
        external_job_ref: &str,
        first_poll_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<JobRecord>>;

    /// Written once, after the debit succeeds.
    async fn set_credits_charged(&self, job_id: Uuid, credits: i64) -> anyhow::Result<()>;

    async fn mark_completed(
        &self,
        job_id: Uuid,
        output_ref: &str,
    ) -> anyhow::Result<Option<JobRecord>>;

    async fn mark_failed(
        &self,
        job_id: Uuid,
        from: JobStatus,
        code: FailureCode,
        message: &str,
    ) -> anyhow::Result<Option<JobRecord>>;

    /// Lease generating jobs that are due for a status poll. A leased job is
    /// invisible to other pollers until `lease_secs` pass or it is
    /// rescheduled.
    async fn lease_due_polls(
        &self,
        limit: i64,
        worker_id: &str,
        lease_secs: i64,
        stale_after_secs: i64,
    ) -> anyhow::Result<Vec<JobRecord>>;

    /// Set the next poll time and drop the poll lease. Does not touch
    /// `updated_at`.
    async fn schedule_next_poll(&self, job_id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn stats(&self) -> anyhow::Result<JobStats>;
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_uploading(&self, job: &NewJob) -> anyhow::Result<JobRecord> {
        let rec = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO jobs (id, owner_id, kind, status, input_ref, params_json)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.owner_id)
        .bind(job.kind.as_str())
        .bind(JobStatus::Uploading.as_str())
        .bind(&job.input_ref)
        .bind(&job.params_json)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec)
    }

    async fn get(&self, job_id: Uuid) -> anyhow::Result<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn list_for_owner(&self, owner_id: &str, limit: i64) -> anyhow::Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_generating(
        &self,
        job_id: Uuid,
        external_job_ref: &str,
        first_poll_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<JobRecord>> {
        let rec = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE jobs
            SET status = 'generating',
                external_job_ref = $2,
                submitted_at = now(),
                next_poll_at = $3,
                updated_at = now()
            WHERE id = $1
              AND status = 'uploading'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(external_job_ref)
        .bind(first_poll_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rec)
    }

    async fn set_credits_charged(&self, job_id: Uuid, credits: i64) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET credits_charged = $2
            WHERE id = $1
              AND credits_charged IS NULL
            "#,
        )
        .bind(job_id)
        .bind(credits)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        output_ref: &str,
    ) -> anyhow::Result<Option<JobRecord>> {
        let rec = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE jobs
            SET status = 'completed',
                output_ref = $2,
                next_poll_at = NULL,
                poll_locked_by = NULL,
                poll_lock_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'generating'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(output_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rec)
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        from: JobStatus,
        code: FailureCode,
        message: &str,
    ) -> anyhow::Result<Option<JobRecord>> {
        if !from.can_transition_to(JobStatus::Failed) {
            anyhow::bail!("cannot fail a job from {}", from.as_str());
        }
        let rec = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_code = $3,
                error_message = $4,
                next_poll_at = NULL,
                poll_locked_by = NULL,
                poll_lock_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = $2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(from.as_str())
        .bind(code.as_str())
        .bind(message)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rec)
    }

    async fn lease_due_polls(
        &self,
        limit: i64,
        worker_id: &str,
        lease_secs: i64,
        stale_after_secs: i64,
    ) -> anyhow::Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRecord>(
            r#"
            WITH due AS (
                SELECT id
                FROM jobs
                WHERE status = 'generating'
                  AND next_poll_at <= now()
                  AND updated_at <= now() - make_interval(secs => $4)
                  AND (poll_lock_expires_at IS NULL OR poll_lock_expires_at < now())
                ORDER BY next_poll_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            UPDATE jobs j
            SET poll_locked_by = $2,
                poll_lock_expires_at = now() + make_interval(secs => $3),
                poll_attempts = j.poll_attempts + 1
            FROM due
            WHERE j.id = due.id
            RETURNING j.*
            "#,
        )
        .bind(limit.clamp(1, 500))
        .bind(worker_id)
        .bind(lease_secs.max(1) as f64)
        .bind(stale_after_secs.max(0) as f64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn schedule_next_poll(&self, job_id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET next_poll_at = $2,
                poll_locked_by = NULL,
                poll_lock_expires_at = NULL
            WHERE id = $1
              AND status = 'generating'
            "#,
        )
        .bind(job_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> anyhow::Result<JobStats> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let lag: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT EXTRACT(EPOCH FROM (now() - MIN(next_poll_at)))::float8
            FROM jobs
            WHERE status = 'generating'
              AND next_poll_at <= now()
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let mut stats = JobStats {
            max_poll_lag_secs: lag.unwrap_or(0.0).max(0.0),
            ..JobStats::default()
        };
        for (status, n) in counts {
            match JobStatus::parse(&status) {
                Some(JobStatus::Uploading) => stats.uploading = n,
                Some(JobStatus::Generating) => stats.generating = n,
                Some(JobStatus::Completed) => stats.completed = n,
                Some(JobStatus::Failed) => stats.failed = n,
                None => {}
            }
        }
        Ok(stats)
    }
}
