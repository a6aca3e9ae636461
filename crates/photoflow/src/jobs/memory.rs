use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::jobs::error_codes::FailureCode;
use crate::jobs::model::{JobRecord, JobStatus, NewJob};
use crate::jobs::repo::{JobStats, JobStore};

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<Uuid, JobRecord>>> {
        self.jobs
            .lock()
            .map_err(|_| anyhow::anyhow!("job store lock poisoned"))
    }

    /// Rewrite a record in place. Tests use it to age jobs.
    pub fn update_with(&self, job_id: Uuid, f: impl FnOnce(&mut JobRecord)) -> bool {
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.get_mut(&job_id).map(f).is_some(),
            Err(_) => false,
        }
    }

    fn transition(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        apply: impl FnOnce(&mut JobRecord),
    ) -> anyhow::Result<Option<JobRecord>> {
        let mut jobs = self.lock()?;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status != expected.as_str() {
            return Ok(None);
        }
        apply(job);
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }
}

fn clear_poll_fields(job: &mut JobRecord) {
    job.next_poll_at = None;
    job.poll_locked_by = None;
    job.poll_lock_expires_at = None;
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_uploading(&self, job: &NewJob) -> anyhow::Result<JobRecord> {
        let now = Utc::now();
        let rec = JobRecord {
            id: job.id,
            owner_id: job.owner_id.clone(),
            kind: job.kind.as_str().to_string(),
            status: JobStatus::Uploading.as_str().to_string(),
            external_job_ref: None,
            input_ref: job.input_ref.clone(),
            output_ref: None,
            params_json: job.params_json.clone(),
            error_code: None,
            error_message: None,
            credits_charged: None,
            submitted_at: None,
            next_poll_at: None,
            poll_locked_by: None,
            poll_lock_expires_at: None,
            poll_attempts: 0,
            created_at: now,
            updated_at: now,
        };
        let mut jobs = self.lock()?;
        if jobs.contains_key(&job.id) {
            anyhow::bail!("job {} already exists", job.id);
        }
        jobs.insert(job.id, rec.clone());
        Ok(rec)
    }

    async fn get(&self, job_id: Uuid) -> anyhow::Result<Option<JobRecord>> {
        Ok(self.lock()?.get(&job_id).cloned())
    }

    async fn list_for_owner(&self, owner_id: &str, limit: i64) -> anyhow::Result<Vec<JobRecord>> {
        let jobs = self.lock()?;
        let mut rows: Vec<JobRecord> = jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit.clamp(1, 500) as usize);
        Ok(rows)
    }

    async fn mark_generating(
        &self,
        job_id: Uuid,
        external_job_ref: &str,
        first_poll_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<JobRecord>> {
        self.transition(job_id, JobStatus::Uploading, |job| {
            job.status = JobStatus::Generating.as_str().to_string();
            job.external_job_ref = Some(external_job_ref.to_string());
            job.submitted_at = Some(Utc::now());
            job.next_poll_at = Some(first_poll_at);
        })
    }

    async fn set_credits_charged(&self, job_id: Uuid, credits: i64) -> anyhow::Result<()> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.credits_charged.is_none() {
                job.credits_charged = Some(credits);
            }
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        output_ref: &str,
    ) -> anyhow::Result<Option<JobRecord>> {
        self.transition(job_id, JobStatus::Generating, |job| {
            job.status = JobStatus::Completed.as_str().to_string();
            job.output_ref = Some(output_ref.to_string());
            clear_poll_fields(job);
        })
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
        self.transition(job_id, from, |job| {
            job.status = JobStatus::Failed.as_str().to_string();
            job.error_code = Some(code.as_str().to_string());
            job.error_message = Some(message.to_string());
            clear_poll_fields(job);
        })
    }

    async fn lease_due_polls(
        &self,
        limit: i64,
        worker_id: &str,
        lease_secs: i64,
        stale_after_secs: i64,
    ) -> anyhow::Result<Vec<JobRecord>> {
        let now = Utc::now();
        let stale_before = now - Duration::seconds(stale_after_secs.max(0));
        let mut jobs = self.lock()?;

        let mut due: Vec<&mut JobRecord> = jobs
            .values_mut()
            .filter(|j| {
                j.status == JobStatus::Generating.as_str()
                    && j.next_poll_at.is_some_and(|t| t <= now)
                    && j.updated_at <= stale_before
                    && j.poll_lock_expires_at.map_or(true, |t| t < now)
            })
            .collect();
        due.sort_by_key(|j| j.next_poll_at);

        Ok(due
            .into_iter()
            .take(limit.clamp(1, 500) as usize)
            .map(|j| {
                j.poll_locked_by = Some(worker_id.to_string());
                j.poll_lock_expires_at = Some(now + Duration::seconds(lease_secs.max(1)));
                j.poll_attempts += 1;
                j.clone()
            })
            .collect())
    }

    async fn schedule_next_poll(&self, job_id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Generating.as_str() {
                job.next_poll_at = Some(at);
                job.poll_locked_by = None;
                job.poll_lock_expires_at = None;
            }
        }
        Ok(())
    }

    async fn stats(&self) -> anyhow::Result<JobStats> {
        let now = Utc::now();
        let jobs = self.lock()?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            match job.status() {
                JobStatus::Uploading => stats.uploading += 1,
                JobStatus::Generating => {
                    stats.generating += 1;
                    if let Some(at) = job.next_poll_at.filter(|t| *t <= now) {
                        let lag = (now - at).num_milliseconds() as f64 / 1000.0;
                        stats.max_poll_lag_secs = stats.max_poll_lag_secs.max(lag);
                    }
                }
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
