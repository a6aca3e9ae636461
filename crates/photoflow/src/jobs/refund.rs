use crate::jobs::error_codes::FailureCode;
use crate::jobs::model::{JobRecord, JobStatus};
use crate::ledger::{CreditLedger, LedgerError, LedgerReference};

/// Refund a failed job's charge. Only jobs that failed after being debited
/// qualify. The refund is referenced by job id, so repeat calls are no-ops.
/// Returns the new balance when this call performed the refund.
pub async fn refund_failed_job(
    ledger: &dyn CreditLedger,
    job: &JobRecord,
) -> Result<Option<i64>, LedgerError> {
    if job.status() != JobStatus::Failed {
        return Ok(None);
    }
    let code = FailureCode::from_str(job.error_code.as_deref().unwrap_or_default());
    if !code.follows_debit() {
        return Ok(None);
    }
    let Some(credits) = job.credits_charged.filter(|c| *c > 0) else {
        return Ok(None);
    };

    match ledger
        .refund(&job.owner_id, credits, &LedgerReference::refund(job.id))
        .await
    {
        Ok(new_balance) => {
            tracing::info!(
                job_id = %job.id,
                user_id = %job.owner_id,
                credits,
                new_balance,
                "refunded failed job"
            );
            Ok(Some(new_balance))
        }
        Err(LedgerError::DuplicateEntry { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
