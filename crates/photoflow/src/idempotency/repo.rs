use async_trait::async_trait;
use sqlx::PgPool;

use crate::idempotency::{ClaimOutcome, IdempotencyRecord, IdempotencyStore};

#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
    claim_lease_secs: i64,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool, claim_lease_secs: i64) -> Self {
        Self {
            pool,
            claim_lease_secs: claim_lease_secs.max(1),
        }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn claim(
        &self,
        scope: &str,
        key: &str,
        event_type: &str,
        claimed_by: &str,
    ) -> anyhow::Result<ClaimOutcome> {
        // Insert-if-absent. The conflict branch only takes over a claim that
        // is unprocessed and older than the lease.
        let won: Option<bool> = sqlx::query_scalar(
            r#"
            INSERT INTO idempotency_keys (scope, key, event_type, claimed_by, claimed_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (scope, key) DO UPDATE
            SET claimed_by = EXCLUDED.claimed_by,
                claimed_at = now()
            WHERE idempotency_keys.processed = false
              AND idempotency_keys.claimed_at < now() - make_interval(secs => $5)
            RETURNING processed
            "#,
        )
        .bind(scope)
        .bind(key)
        .bind(event_type)
        .bind(claimed_by)
        .bind(self.claim_lease_secs as f64)
        .fetch_optional(&self.pool)
        .await?;

        if won.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let processed: Option<bool> = sqlx::query_scalar(
            "SELECT processed FROM idempotency_keys WHERE scope = $1 AND key = $2",
        )
        .bind(scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match processed {
            Some(true) => ClaimOutcome::AlreadyProcessed,
            // Row released between our insert and read: treat as a live
            // competitor; the provider will redeliver.
            Some(false) | None => ClaimOutcome::InFlight,
        })
    }

    async fn mark_processed(&self, scope: &str, key: &str) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processed = true,
                processed_at = now()
            WHERE scope = $1 AND key = $2
            "#,
        )
        .bind(scope)
        .bind(key)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() != 1 {
            anyhow::bail!("idempotency key {scope}/{key} not claimed");
        }
        Ok(())
    }

    async fn release(&self, scope: &str, key: &str) -> anyhow::Result<()> {
        sqlx::query(
            "DELETE FROM idempotency_keys WHERE scope = $1 AND key = $2 AND processed = false",
        )
        .bind(scope)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, scope: &str, key: &str) -> anyhow::Result<Option<IdempotencyRecord>> {
        let row = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT scope, key, event_type, processed, claimed_by, claimed_at, processed_at
            FROM idempotency_keys
            WHERE scope = $1 AND key = $2
            "#,
        )
        .bind(scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
