use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::idempotency::{ClaimOutcome, IdempotencyRecord, IdempotencyStore};

type Key = (String, String);

pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<Key, IdempotencyRecord>>,
    claim_lease: Duration,
}

impl InMemoryIdempotencyStore {
    pub fn new(claim_lease_secs: i64) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            claim_lease: Duration::seconds(claim_lease_secs.max(1)),
        }
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<Key, IdempotencyRecord>>> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("idempotency lock poisoned"))
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(60)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(
        &self,
        scope: &str,
        key: &str,
        event_type: &str,
        claimed_by: &str,
    ) -> anyhow::Result<ClaimOutcome> {
        let now = Utc::now();
        let mut records = self.lock()?;
        let k = (scope.to_string(), key.to_string());

        if let Some(existing) = records.get_mut(&k) {
            if existing.processed {
                return Ok(ClaimOutcome::AlreadyProcessed);
            }
            if existing.claimed_at >= now - self.claim_lease {
                return Ok(ClaimOutcome::InFlight);
            }
            existing.claimed_by = Some(claimed_by.to_string());
            existing.claimed_at = now;
            return Ok(ClaimOutcome::Claimed);
        }

        records.insert(
            k,
            IdempotencyRecord {
                scope: scope.to_string(),
                key: key.to_string(),
                event_type: event_type.to_string(),
                processed: false,
                claimed_by: Some(claimed_by.to_string()),
                claimed_at: now,
                processed_at: None,
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn mark_processed(&self, scope: &str, key: &str) -> anyhow::Result<()> {
        let mut records = self.lock()?;
        let Some(rec) = records.get_mut(&(scope.to_string(), key.to_string())) else {
            anyhow::bail!("idempotency key {scope}/{key} not claimed");
        };
        rec.processed = true;
        rec.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn release(&self, scope: &str, key: &str) -> anyhow::Result<()> {
        let mut records = self.lock()?;
        let k = (scope.to_string(), key.to_string());
        if records.get(&k).is_some_and(|r| !r.processed) {
            records.remove(&k);
        }
        Ok(())
    }

    async fn get(&self, scope: &str, key: &str) -> anyhow::Result<Option<IdempotencyRecord>> {
        Ok(self
            .lock()?
            .get(&(scope.to_string(), key.to_string()))
            .cloned())
    }
}
