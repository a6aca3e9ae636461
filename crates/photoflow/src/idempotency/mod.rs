//! Processed-event keys for at-least-once inbound deliveries.
//!
//! A key is claimed before side effects run and marked processed after they
//! commit. A claim that never reaches `processed` expires after a lease so a
//! crashed delivery does not block provider retries forever.

pub mod memory;
pub mod repo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use memory::InMemoryIdempotencyStore;
pub use repo::PgIdempotencyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the key and must run the side effects.
    Claimed,
    /// Side effects already committed by an earlier delivery.
    AlreadyProcessed,
    /// Another delivery holds a live claim.
    InFlight,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub scope: String,
    pub key: String,
    pub event_type: String,
    pub processed: bool,
    pub claimed_by: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn claim(
        &self,
        scope: &str,
        key: &str,
        event_type: &str,
        claimed_by: &str,
    ) -> anyhow::Result<ClaimOutcome>;

    async fn mark_processed(&self, scope: &str, key: &str) -> anyhow::Result<()>;

    /// Drop an unprocessed claim so the next delivery can retry.
    /// Processed keys are never released.
    async fn release(&self, scope: &str, key: &str) -> anyhow::Result<()>;

    async fn get(&self, scope: &str, key: &str) -> anyhow::Result<Option<IdempotencyRecord>>;
}
