use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub provider_payment_id: String,
    pub owner_id: String,
    pub amount_cents: i64,
    pub credits: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub provider_payment_id: String,
    pub owner_id: String,
    pub amount_cents: i64,
    pub credits: i64,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_by_provider_id(
        &self,
        provider_payment_id: &str,
    ) -> anyhow::Result<Option<PaymentRecord>>;

    /// Insert a pending payment, or return the existing row for the same
    /// provider id unchanged.
    async fn register_pending(&self, payment: &NewPayment) -> anyhow::Result<PaymentRecord>;

    async fn mark_succeeded(&self, id: Uuid) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn find_by_provider_id(
        &self,
        provider_payment_id: &str,
    ) -> anyhow::Result<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRecord>(
            "SELECT * FROM payments WHERE provider_payment_id = $1",
        )
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn register_pending(&self, payment: &NewPayment) -> anyhow::Result<PaymentRecord> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, provider_payment_id, owner_id, amount_cents, credits, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (provider_payment_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&payment.provider_payment_id)
        .bind(&payment.owner_id)
        .bind(payment.amount_cents)
        .bind(payment.credits)
        .execute(&self.pool)
        .await?;

        self.find_by_provider_id(&payment.provider_payment_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("payment {} vanished", payment.provider_payment_id))
    }

    async fn mark_succeeded(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = 'succeeded',
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentStore {
    by_provider_id: Mutex<HashMap<String, PaymentRecord>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, PaymentRecord>>> {
        self.by_provider_id
            .lock()
            .map_err(|_| anyhow::anyhow!("payment store lock poisoned"))
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn find_by_provider_id(
        &self,
        provider_payment_id: &str,
    ) -> anyhow::Result<Option<PaymentRecord>> {
        Ok(self.lock()?.get(provider_payment_id).cloned())
    }

    async fn register_pending(&self, payment: &NewPayment) -> anyhow::Result<PaymentRecord> {
        let now = Utc::now();
        let mut map = self.lock()?;
        let rec = map
            .entry(payment.provider_payment_id.clone())
            .or_insert_with(|| PaymentRecord {
                id: Uuid::new_v4(),
                provider_payment_id: payment.provider_payment_id.clone(),
                owner_id: payment.owner_id.clone(),
                amount_cents: payment.amount_cents,
                credits: payment.credits,
                status: "pending".to_string(),
                created_at: now,
                updated_at: now,
            });
        Ok(rec.clone())
    }

    async fn mark_succeeded(&self, id: Uuid) -> anyhow::Result<()> {
        let mut map = self.lock()?;
        if let Some(rec) = map.values_mut().find(|r| r.id == id) {
            rec.status = "succeeded".to_string();
            rec.updated_at = Utc::now();
        }
        Ok(())
    }
}
