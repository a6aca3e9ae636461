use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::ledger::model::{DebitOutcome, LedgerEntry, LedgerError, LedgerReference};
use crate::ledger::{ensure_positive, CreditLedger};

#[derive(Clone)]
pub struct PgCreditLedger {
    pool: PgPool,
}

impl PgCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserting increment shared by credit and refund.
    async fn increment(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<i64, LedgerError> {
        ensure_positive(amount)?;
        let mut tx = self.pool.begin().await?;

        let new_balance: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO credit_accounts (owner_id, balance)
            VALUES ($1, $2)
            ON CONFLICT (owner_id) DO UPDATE
            SET balance = credit_accounts.balance + EXCLUDED.balance,
                updated_at = now()
            RETURNING balance
            "#,
        )
        .bind(owner_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        record_entry(&mut tx, owner_id, reference, amount, new_balance).await?;
        tx.commit().await?;
        Ok(new_balance)
    }
}

/// Append the audit row inside the caller's transaction. A conflict on
/// (entry_kind, reference_id) means this mutation was already applied; the
/// caller's transaction is dropped, which rolls the balance change back.
async fn record_entry(
    tx: &mut Transaction<'_, Postgres>,
    owner_id: &str,
    reference: &LedgerReference,
    delta: i64,
    balance_after: i64,
) -> Result<(), LedgerError> {
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO ledger_entries (id, owner_id, entry_kind, reference_id, delta, balance_after)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (entry_kind, reference_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(owner_id)
    .bind(reference.kind.as_str())
    .bind(&reference.reference_id)
    .bind(delta)
    .bind(balance_after)
    .fetch_optional(&mut **tx)
    .await?;

    match inserted {
        Some(_) => Ok(()),
        None => Err(LedgerError::duplicate(reference)),
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn debit(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<DebitOutcome, LedgerError> {
        ensure_positive(amount)?;
        let mut tx = self.pool.begin().await?;

        // Check and decrement in one statement. Concurrent debits serialize on
        // the row lock and each re-evaluates `balance >= $2` against the
        // committed value.
        let new_balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE credit_accounts
            SET balance = balance - $2,
                updated_at = now()
            WHERE owner_id = $1
              AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(owner_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(new_balance) = new_balance else {
            tx.rollback().await?;
            let balance = self.balance(owner_id).await?;
            return Ok(DebitOutcome::InsufficientCredits { balance });
        };

        record_entry(&mut tx, owner_id, reference, -amount, new_balance).await?;
        tx.commit().await?;
        Ok(DebitOutcome::Debited { new_balance })
    }

    async fn credit(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<i64, LedgerError> {
        self.increment(owner_id, amount, reference).await
    }

    async fn refund(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<i64, LedgerError> {
        self.increment(owner_id, amount, reference).await
    }

    async fn balance(&self, owner_id: &str) -> Result<i64, LedgerError> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn history(&self, owner_id: &str, limit: i64) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, owner_id, entry_kind, reference_id, delta, balance_after, created_at
            FROM ledger_entries
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
}
