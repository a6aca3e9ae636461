use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    JobDebit,
    PaymentCredit,
    Refund,
    Grant,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::JobDebit => "job_debit",
            EntryKind::PaymentCredit => "payment_credit",
            EntryKind::Refund => "refund",
            EntryKind::Grant => "grant",
        }
    }
}

/// What a balance mutation is attributable to. The ledger accepts at most one
/// mutation per reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerReference {
    pub kind: EntryKind,
    pub reference_id: String,
}

impl LedgerReference {
    pub fn job_debit(job_id: Uuid) -> Self {
        Self {
            kind: EntryKind::JobDebit,
            reference_id: job_id.to_string(),
        }
    }

    pub fn refund(job_id: Uuid) -> Self {
        Self {
            kind: EntryKind::Refund,
            reference_id: job_id.to_string(),
        }
    }

    pub fn payment_credit(payment_id: Uuid) -> Self {
        Self {
            kind: EntryKind::PaymentCredit,
            reference_id: payment_id.to_string(),
        }
    }

    pub fn grant(reference: &str) -> Self {
        Self {
            kind: EntryKind::Grant,
            reference_id: reference.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { new_balance: i64 },
    InsufficientCredits { balance: i64 },
}

impl DebitOutcome {
    pub fn is_debited(&self) -> bool {
        matches!(self, DebitOutcome::Debited { .. })
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub owner_id: String,
    pub entry_kind: String,
    pub reference_id: String,
    pub delta: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger amounts must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("ledger already has a {kind} entry for {reference_id}")]
    DuplicateEntry {
        kind: &'static str,
        reference_id: String,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl LedgerError {
    pub(crate) fn duplicate(reference: &LedgerReference) -> Self {
        Self::DuplicateEntry {
            kind: reference.kind.as_str(),
            reference_id: reference.reference_id.clone(),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.into())
    }
}
