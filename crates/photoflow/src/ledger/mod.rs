//! Per-user credit balances.
//!
//! The balance is only ever changed through this module. `debit` is a single
//! conditional decrement evaluated by the store, so two concurrent debits on
//! one account can never both pass on a balance that covers only one of them.
//! `credit` and `refund` are unconditional increments. Each mutation names a
//! [`LedgerReference`]; a second mutation with the same reference is refused
//! with [`LedgerError::DuplicateEntry`] and leaves the balance untouched.

pub mod memory;
pub mod model;
pub mod repo;

use async_trait::async_trait;

pub use memory::InMemoryCreditLedger;
pub use model::{DebitOutcome, EntryKind, LedgerEntry, LedgerError, LedgerReference};
pub use repo::PgCreditLedger;

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Atomic check-and-decrement. Insufficient funds is a normal outcome,
    /// not an error.
    async fn debit(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<DebitOutcome, LedgerError>;

    /// Unconditional increment; returns the new balance.
    async fn credit(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<i64, LedgerError>;

    /// Give back credits charged for a job; returns the new balance.
    async fn refund(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<i64, LedgerError>;

    /// Current balance (0 for unknown users). Advisory only: never use it to
    /// decide whether a debit may happen.
    async fn balance(&self, owner_id: &str) -> Result<i64, LedgerError>;

    /// Most recent entries first.
    async fn history(&self, owner_id: &str, limit: i64) -> Result<Vec<LedgerEntry>, LedgerError>;
}

pub(crate) fn ensure_positive(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}
