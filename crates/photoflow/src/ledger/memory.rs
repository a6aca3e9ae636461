use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::ledger::model::{DebitOutcome, EntryKind, LedgerEntry, LedgerError, LedgerReference};
use crate::ledger::{ensure_positive, CreditLedger};

#[derive(Default)]
struct State {
    balances: HashMap<String, i64>,
    references: HashSet<(EntryKind, String)>,
    entries: Vec<LedgerEntry>,
}

impl State {
    fn apply(
        &mut self,
        owner_id: &str,
        delta: i64,
        reference: &LedgerReference,
    ) -> Result<i64, LedgerError> {
        let key = (reference.kind, reference.reference_id.clone());
        if self.references.contains(&key) {
            return Err(LedgerError::duplicate(reference));
        }
        let balance = self.balances.entry(owner_id.to_string()).or_insert(0);
        *balance += delta;
        let balance_after = *balance;
        self.references.insert(key);
        self.entries.push(LedgerEntry {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            entry_kind: reference.kind.as_str().to_string(),
            reference_id: reference.reference_id.clone(),
            delta,
            balance_after,
            created_at: Utc::now(),
        });
        Ok(balance_after)
    }
}

/// Ledger held in process memory. Every operation runs under one lock, which
/// gives the same check-and-decrement atomicity as the conditional UPDATE.
#[derive(Default)]
pub struct InMemoryCreditLedger {
    state: Mutex<State>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a balance without writing an entry. Test setup only.
    pub fn with_balance(self, owner_id: &str, balance: i64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.balances.insert(owner_id.to_string(), balance);
        }
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Store(anyhow::anyhow!("ledger lock poisoned")))
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn debit(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<DebitOutcome, LedgerError> {
        ensure_positive(amount)?;
        let mut state = self.lock()?;
        let balance = state.balances.get(owner_id).copied().unwrap_or(0);
        if balance < amount {
            return Ok(DebitOutcome::InsufficientCredits { balance });
        }
        let new_balance = state.apply(owner_id, -amount, reference)?;
        Ok(DebitOutcome::Debited { new_balance })
    }

    async fn credit(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<i64, LedgerError> {
        ensure_positive(amount)?;
        self.lock()?.apply(owner_id, amount, reference)
    }

    async fn refund(
        &self,
        owner_id: &str,
        amount: i64,
        reference: &LedgerReference,
    ) -> Result<i64, LedgerError> {
        ensure_positive(amount)?;
        self.lock()?.apply(owner_id, amount, reference)
    }

    async fn balance(&self, owner_id: &str) -> Result<i64, LedgerError> {
        Ok(self.lock()?.balances.get(owner_id).copied().unwrap_or(0))
    }

    async fn history(&self, owner_id: &str, limit: i64) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.owner_id == owner_id)
            .take(limit.clamp(1, 500) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn debit_never_drives_balance_negative() {
        let ledger = InMemoryCreditLedger::new().with_balance("u1", 3);

        let first = ledger
            .debit("u1", 2, &LedgerReference::job_debit(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(first, DebitOutcome::Debited { new_balance: 1 });

        let second = ledger
            .debit("u1", 2, &LedgerReference::job_debit(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(second, DebitOutcome::InsufficientCredits { balance: 1 });
        assert_eq!(ledger.balance("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_debits_only_one_wins_when_balance_covers_one() {
        let ledger = Arc::new(InMemoryCreditLedger::new().with_balance("u1", 5));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .debit("u1", 5, &LedgerReference::job_debit(Uuid::new_v4()))
                    .await
                    .unwrap()
            }));
        }

        let mut wins = 0;
        for h in handles {
            if h.await.unwrap().is_debited() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(ledger.balance("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn same_reference_is_applied_once() {
        let ledger = InMemoryCreditLedger::new();
        let payment = LedgerReference::payment_credit(Uuid::new_v4());

        assert_eq!(ledger.credit("u1", 10, &payment).await.unwrap(), 10);
        let err = ledger.credit("u1", 10, &payment).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEntry { .. }));
        assert_eq!(ledger.balance("u1").await.unwrap(), 10);
        assert_eq!(ledger.history("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let ledger = InMemoryCreditLedger::new();
        let err = ledger
            .credit("u1", 0, &LedgerReference::grant("seed"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(0)));
    }
}
