//! In-memory ledger.
//!
//! Backs the service when no PostgreSQL connection is configured
//! (simulation mode) and the scenario tests. Same idempotency contract as
//! the Postgres ledger: one applied effect per (tx_id, op).

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::saga::{OpResult, TransferId};

use super::{AccountInfo, LedgerError, LedgerOp, LedgerService, failure};

#[derive(Debug, Clone)]
struct MemAccount {
    owner_user_id: Uuid,
    balance: Decimal,
    locked: bool,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, MemAccount>,
    applied: HashSet<(String, &'static str)>,
}

/// Thread-safe in-memory ledger. A single mutex keeps multi-account
/// operations atomic; this is a stand-in, not a throughput play.
#[derive(Default)]
pub struct MemLedger {
    inner: Mutex<Inner>,
    // Scriptable outcomes for failure-path tests
    fail_credit: AtomicBool,
    fail_refund: AtomicBool,
    pending_debit: AtomicBool,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_account(&self, account_id: &str, owner_user_id: Uuid, balance: Decimal) {
        let mut inner = self.inner.lock().unwrap();
        inner.accounts.insert(
            account_id.to_string(),
            MemAccount {
                owner_user_id,
                balance,
                locked: false,
            },
        );
    }

    pub fn lock_account(&self, account_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(acc) = inner.accounts.get_mut(account_id) {
            acc.locked = true;
        }
    }

    pub fn balance_of(&self, account_id: &str) -> Option<Decimal> {
        let inner = self.inner.lock().unwrap();
        inner.accounts.get(account_id).map(|a| a.balance)
    }

    /// Make every credit fail explicitly (forces compensation paths).
    pub fn set_fail_credit(&self, fail: bool) {
        self.fail_credit.store(fail, Ordering::SeqCst);
    }

    /// Make every refund fail explicitly (forces ROLLBACK_FAILED).
    pub fn set_fail_refund(&self, fail: bool) {
        self.fail_refund.store(fail, Ordering::SeqCst);
    }

    /// Make every debit come back with an unknown outcome.
    pub fn set_pending_debit(&self, pending: bool) {
        self.pending_debit.store(pending, Ordering::SeqCst);
    }

    fn apply_debit(
        inner: &mut Inner,
        account_id: &str,
        amount: Decimal,
        key: (String, &'static str),
    ) -> OpResult {
        if inner.applied.contains(&key) {
            return OpResult::Success;
        }
        let Some(acc) = inner.accounts.get_mut(account_id) else {
            return OpResult::Failed(failure::ACCOUNT_NOT_FOUND.to_string());
        };
        if acc.locked {
            return OpResult::Failed(failure::ACCOUNT_LOCKED.to_string());
        }
        if acc.balance < amount {
            return OpResult::Failed(failure::INSUFFICIENT_FUNDS.to_string());
        }
        acc.balance -= amount;
        inner.applied.insert(key);
        OpResult::Success
    }

    fn apply_credit(
        inner: &mut Inner,
        account_id: &str,
        amount: Decimal,
        key: (String, &'static str),
    ) -> OpResult {
        if inner.applied.contains(&key) {
            return OpResult::Success;
        }
        let Some(acc) = inner.accounts.get_mut(account_id) else {
            return OpResult::Failed(failure::ACCOUNT_NOT_FOUND.to_string());
        };
        acc.balance += amount;
        inner.applied.insert(key);
        OpResult::Success
    }
}

#[async_trait]
impl LedgerService for MemLedger {
    async fn account(&self, account_id: &str) -> Result<Option<AccountInfo>, LedgerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.accounts.get(account_id).map(|a| AccountInfo {
            account_id: account_id.to_string(),
            owner_user_id: a.owner_user_id,
            balance: a.balance,
            locked: a.locked,
            updated_at: Utc::now(),
        }))
    }

    async fn debit(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult {
        if self.pending_debit.load(Ordering::SeqCst) {
            return OpResult::Pending;
        }
        let mut inner = self.inner.lock().unwrap();
        Self::apply_debit(
            &mut inner,
            account_id,
            amount,
            (tx_id.to_string(), LedgerOp::Debit.as_str()),
        )
    }

    async fn credit(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult {
        if self.fail_credit.load(Ordering::SeqCst) {
            return OpResult::Failed("credit rejected".to_string());
        }
        let mut inner = self.inner.lock().unwrap();
        Self::apply_credit(
            &mut inner,
            account_id,
            amount,
            (tx_id.to_string(), LedgerOp::Credit.as_str()),
        )
    }

    async fn refund(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult {
        if self.fail_refund.load(Ordering::SeqCst) {
            return OpResult::Failed("refund rejected".to_string());
        }
        let mut inner = self.inner.lock().unwrap();
        Self::apply_credit(
            &mut inner,
            account_id,
            amount,
            (tx_id.to_string(), LedgerOp::Refund.as_str()),
        )
    }

    async fn transfer_atomic(
        &self,
        sender_account_id: &str,
        receiver_account_id: &str,
        amount: Decimal,
        fee: Decimal,
        tx_id: TransferId,
    ) -> OpResult {
        if self.fail_credit.load(Ordering::SeqCst) {
            return OpResult::Failed("credit rejected".to_string());
        }
        let mut inner = self.inner.lock().unwrap();
        let key = (tx_id.to_string(), LedgerOp::Transfer.as_str());
        if inner.applied.contains(&key) {
            return OpResult::Success;
        }
        if !inner.accounts.contains_key(receiver_account_id) {
            return OpResult::Failed(failure::ACCOUNT_NOT_FOUND.to_string());
        }
        let total = amount + fee;
        {
            let Some(sender) = inner.accounts.get_mut(sender_account_id) else {
                return OpResult::Failed(failure::ACCOUNT_NOT_FOUND.to_string());
            };
            if sender.locked {
                return OpResult::Failed(failure::ACCOUNT_LOCKED.to_string());
            }
            if sender.balance < total {
                return OpResult::Failed(failure::INSUFFICIENT_FUNDS.to_string());
            }
            sender.balance -= total;
        }
        if let Some(receiver) = inner.accounts.get_mut(receiver_account_id) {
            receiver.balance += amount;
        }
        inner.applied.insert(key);
        OpResult::Success
    }
}
