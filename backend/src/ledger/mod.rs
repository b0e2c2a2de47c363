//! Ledger collaborator
//!
//! Moving money is owned by an external ledger. The core only needs two
//! operations, both idempotent under an [`IdempotencyKey`] derived from the
//! request id, so a retried completion can never debit or credit twice.
//!
//! [`MemoryLedger`] is a reference implementation used by tests and the CLI.
//!
//! CRITICAL: All money values are i64 (currency units)

pub mod settlement;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::Mutex;

pub use settlement::{settle_withdrawal, Settlement};

/// Errors reported by the ledger
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient funds in {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: String,
        required: i64,
        available: i64,
    },

    #[error("Unknown account {0}")]
    UnknownAccount(String),

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Idempotency key {0} was already used for a different operation")]
    KeyConflict(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Which side of the withdrawal a ledger call settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerLeg {
    /// Requester pays the withdrawn amount
    Debit,
    /// Agent receives amount plus commission
    Credit,
}

impl LedgerLeg {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerLeg::Debit => "debit",
            LedgerLeg::Credit => "credit",
        }
    }
}

/// Stable key making a ledger call safe to retry
///
/// # Example
/// ```
/// use cash_courier_core_rs::ledger::{IdempotencyKey, LedgerLeg};
///
/// let a = IdempotencyKey::for_request("req-1", LedgerLeg::Debit);
/// let b = IdempotencyKey::for_request("req-1", LedgerLeg::Debit);
/// let c = IdempotencyKey::for_request("req-1", LedgerLeg::Credit);
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// SHA256 over `withdrawal:{request_id}:{leg}`
    pub fn for_request(request_id: &str, leg: LedgerLeg) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("withdrawal:{}:{}", request_id, leg.as_str()).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Balance after a ledger call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub account_id: String,
    pub new_balance: i64,
    /// The key had been applied before; nothing moved this time
    pub replayed: bool,
}

/// External ledger / balance-mutation collaborator
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Take `amount` from `account_id`
    async fn debit(
        &self,
        key: &IdempotencyKey,
        account_id: &str,
        amount: i64,
    ) -> Result<BalanceUpdate, LedgerError>;

    /// Give `amount` to `account_id`
    async fn credit(
        &self,
        key: &IdempotencyKey,
        account_id: &str,
        amount: i64,
    ) -> Result<BalanceUpdate, LedgerError>;
}

/// A movement the ledger applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub key: IdempotencyKey,
    pub leg: LedgerLeg,
    pub account_id: String,
    pub amount: i64,
    pub balance_after: i64,
}

#[derive(Debug, Default)]
struct LedgerBook {
    balances: HashMap<String, i64>,
    applied: HashMap<IdempotencyKey, JournalEntry>,
    journal: Vec<JournalEntry>,
    available: bool,
}

/// In-memory ledger
///
/// Debits require an open account with enough funds (no overdraft);
/// credits open the account on first use.
#[derive(Debug)]
pub struct MemoryLedger {
    book: Mutex<LedgerBook>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(LedgerBook {
                available: true,
                ..LedgerBook::default()
            }),
        }
    }

    /// Open (or reset) an account with an opening balance
    pub async fn open_account(&self, account_id: impl Into<String>, balance: i64) {
        self.book.lock().await.balances.insert(account_id.into(), balance);
    }

    pub async fn balance(&self, account_id: &str) -> Option<i64> {
        self.book.lock().await.balances.get(account_id).copied()
    }

    /// Every applied movement in order
    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.book.lock().await.journal.clone()
    }

    /// Simulate an outage: while unavailable every call fails
    pub async fn set_available(&self, available: bool) {
        self.book.lock().await.available = available;
    }

    async fn apply(
        &self,
        key: &IdempotencyKey,
        leg: LedgerLeg,
        account_id: &str,
        amount: i64,
    ) -> Result<BalanceUpdate, LedgerError> {
        let mut book = self.book.lock().await;
        if !book.available {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        if let Some(previous) = book.applied.get(key) {
            if previous.leg != leg || previous.account_id != account_id || previous.amount != amount {
                return Err(LedgerError::KeyConflict(key.to_string()));
            }
            let new_balance = book.balances.get(account_id).copied().unwrap_or(0);
            return Ok(BalanceUpdate {
                account_id: account_id.to_string(),
                new_balance,
                replayed: true,
            });
        }

        let balance_after = match leg {
            LedgerLeg::Debit => {
                let available = *book
                    .balances
                    .get(account_id)
                    .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))?;
                if available < amount {
                    return Err(LedgerError::InsufficientFunds {
                        account_id: account_id.to_string(),
                        required: amount,
                        available,
                    });
                }
                available - amount
            }
            LedgerLeg::Credit => book.balances.get(account_id).copied().unwrap_or(0) + amount,
        };

        book.balances.insert(account_id.to_string(), balance_after);
        let entry = JournalEntry {
            sequence: book.journal.len() as u64 + 1,
            key: key.clone(),
            leg,
            account_id: account_id.to_string(),
            amount,
            balance_after,
        };
        book.applied.insert(key.clone(), entry.clone());
        book.journal.push(entry);

        Ok(BalanceUpdate {
            account_id: account_id.to_string(),
            new_balance: balance_after,
            replayed: false,
        })
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn debit(
        &self,
        key: &IdempotencyKey,
        account_id: &str,
        amount: i64,
    ) -> Result<BalanceUpdate, LedgerError> {
        self.apply(key, LedgerLeg::Debit, account_id, amount).await
    }

    async fn credit(
        &self,
        key: &IdempotencyKey,
        account_id: &str,
        amount: i64,
    ) -> Result<BalanceUpdate, LedgerError> {
        self.apply(key, LedgerLeg::Credit, account_id, amount).await
    }
}
