//! Withdrawal settlement
//!
//! Moves the money for a completed handover: the requester is debited the
//! withdrawn amount, the agent is credited amount plus commission.
//!
//! # Critical Invariants
//!
//! 1. Each leg uses its own idempotency key derived from the request id
//! 2. Debit runs before credit; a failed debit means no credit is attempted
//! 3. A retry after a partial failure replays the applied leg as a no-op

use crate::ledger::{BalanceUpdate, IdempotencyKey, Ledger, LedgerError, LedgerLeg};
use crate::models::WithdrawalRequest;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Outcome of settling one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub request_id: String,
    pub debited: i64,
    pub credited: i64,
    pub commission: i64,
    pub requester_balance: i64,
    pub agent_balance: i64,
    /// Both legs had already been applied by an earlier attempt
    pub replayed: bool,
}

/// Debit the requester and credit the assigned agent
///
/// # Errors
/// Returns the ledger's error unchanged. The request itself is not touched;
/// the caller decides whether the completion stays retryable.
pub async fn settle_withdrawal(
    ledger: &dyn Ledger,
    request: &WithdrawalRequest,
    commission: i64,
) -> Result<Settlement, LedgerError> {
    let agent_id = request
        .agent_id()
        .ok_or_else(|| LedgerError::UnknownAccount(format!("agent of request {}", request.id())))?;

    let debit_key = IdempotencyKey::for_request(request.id(), LedgerLeg::Debit);
    let debit: BalanceUpdate = ledger
        .debit(&debit_key, request.requester_id(), request.amount())
        .await
        .map_err(|e| {
            warn!("Debit for request {} failed: {}", request.id(), e);
            e
        })?;

    let credited = request.amount() + commission;
    let credit_key = IdempotencyKey::for_request(request.id(), LedgerLeg::Credit);
    let credit = ledger
        .credit(&credit_key, agent_id, credited)
        .await
        .map_err(|e| {
            warn!(
                "Credit for request {} failed after debit was applied: {}",
                request.id(),
                e
            );
            e
        })?;

    debug!(
        "Settled request {}: debited {} from {}, credited {} to {}",
        request.id(),
        request.amount(),
        request.requester_id(),
        credited,
        agent_id
    );

    Ok(Settlement {
        request_id: request.id().to_string(),
        debited: request.amount(),
        credited,
        commission,
        requester_balance: debit.new_balance,
        agent_balance: credit.new_balance,
        replayed: debit.replayed && credit.replayed,
    })
}
