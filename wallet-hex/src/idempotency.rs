//! Replay detection keyed on the order or inquiry a payment settles.

use tracing::info;

use wallet_types::{AppError, BalanceScope, LedgerStore, PaymentKey, Transaction};

/// Looks up the transaction already recorded for a payment key.
///
/// A key maps to at most one transaction; finding one means the request is
/// a replay and the stored transaction is the answer.
pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Unlocked check, done before any balance work.
    pub async fn lookup<S: LedgerStore>(
        store: &S,
        key: &PaymentKey,
    ) -> Result<Option<Transaction>, AppError> {
        let existing = store.find_transaction_by_key(key).await?;
        if let Some(tx) = &existing {
            info!(payment_key = %key, transaction_id = %tx.id, status = %tx.status, "Replaying transaction");
        }
        Ok(existing)
    }

    /// Check under the balance lock; catches a concurrent request that
    /// committed while this one waited.
    pub async fn confirm<B: BalanceScope>(
        scope: &mut B,
        key: &PaymentKey,
    ) -> Result<Option<Transaction>, AppError> {
        let existing = scope.find_transaction_by_key(key).await?;
        if let Some(tx) = &existing {
            info!(payment_key = %key, transaction_id = %tx.id, status = %tx.status, "Concurrent request already settled this key");
        }
        Ok(existing)
    }
}
