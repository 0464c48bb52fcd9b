//! Notification port.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Money, PaymentKey, Transaction, TransactionId, TransactionStatus, UserId};

/// Payload sent when a transaction reaches a reportable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub payment_key: PaymentKey,
    pub status: TransactionStatus,
    pub total_payment: Money,
    pub balance_after: Option<Money>,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            user_id: tx.user_id,
            payment_key: tx.payment_key,
            status: tx.status,
            total_payment: tx.total_payment,
            balance_after: tx.balance_after,
            occurred_at: tx.completed_at.unwrap_or(tx.created_at),
        }
    }
}

/// Fire-and-forget dispatch. Implementations must not block and must not
/// report failure to the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: PaymentEvent);
}
