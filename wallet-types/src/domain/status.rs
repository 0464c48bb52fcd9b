//! Payment state machine.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::inquiry::PaymentFamily;
use crate::error::DomainError;

/// Lifecycle status shared by inquiries, orders and transactions.
///
/// ```text
/// prepaid:            INQUIRY -> ORDER_PENDING -> PROCESSING -> SUCCESS | FAILED | REFUNDED
/// postpaid, transfer: INQUIRY -> PROCESSING -> SUCCESS | FAILED | REFUNDED
/// INQUIRY and ORDER_PENDING may also end in EXPIRED.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Inquiry,
    OrderPending,
    Processing,
    Success,
    Failed,
    Expired,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Inquiry => "INQUIRY",
            TransactionStatus::OrderPending => "ORDER_PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Expired => "EXPIRED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INQUIRY" => Some(TransactionStatus::Inquiry),
            "ORDER_PENDING" => Some(TransactionStatus::OrderPending),
            "PROCESSING" => Some(TransactionStatus::Processing),
            "SUCCESS" => Some(TransactionStatus::Success),
            "FAILED" => Some(TransactionStatus::Failed),
            "EXPIRED" => Some(TransactionStatus::Expired),
            "REFUNDED" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::Failed
                | TransactionStatus::Expired
                | TransactionStatus::Refunded
        )
    }

    /// Whether `self -> next` is an edge of the machine for `family`.
    pub fn can_transition(&self, next: TransactionStatus, family: PaymentFamily) -> bool {
        use TransactionStatus::*;

        match (self, next) {
            (Inquiry, OrderPending) => family.requires_order(),
            (Inquiry, Processing) => !family.requires_order(),
            (Inquiry, Expired) => true,
            (OrderPending, Processing) | (OrderPending, Expired) => family.requires_order(),
            (Processing, Success) | (Processing, Failed) | (Processing, Refunded) => true,
            _ => false,
        }
    }

    /// Moves to `next`, or reports the rejected edge.
    pub fn transition(
        self,
        next: TransactionStatus,
        family: PaymentFamily,
    ) -> Result<TransactionStatus, DomainError> {
        if self.can_transition(next, family) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
