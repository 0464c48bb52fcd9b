//! Settlement gateway port.

use crate::domain::{Money, PaymentFamily, Receipt, ServiceType, TransactionId};
use crate::error::ErrorCode;

/// Error type for gateway calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The gateway definitively refused the payment.
    #[error("Rejected by gateway ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },

    /// The request never reached the gateway.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Transient conditions worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout | GatewayError::Unavailable(_) | GatewayError::Transport(_) => {
                true
            }
            GatewayError::Upstream { status, .. } => *status >= 500,
            GatewayError::Rejected { .. } | GatewayError::InvalidResponse(_) => false,
        }
    }

    /// The gateway may have accepted the payment even though we got no
    /// usable answer.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout
                | GatewayError::Upstream { .. }
                | GatewayError::Transport(_)
                | GatewayError::InvalidResponse(_)
        )
    }
}

/// A payment handed to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSubmission {
    /// Stable per payment key; lets the gateway deduplicate retries.
    pub idempotency_key: String,
    pub transaction_id: TransactionId,
    pub family: PaymentFamily,
    pub service_type: ServiceType,
    pub target: String,
    pub product_code: Option<String>,
    /// Amount billed by the provider (price plus admin fee).
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub provider_reference: String,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Settled synchronously.
    Completed(ProviderReceipt),
    /// Accepted for asynchronous settlement.
    Accepted { provider_reference: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusQuery {
    pub transaction_id: TransactionId,
    pub idempotency_key: String,
    pub provider_reference: Option<String>,
}

impl StatusQuery {
    /// Identifier the gateway knows the payment by: its own reference once
    /// it has assigned one, otherwise the transaction id sent on submit.
    pub fn lookup_reference(&self) -> String {
        self.provider_reference
            .clone()
            .unwrap_or_else(|| self.transaction_id.to_string())
    }
}

/// The gateway's view of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Success(ProviderReceipt),
    Failed { code: ErrorCode, message: String },
    /// Reversed by the provider before it settled with us.
    Refunded,
    Pending,
}

/// Port trait for the outbound settlement/biller gateway.
#[async_trait::async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn submit(&self, payment: &PaymentSubmission) -> Result<SubmitOutcome, GatewayError>;

    async fn query_status(&self, query: &StatusQuery) -> Result<ProviderStatus, GatewayError>;
}
