//! Data Transfer Objects (DTOs) for requests and responses.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{
    Balance, InquiryId, Money, PaymentFamily, Receipt, TransactionStatus, UserId,
};
use crate::error::{ErrorCode, ErrorMetadata};
use crate::ports::{ProviderReceipt, ProviderStatus};

// ─────────────────────────────────────────────────────────────────────────────
// Inquiry & Order DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request for a priced quote or bill lookup.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateInquiryRequest {
    pub user_id: UserId,
    pub family: PaymentFamily,
    #[schema(example = "pulsa")]
    pub service_type: String,
    /// Phone number, customer/meter number or bank account.
    #[schema(example = "081234567890")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "TSEL50")]
    pub product_code: Option<String>,
    /// Voucher codes to apply when paying a postpaid bill or transfer.
    #[serde(default)]
    pub voucher_codes: Vec<String>,
}

/// Request to turn a prepaid inquiry into an order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub inquiry_id: InquiryId,
    #[serde(default)]
    pub voucher_codes: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Balance DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to top up a balance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositRequest {
    /// Amount in minor units
    #[schema(example = 100000)]
    pub amount: i64,
    /// Top-up reference from the funding channel; replays are ignored.
    #[schema(example = "VA-20240101-0001")]
    pub reference: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HistoryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Result of checking a balance against its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerReport {
    pub user_id: UserId,
    pub balance: Money,
    /// Sum of signed history amounts.
    pub history_total: i64,
    pub entries: usize,
    /// `true` when every entry chains onto the previous one and the total
    /// equals the stored balance.
    pub consistent: bool,
}

impl LedgerReport {
    pub fn empty(balance: &Balance) -> Self {
        Self {
            user_id: balance.user_id,
            balance: balance.amount,
            history_total: 0,
            entries: 0,
            consistent: balance.amount.is_zero(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Status push sent by the settlement gateway.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderCallback {
    /// Provider reference of the payment.
    pub reference: String,
    /// One of SUCCESS, FAILED, REFUNDED, PENDING.
    #[schema(example = "SUCCESS")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProviderCallback {
    /// Parses the pushed status. Unknown statuses yield `None`.
    pub fn provider_status(&self) -> Option<ProviderStatus> {
        match self.status.to_ascii_uppercase().as_str() {
            "SUCCESS" => Some(ProviderStatus::Success(ProviderReceipt {
                provider_reference: self.reference.clone(),
                receipt: Receipt {
                    serial_number: self.serial_number.clone(),
                    token: self.token.clone(),
                },
            })),
            "FAILED" => Some(ProviderStatus::Failed {
                code: self
                    .error_code
                    .as_deref()
                    .and_then(ErrorCode::parse)
                    .unwrap_or(ErrorCode::ServiceUnavailable),
                message: self
                    .message
                    .clone()
                    .unwrap_or_else(|| "Payment failed at provider".into()),
            }),
            "REFUNDED" => Some(ProviderStatus::Refunded),
            "PENDING" => Some(ProviderStatus::Pending),
            _ => None,
        }
    }
}

/// Outcome of one reconciliation batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub resolved: usize,
    pub still_processing: usize,
    pub errors: usize,
}

impl ReconcileSummary {
    pub fn record(&mut self, status: TransactionStatus) {
        self.checked += 1;
        if status.is_terminal() {
            self.resolved += 1;
        } else {
            self.still_processing += 1;
        }
    }

    pub fn record_error(&mut self) {
        self.checked += 1;
        self.errors += 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub metadata: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: &ErrorMetadata) -> Self {
        self.metadata = serde_json::to_value(metadata).ok();
        self
    }
}
