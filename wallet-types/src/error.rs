//! Error types for the wallet engine.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{InquiryId, OrderId, TransactionStatus, VoucherRejection};

/// Domain-level errors (business rule violations).
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Amount overflow")]
    AmountOverflow,

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Voucher {code} rejected: {rejection}")]
    Voucher {
        code: String,
        rejection: VoucherRejection,
    },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Stable, user-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    NotFound,
    InsufficientBalance,
    DuplicateTransaction,
    InquiryExpired,
    OrderExpired,
    ProductUnavailable,
    ServiceUnavailable,
    InvalidVoucher,
    VoucherExpired,
    VoucherUsed,
    VoucherNotApplicable,
    MinTransactionNotMet,
    MaxVouchersExceeded,
    RateLimited,
    UpstreamError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorCode::DuplicateTransaction => "DUPLICATE_TRANSACTION",
            ErrorCode::InquiryExpired => "INQUIRY_EXPIRED",
            ErrorCode::OrderExpired => "ORDER_EXPIRED",
            ErrorCode::ProductUnavailable => "PRODUCT_UNAVAILABLE",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::InvalidVoucher => "INVALID_VOUCHER",
            ErrorCode::VoucherExpired => "VOUCHER_EXPIRED",
            ErrorCode::VoucherUsed => "VOUCHER_USED",
            ErrorCode::VoucherNotApplicable => "VOUCHER_NOT_APPLICABLE",
            ErrorCode::MinTransactionNotMet => "MIN_TRANSACTION_NOT_MET",
            ErrorCode::MaxVouchersExceeded => "MAX_VOUCHERS_EXCEEDED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    /// Fixed HTTP status class of this code.
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::ValidationError
            | ErrorCode::InvalidVoucher
            | ErrorCode::MaxVouchersExceeded => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::InsufficientBalance => 402,
            ErrorCode::NotFound => 404,
            ErrorCode::DuplicateTransaction | ErrorCode::VoucherUsed => 409,
            ErrorCode::InquiryExpired | ErrorCode::OrderExpired | ErrorCode::VoucherExpired => 410,
            ErrorCode::ProductUnavailable
            | ErrorCode::ServiceUnavailable
            | ErrorCode::VoucherNotApplicable
            | ErrorCode::MinTransactionNotMet => 422,
            ErrorCode::RateLimited => 429,
            ErrorCode::InternalError => 500,
            ErrorCode::UpstreamError => 502,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional throttling hints attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<u32>,
    /// Seconds until the caller may retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Application-level errors (for API responses).
///
/// Each variant maps to exactly one [`ErrorCode`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Inquiry {0} has expired")]
    InquiryExpired(InquiryId),

    #[error("Order {0} has expired")]
    OrderExpired(OrderId),

    #[error("{message}")]
    Unavailable { code: ErrorCode, message: String },

    #[error("Voucher not found: {0}")]
    UnknownVoucher(String),

    #[error("Voucher {code} rejected: {rejection}")]
    VoucherRejected {
        code: String,
        rejection: VoucherRejection,
    },

    #[error("At most {max} vouchers per transaction, got {got}")]
    MaxVouchersExceeded { max: usize, got: usize },

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { retry_after: u64 },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) => ErrorCode::ValidationError,
            AppError::Unauthorized(_) => ErrorCode::Unauthorized,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            AppError::DuplicateTransaction(_) => ErrorCode::DuplicateTransaction,
            AppError::InquiryExpired(_) => ErrorCode::InquiryExpired,
            AppError::OrderExpired(_) => ErrorCode::OrderExpired,
            AppError::Unavailable { code, .. } => *code,
            AppError::UnknownVoucher(_) => ErrorCode::InvalidVoucher,
            AppError::VoucherRejected { rejection, .. } => rejection.code(),
            AppError::MaxVouchersExceeded { .. } => ErrorCode::MaxVouchersExceeded,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Upstream(_) => ErrorCode::UpstreamError,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> u16 {
        self.code().status()
    }

    pub fn metadata(&self) -> Option<ErrorMetadata> {
        match self {
            AppError::RateLimited { retry_after } => Some(ErrorMetadata {
                remaining_attempts: Some(0),
                retry_after: Some(*retry_after),
            }),
            _ => None,
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientBalance {
                available,
                requested,
            } => AppError::InsufficientBalance {
                available,
                requested,
            },
            DomainError::Voucher { code, rejection } => {
                AppError::VoucherRejected { code, rejection }
            }
            DomainError::Validation(msg) => AppError::BadRequest(msg),
            e => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => e.into(),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Database(e) => AppError::Internal(e),
            RepoError::Transaction(e) => AppError::Internal(e),
            RepoError::Conflict(e) => AppError::DuplicateTransaction(e),
        }
    }
}
