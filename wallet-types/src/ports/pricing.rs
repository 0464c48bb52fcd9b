//! Pricing / biller inquiry port.

use crate::domain::{Money, PaymentFamily, ServiceType, UserId};
use crate::error::{AppError, ErrorCode};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PricingError {
    #[error("Product unavailable: {0}")]
    ProductUnavailable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::ProductUnavailable(message) => AppError::Unavailable {
                code: ErrorCode::ProductUnavailable,
                message,
            },
            PricingError::ServiceUnavailable(message) => AppError::Unavailable {
                code: ErrorCode::ServiceUnavailable,
                message,
            },
            PricingError::InvalidTarget(message) => AppError::BadRequest(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub user_id: UserId,
    pub family: PaymentFamily,
    pub service_type: ServiceType,
    pub target: String,
    pub product_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedQuote {
    pub price: Money,
    pub admin_fee: Money,
    /// Customer name, bill period and similar, when the biller returns one.
    pub description: Option<String>,
}

/// Port trait for the biller that prices products and looks up bills.
#[async_trait::async_trait]
pub trait PricingService: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<PricedQuote, PricingError>;
}
