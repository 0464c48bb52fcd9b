//! Priced quotes (inquiries), prepaid orders and the payment key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::balance::HistoryCategory;
use super::id::{InquiryId, OrderId, UserId};
use super::money::Money;
use super::status::TransactionStatus;
use crate::error::DomainError;

/// Payment family. The three families share one execution protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentFamily {
    /// Mobile credit, data packages, e-wallet top-ups.
    Prepaid,
    /// Utility and subscription bills.
    Postpaid,
    /// Outgoing bank transfer.
    Transfer,
}

impl PaymentFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentFamily::Prepaid => "PREPAID",
            PaymentFamily::Postpaid => "POSTPAID",
            PaymentFamily::Transfer => "TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PREPAID" => Some(PaymentFamily::Prepaid),
            "POSTPAID" => Some(PaymentFamily::Postpaid),
            "TRANSFER" => Some(PaymentFamily::Transfer),
            _ => None,
        }
    }

    /// Only prepaid purchases pass through ORDER_PENDING.
    pub fn requires_order(&self) -> bool {
        matches!(self, PaymentFamily::Prepaid)
    }

    pub fn history_category(&self) -> HistoryCategory {
        match self {
            PaymentFamily::Prepaid => HistoryCategory::Prepaid,
            PaymentFamily::Postpaid => HistoryCategory::Postpaid,
            PaymentFamily::Transfer => HistoryCategory::Transfer,
        }
    }
}

impl std::fmt::Display for PaymentFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Biller service code such as `pulsa`, `pln` or `bank_transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "pulsa")]
pub struct ServiceType(String);

impl ServiceType {
    /// Voucher wildcard that matches every service.
    pub const ALL: &'static str = "all";

    pub fn new(code: impl Into<String>) -> Result<Self, DomainError> {
        let code = code.into().trim().to_lowercase();
        if code.is_empty() {
            return Err(DomainError::Validation("Service type cannot be empty".into()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Natural idempotency key of a payment: the order (prepaid) or inquiry
/// (postpaid, transfer) it settles.
///
/// Serialized as `order:<uuid>` or `inquiry:<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PaymentKey {
    Order(OrderId),
    Inquiry(InquiryId),
}

impl std::fmt::Display for PaymentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentKey::Order(id) => write!(f, "order:{}", id),
            PaymentKey::Inquiry(id) => write!(f, "inquiry:{}", id),
        }
    }
}

impl std::str::FromStr for PaymentKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::Validation(format!("Invalid payment key: {}", s));
        let (kind, id) = s.split_once(':').ok_or_else(invalid)?;
        match kind {
            "order" => id.parse().map(PaymentKey::Order).map_err(|_| invalid()),
            "inquiry" => id.parse().map(PaymentKey::Inquiry).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl From<PaymentKey> for String {
    fn from(key: PaymentKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for PaymentKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A time-boxed price or bill quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Inquiry {
    pub id: InquiryId,
    pub user_id: UserId,
    pub family: PaymentFamily,
    pub service_type: ServiceType,
    /// Phone number, meter number or bank account being paid.
    pub target: String,
    pub product_code: Option<String>,
    /// Customer or account-holder name returned by the biller, if any.
    pub description: Option<String>,
    pub price: Money,
    pub admin_fee: Money,
    pub voucher_codes: Vec<String>,
    pub status: TransactionStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Inquiry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn key(&self) -> PaymentKey {
        PaymentKey::Inquiry(self.id)
    }

    /// The payable view of this inquiry (postpaid, transfer).
    pub fn quote(&self) -> PaymentQuote {
        PaymentQuote {
            key: self.key(),
            user_id: self.user_id,
            family: self.family,
            service_type: self.service_type.clone(),
            target: self.target.clone(),
            product_code: self.product_code.clone(),
            price: self.price,
            admin_fee: self.admin_fee,
            voucher_codes: self.voucher_codes.clone(),
            status: self.status,
            expires_at: self.expires_at,
        }
    }
}

/// A prepaid purchase: a product quote combined into an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: OrderId,
    pub inquiry_id: InquiryId,
    pub user_id: UserId,
    pub service_type: ServiceType,
    pub target: String,
    pub product_code: Option<String>,
    pub price: Money,
    pub admin_fee: Money,
    pub voucher_codes: Vec<String>,
    pub status: TransactionStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Combines a prepaid inquiry into an order, moving the inquiry to
    /// ORDER_PENDING.
    pub fn place(
        inquiry: &mut Inquiry,
        voucher_codes: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<Order, DomainError> {
        inquiry.status = inquiry
            .status
            .transition(TransactionStatus::OrderPending, inquiry.family)?;

        Ok(Order {
            id: OrderId::new(),
            inquiry_id: inquiry.id,
            user_id: inquiry.user_id,
            service_type: inquiry.service_type.clone(),
            target: inquiry.target.clone(),
            product_code: inquiry.product_code.clone(),
            price: inquiry.price,
            admin_fee: inquiry.admin_fee,
            voucher_codes,
            status: TransactionStatus::OrderPending,
            expires_at,
            created_at: super::now(),
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn key(&self) -> PaymentKey {
        PaymentKey::Order(self.id)
    }

    pub fn quote(&self) -> PaymentQuote {
        PaymentQuote {
            key: self.key(),
            user_id: self.user_id,
            family: PaymentFamily::Prepaid,
            service_type: self.service_type.clone(),
            target: self.target.clone(),
            product_code: self.product_code.clone(),
            price: self.price,
            admin_fee: self.admin_fee,
            voucher_codes: self.voucher_codes.clone(),
            status: self.status,
            expires_at: self.expires_at,
        }
    }
}

/// Family-independent view of whatever a payment settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentQuote {
    pub key: PaymentKey,
    pub user_id: UserId,
    pub family: PaymentFamily,
    pub service_type: ServiceType,
    pub target: String,
    pub product_code: Option<String>,
    pub price: Money,
    pub admin_fee: Money,
    pub voucher_codes: Vec<String>,
    pub status: TransactionStatus,
    pub expires_at: DateTime<Utc>,
}

impl PaymentQuote {
    /// Price plus admin fee, before discounts.
    pub fn subtotal(&self) -> Result<Money, DomainError> {
        self.price.checked_add(self.admin_fee)
    }
}
