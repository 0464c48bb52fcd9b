//! Voucher definitions and the rules for applying them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::id::{TransactionId, UserId, VoucherId};
use super::inquiry::ServiceType;
use super::money::Money;
use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// `discount_value` is an absolute amount.
    Fixed,
    /// `discount_value` is a whole percentage of the amount.
    Percentage,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Fixed => "FIXED",
            DiscountType::Percentage => "PERCENTAGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FIXED" => Some(DiscountType::Fixed),
            "PERCENTAGE" => Some(DiscountType::Percentage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Voucher {
    pub id: VoucherId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_transaction: Money,
    /// Cap on the discount; `None` leaves it uncapped.
    pub max_discount: Option<Money>,
    pub max_usage: i64,
    pub max_usage_per_user: i64,
    pub current_usage: i64,
    /// Services this voucher applies to; `all` matches every service.
    pub service_types: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Why a voucher cannot be used for a candidate payment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoucherRejection {
    #[error("Voucher is not active")]
    Inactive,

    #[error("Voucher has expired")]
    Expired,

    #[error("Minimum transaction {minimum} not met by {amount}")]
    MinTransactionNotMet { minimum: Money, amount: Money },

    #[error("Voucher does not apply to service {0}")]
    ServiceNotAllowed(String),

    #[error("Voucher usage limit reached")]
    UsageExhausted,

    #[error("Voucher already used the maximum number of times by this user")]
    UserLimitReached,
}

impl VoucherRejection {
    pub fn code(&self) -> ErrorCode {
        match self {
            VoucherRejection::Inactive => ErrorCode::InvalidVoucher,
            VoucherRejection::Expired => ErrorCode::VoucherExpired,
            VoucherRejection::MinTransactionNotMet { .. } => ErrorCode::MinTransactionNotMet,
            VoucherRejection::ServiceNotAllowed(_) => ErrorCode::VoucherNotApplicable,
            VoucherRejection::UsageExhausted | VoucherRejection::UserLimitReached => {
                ErrorCode::VoucherUsed
            }
        }
    }
}

impl Voucher {
    pub fn allows_service(&self, service: &ServiceType) -> bool {
        self.service_types
            .iter()
            .any(|s| s.eq_ignore_ascii_case(ServiceType::ALL) || s.eq_ignore_ascii_case(service.as_str()))
    }

    /// Applicability of this voucher to `amount` for `service`, given how many
    /// times the user already consumed it.
    pub fn check_applicable(
        &self,
        service: &ServiceType,
        amount: Money,
        user_usage_count: i64,
        now: DateTime<Utc>,
    ) -> Result<(), VoucherRejection> {
        if !self.is_active {
            return Err(VoucherRejection::Inactive);
        }
        if self.expires_at.is_some_and(|at| now > at) {
            return Err(VoucherRejection::Expired);
        }
        if amount < self.min_transaction {
            return Err(VoucherRejection::MinTransactionNotMet {
                minimum: self.min_transaction,
                amount,
            });
        }
        if !self.allows_service(service) {
            return Err(VoucherRejection::ServiceNotAllowed(service.to_string()));
        }
        if self.current_usage >= self.max_usage {
            return Err(VoucherRejection::UsageExhausted);
        }
        if user_usage_count >= self.max_usage_per_user {
            return Err(VoucherRejection::UserLimitReached);
        }
        Ok(())
    }

    /// Discount for `amount`: never negative, never above `amount`.
    pub fn compute_discount(&self, amount: Money) -> Money {
        let raw = match self.discount_type {
            DiscountType::Fixed => self.discount_value.max(0),
            DiscountType::Percentage => {
                let pct = i128::from(self.discount_value.max(0));
                let value = i128::from(amount.amount()) * pct / 100;
                i64::try_from(value).unwrap_or(i64::MAX)
            }
        };

        let capped = match self.max_discount {
            Some(cap) => raw.min(cap.amount()),
            None => raw,
        };

        Money::new(capped.clamp(0, amount.amount())).unwrap_or_default()
    }
}

/// One consumption of a voucher by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVoucherUsage {
    pub voucher_id: VoucherId,
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub used_at: DateTime<Utc>,
}
