//! Database row types and their conversion into domain values.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use wallet_types::{
    Balance, BalanceHistoryEntry, Direction, DiscountType, ErrorCode, FailureReason,
    HistoryCategory, Inquiry, InquiryId, Money, Order, OrderId, PaymentFamily, Receipt,
    ReferenceType, RepoError, ServiceType, Transaction, TransactionId, TransactionStatus, UserId,
    Voucher, VoucherId,
};

fn invalid(column: &str, value: &str) -> RepoError {
    RepoError::Database(format!("invalid {} in row: {}", column, value))
}

fn status(value: &str) -> Result<TransactionStatus, RepoError> {
    TransactionStatus::parse(value).ok_or_else(|| invalid("status", value))
}

fn family(value: &str) -> Result<PaymentFamily, RepoError> {
    PaymentFamily::parse(value).ok_or_else(|| invalid("family", value))
}

fn money(value: i64) -> Result<Money, RepoError> {
    Ok(Money::new(value)?)
}

fn optional_money(value: Option<i64>) -> Result<Option<Money>, RepoError> {
    value.map(money).transpose()
}

// ─────────────────────────────────────────────────────────────────────────────
// Balances
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
pub struct DbBalance {
    pub user_id: Uuid,
    pub amount: i64,
    pub pending_amount: i64,
    pub points: i64,
    pub updated_at: DateTime<Utc>,
}

impl DbBalance {
    pub fn into_domain(self) -> Result<Balance, RepoError> {
        Ok(Balance {
            user_id: UserId::from_uuid(self.user_id),
            amount: money(self.amount)?,
            pending_amount: money(self.pending_amount)?,
            points: self.points,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub struct DbHistoryEntry {
    pub user_id: Uuid,
    pub direction: String,
    pub category: String,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: String,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl DbHistoryEntry {
    pub fn into_domain(self) -> Result<BalanceHistoryEntry, RepoError> {
        Ok(BalanceHistoryEntry {
            user_id: UserId::from_uuid(self.user_id),
            direction: Direction::parse(&self.direction)
                .ok_or_else(|| invalid("direction", &self.direction))?,
            category: HistoryCategory::parse(&self.category)
                .ok_or_else(|| invalid("category", &self.category))?,
            amount: money(self.amount)?,
            balance_before: money(self.balance_before)?,
            balance_after: money(self.balance_after)?,
            reference_type: ReferenceType::parse(&self.reference_type)
                .ok_or_else(|| invalid("reference_type", &self.reference_type))?,
            reference_id: self.reference_id,
            created_at: self.created_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inquiries & Orders
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
pub struct DbInquiry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub family: String,
    pub service_type: String,
    pub target: String,
    pub product_code: Option<String>,
    pub description: Option<String>,
    pub price: i64,
    pub admin_fee: i64,
    pub voucher_codes: Vec<String>,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DbInquiry {
    pub fn into_domain(self) -> Result<Inquiry, RepoError> {
        Ok(Inquiry {
            id: InquiryId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            family: family(&self.family)?,
            service_type: ServiceType::new(self.service_type)?,
            target: self.target,
            product_code: self.product_code,
            description: self.description,
            price: money(self.price)?,
            admin_fee: money(self.admin_fee)?,
            voucher_codes: self.voucher_codes,
            status: status(&self.status)?,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
pub struct DbOrder {
    pub id: Uuid,
    pub inquiry_id: Uuid,
    pub user_id: Uuid,
    pub service_type: String,
    pub target: String,
    pub product_code: Option<String>,
    pub price: i64,
    pub admin_fee: i64,
    pub voucher_codes: Vec<String>,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DbOrder {
    pub fn into_domain(self) -> Result<Order, RepoError> {
        Ok(Order {
            id: OrderId::from_uuid(self.id),
            inquiry_id: InquiryId::from_uuid(self.inquiry_id),
            user_id: UserId::from_uuid(self.user_id),
            service_type: ServiceType::new(self.service_type)?,
            target: self.target,
            product_code: self.product_code,
            price: money(self.price)?,
            admin_fee: money(self.admin_fee)?,
            voucher_codes: self.voucher_codes,
            status: status(&self.status)?,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

pub const TRANSACTION_COLUMNS: &str = "id, user_id, family, payment_key, service_type, target, \
    product_code, amount, admin_fee, discount, total_payment, status, balance_before, \
    balance_after, provider_reference, serial_number, token, failure_code, failure_message, \
    voucher_ids, created_at, completed_at";

#[derive(FromRow)]
pub struct DbTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub family: String,
    pub payment_key: String,
    pub service_type: String,
    pub target: String,
    pub product_code: Option<String>,
    pub amount: i64,
    pub admin_fee: i64,
    pub discount: i64,
    pub total_payment: i64,
    pub status: String,
    pub balance_before: Option<i64>,
    pub balance_after: Option<i64>,
    pub provider_reference: Option<String>,
    pub serial_number: Option<String>,
    pub token: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub voucher_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DbTransaction {
    pub fn into_domain(self) -> Result<Transaction, RepoError> {
        let status = status(&self.status)?;

        // Receipts are only recorded for settled payments.
        let receipt = (status == TransactionStatus::Success).then(|| Receipt {
            serial_number: self.serial_number,
            token: self.token,
        });

        let failure = match self.failure_code {
            Some(code) => Some(FailureReason {
                code: ErrorCode::parse(&code).ok_or_else(|| invalid("failure_code", &code))?,
                message: self.failure_message.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Transaction {
            id: TransactionId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            family: family(&self.family)?,
            payment_key: self.payment_key.parse()?,
            service_type: ServiceType::new(self.service_type)?,
            target: self.target,
            product_code: self.product_code,
            amount: money(self.amount)?,
            admin_fee: money(self.admin_fee)?,
            discount: money(self.discount)?,
            total_payment: money(self.total_payment)?,
            status,
            balance_before: optional_money(self.balance_before)?,
            balance_after: optional_money(self.balance_after)?,
            provider_reference: self.provider_reference,
            receipt,
            failure,
            voucher_ids: self.voucher_ids.into_iter().map(VoucherId::from_uuid).collect(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vouchers
// ─────────────────────────────────────────────────────────────────────────────

pub const VOUCHER_COLUMNS: &str = "id, code, discount_type, discount_value, min_transaction, \
    max_discount, max_usage, max_usage_per_user, current_usage, service_types, is_active, \
    expires_at";

#[derive(FromRow)]
pub struct DbVoucher {
    pub id: Uuid,
    pub code: String,
    pub discount_type: String,
    pub discount_value: i64,
    pub min_transaction: i64,
    pub max_discount: Option<i64>,
    pub max_usage: i64,
    pub max_usage_per_user: i64,
    pub current_usage: i64,
    pub service_types: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DbVoucher {
    pub fn into_domain(self) -> Result<Voucher, RepoError> {
        Ok(Voucher {
            id: VoucherId::from_uuid(self.id),
            discount_type: DiscountType::parse(&self.discount_type)
                .ok_or_else(|| invalid("discount_type", &self.discount_type))?,
            code: self.code,
            discount_value: self.discount_value,
            min_transaction: money(self.min_transaction)?,
            max_discount: optional_money(self.max_discount)?,
            max_usage: self.max_usage,
            max_usage_per_user: self.max_usage_per_user,
            current_usage: self.current_usage,
            service_types: self.service_types,
            is_active: self.is_active,
            expires_at: self.expires_at,
        })
    }
}
