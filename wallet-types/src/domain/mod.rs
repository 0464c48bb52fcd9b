//! Domain models for the wallet ledger.

pub mod balance;
pub mod id;
pub mod inquiry;
pub mod ledger;
pub mod money;
pub mod status;
pub mod transaction;
pub mod voucher;

pub use balance::{
    Balance, BalanceHistoryEntry, Direction, HistoryCategory, LedgerReference, ReferenceType,
};
pub use id::{InquiryId, OrderId, TransactionId, UserId, VoucherId};
pub use inquiry::{Inquiry, Order, PaymentFamily, PaymentKey, PaymentQuote, ServiceType};
pub use ledger::StagedLedger;
pub use money::Money;
pub use status::TransactionStatus;
pub use transaction::{FailureReason, Receipt, Transaction};
pub use voucher::{DiscountType, UserVoucherUsage, Voucher, VoucherRejection};

use chrono::{DateTime, SubsecRound, Utc};

/// Current time truncated to microseconds.
///
/// Postgres stores `timestamptz` with microsecond precision; truncating here
/// keeps a freshly built record equal to the same record read back.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
