//! # Wallet Types
//!
//! Domain types and port traits for the wallet balance ledger and
//! transaction-execution engine. This crate has ZERO external IO
//! dependencies - only data structures, business rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Pure domain types (Balance, Inquiry, Transaction, Voucher)
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Data Transfer Objects for API boundaries
//! - `error/` - Domain and application error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{
    Balance, BalanceHistoryEntry, DiscountType, Direction, HistoryCategory, Inquiry, InquiryId,
    FailureReason, LedgerReference, Money, Order, OrderId, PaymentFamily, PaymentKey, PaymentQuote, Receipt,
    ReferenceType, ServiceType, StagedLedger, Transaction, TransactionId, TransactionStatus,
    UserId, UserVoucherUsage, Voucher, VoucherId, VoucherRejection,
};
pub use dto::*;
pub use error::{AppError, DomainError, ErrorCode, ErrorMetadata, RepoError};
pub use ports::{
    BalanceScope, GatewayError, LedgerStore, Notifier, PaymentEvent, PaymentSubmission,
    PricedQuote, PricingError, PricingService, ProviderReceipt, ProviderStatus, QuoteRequest,
    SettlementGateway, StatusQuery, SubmitOutcome,
};
