//! Port traits (interfaces for adapters).
//!
//! The engine depends on these traits; storage, gateway and notification
//! adapters implement them.

mod gateway;
mod notifier;
mod pricing;
mod store;

pub use gateway::{
    GatewayError, PaymentSubmission, ProviderReceipt, ProviderStatus, SettlementGateway,
    StatusQuery, SubmitOutcome,
};
pub use notifier::{Notifier, PaymentEvent};
pub use pricing::{PricedQuote, PricingError, PricingService, QuoteRequest};
pub use store::{BalanceScope, LedgerStore};
