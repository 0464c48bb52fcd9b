//! # Wallet Hex
//!
//! Transaction engine and HTTP adapter for the wallet ledger.
//!
//! ## Architecture
//!
//! - `engine/` - Transaction engine (orchestrates domain operations)
//! - `voucher/` - Voucher selection rules
//! - `idempotency/` - Replay detection on payment keys
//! - `reconcile/` - Settlement of PROCESSING transactions
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! The engine is generic over `S: LedgerStore`, allowing different
//! storage implementations to be injected.

pub mod engine;
pub mod idempotency;
pub mod inbound;
pub mod openapi;
pub mod reconcile;
pub mod voucher;

#[cfg(test)]
mod engine_tests;

pub use engine::{EngineConfig, TransactionEngine};
pub use idempotency::IdempotencyGuard;
pub use reconcile::ReconciliationWorker;
pub use voucher::{VoucherEngine, VoucherSelection};
