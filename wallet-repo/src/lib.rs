//! # Wallet Repository
//!
//! Storage adapters implementing the `LedgerStore` port.
//!
//! - [`MemoryStore`] is always available and backs the test suites.
//! - [`PostgresStore`] (feature `postgres`) uses `SELECT ... FOR UPDATE` row
//!   locks inside a database transaction per balance scope.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
mod types;


pub use memory::{MemoryScope, MemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresScope, PostgresStore};
