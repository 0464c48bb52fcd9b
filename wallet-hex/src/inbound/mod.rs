//! HTTP Inbound Adapter
//!
//! Axum-based HTTP server that drives the transaction engine.

pub mod handlers;
pub mod rate_limit;
mod server;

pub use server::HttpServer;
