//! # Wallet Gateway
//!
//! Outbound adapters for the wallet engine:
//! - [`GatewayClient`]: settlement gateway and biller pricing over HTTP
//! - [`TracingNotifier`] / [`WebhookNotifier`]: fire-and-forget payment events
//! - [`security`]: HMAC-SHA256 signing shared by callbacks and webhooks

pub mod client;
pub mod notify;
pub mod security;

pub use client::{GatewayClient, GatewayConfig};
pub use notify::{TracingNotifier, WebhookNotifier};
