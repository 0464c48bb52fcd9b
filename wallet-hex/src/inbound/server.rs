//! HTTP Server configuration and startup.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use wallet_types::LedgerStore;

use super::handlers::{self, AppState};
use super::rate_limit::{RateLimiterState, rate_limit_middleware};
use crate::TransactionEngine;

/// HTTP Server for the Wallet API.
pub struct HttpServer<S: LedgerStore> {
    state: Arc<AppState<S>>,
    rate_limiter: Arc<RateLimiterState>,
}

impl<S: LedgerStore> HttpServer<S> {
    /// Creates a new HTTP server around the engine (100 req/min per caller).
    pub fn new(engine: Arc<TransactionEngine<S>>) -> Self {
        Self {
            state: Arc::new(AppState {
                engine,
                callback_secret: None,
            }),
            rate_limiter: Arc::new(RateLimiterState::default()),
        }
    }

    /// Creates a new HTTP server with custom rate limiting.
    pub fn with_rate_limit(engine: Arc<TransactionEngine<S>>, requests_per_minute: u32) -> Self {
        Self {
            state: Arc::new(AppState {
                engine,
                callback_secret: None,
            }),
            rate_limiter: Arc::new(RateLimiterState::new(
                requests_per_minute,
                Duration::from_secs(60),
            )),
        }
    }

    /// Enables the signed gateway callback route.
    pub fn with_callback_secret(self, secret: impl Into<String>) -> Self {
        let state = AppState {
            engine: self.state.engine.clone(),
            callback_secret: Some(secret.into()),
        };
        Self {
            state: Arc::new(state),
            rate_limiter: self.rate_limiter,
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/openapi.json", get(handlers::openapi_json))
            .route("/api/inquiries", post(handlers::create_inquiry::<S>))
            .route("/api/orders", post(handlers::create_order::<S>))
            .route(
                "/api/payments/prepaid/{order_id}",
                post(handlers::pay_prepaid::<S>),
            )
            .route(
                "/api/payments/postpaid/{inquiry_id}",
                post(handlers::pay_postpaid::<S>),
            )
            .route(
                "/api/payments/transfer/{inquiry_id}",
                post(handlers::pay_transfer::<S>),
            )
            .route("/api/transactions/{id}", get(handlers::get_transaction::<S>))
            .route(
                "/api/transactions/{id}/reconcile",
                post(handlers::reconcile_transaction::<S>),
            )
            .route(
                "/api/gateway/callback",
                post(handlers::gateway_callback::<S>),
            )
            .route("/api/balances/{user_id}", get(handlers::get_balance::<S>))
            .route(
                "/api/balances/{user_id}/history",
                get(handlers::list_history::<S>),
            )
            .route(
                "/api/balances/{user_id}/deposit",
                post(handlers::deposit::<S>),
            )
            .route(
                "/api/balances/{user_id}/reconciliation",
                get(handlers::reconcile_ledger::<S>),
            )
            .layer(middleware::from_fn_with_state(
                self.rate_limiter.clone(),
                rate_limit_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
