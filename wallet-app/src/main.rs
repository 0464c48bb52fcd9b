//! # Wallet Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the ledger store
//! - Build the gateway client, notifier and transaction engine
//! - Start the reconciliation worker and the HTTP server

mod config;

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace as sdktrace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wallet_gateway::{GatewayClient, WebhookNotifier};
use wallet_hex::{ReconciliationWorker, TransactionEngine, inbound::HttpServer};
use wallet_types::LedgerStore;

use config::Config;

/// OTLP export is enabled only when a collector endpoint is configured.
fn init_tracer() -> anyhow::Result<Option<(sdktrace::Tracer, sdktrace::SdkTracerProvider)>> {
    if std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_none() {
        return Ok(None);
    }

    global::set_text_map_propagator(TraceContextPropagator::new());

    // gRPC exporter with batch processing (non-blocking)
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok(Some((provider.tracer("wallet-service"), provider)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let otel = init_tracer()?;
    let telemetry = otel
        .as_ref()
        .map(|(tracer, _)| tracing_opentelemetry::layer().with_tracer(tracer.clone()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wallet_app=debug,wallet_hex=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry)
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting wallet server on port {}", config.port);

    let result = run(config).await;

    // Ensure traces are flushed before exit
    if let Some((_, provider)) = otel {
        let _ = provider.shutdown();
    }
    result
}

#[cfg(feature = "postgres")]
async fn run(config: Config) -> anyhow::Result<()> {
    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;
    tracing::info!("Using database: {}", database_url);

    // Connects and runs migrations
    let store = wallet_repo::PostgresStore::new(&database_url).await?;
    serve(store, config).await
}

#[cfg(not(feature = "postgres"))]
async fn run(config: Config) -> anyhow::Result<()> {
    tracing::warn!("Built without the postgres feature; balances are kept in memory");
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is ignored by this build");
    }
    serve(wallet_repo::MemoryStore::new(), config).await
}

async fn serve<S: LedgerStore>(store: S, config: Config) -> anyhow::Result<()> {
    let gateway = Arc::new(GatewayClient::new(config.gateway.clone())?);
    tracing::info!(
        base_url = %config.gateway.base_url,
        idempotency_keys = config.gateway.supports_idempotency_key,
        "Settlement gateway configured"
    );

    let mut engine = TransactionEngine::new(store, gateway.clone(), gateway, config.engine.clone());
    if let Some(webhook) = &config.webhook {
        let (notifier, _sender) = WebhookNotifier::spawn(webhook.url.clone(), webhook.secret.clone());
        engine = engine.with_notifier(Arc::new(notifier));
        tracing::info!("Payment events are posted to {}", webhook.url);
    }
    let engine = Arc::new(engine);

    let worker = ReconciliationWorker::new(
        engine.clone(),
        config.reconcile_interval,
        config.reconcile_batch_size,
    );
    tokio::spawn(worker.run());

    let mut server = HttpServer::with_rate_limit(engine, config.rate_limit_per_minute);
    match config.callback_secret {
        Some(secret) => server = server.with_callback_secret(secret),
        None => tracing::warn!("GATEWAY_CALLBACK_SECRET is not set; gateway callbacks are refused"),
    }

    let addr = format!("0.0.0.0:{}", config.port);
    server.run(&addr).await
}
