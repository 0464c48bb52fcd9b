//! OpenAPI specification and documentation.

#![allow(dead_code)] // Path functions are only used by utoipa for documentation generation

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};
use wallet_types::{
    Balance, BalanceHistoryEntry, CreateInquiryRequest, CreateOrderRequest, DepositRequest,
    ErrorBody, ErrorCode, ErrorMetadata, Inquiry, LedgerReport, Order, ProviderCallback,
    Transaction, TransactionStatus,
};

// Dummy functions to generate path documentation
// These are not the actual handlers, just for OpenAPI path generation

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = inline(serde_json::Value))
    )
)]
async fn health() {}

/// Price a product or look up a bill
#[utoipa::path(
    post,
    path = "/api/inquiries",
    tag = "inquiries",
    request_body = CreateInquiryRequest,
    responses(
        (status = 201, description = "Inquiry created", body = Inquiry),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 422, description = "Product or service unavailable", body = ErrorBody)
    )
)]
async fn create_inquiry() {}

/// Turn a prepaid inquiry into an order
#[utoipa::path(
    post,
    path = "/api/orders",
    tag = "inquiries",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = Order),
        (status = 409, description = "Inquiry already ordered", body = ErrorBody),
        (status = 410, description = "Inquiry expired", body = ErrorBody)
    )
)]
async fn create_order() {}

/// Pay a prepaid order
#[utoipa::path(
    post,
    path = "/api/payments/prepaid/{order_id}",
    tag = "payments",
    params(("order_id" = String, Path, description = "Order ID (UUID)")),
    responses(
        (status = 200, description = "Payment settled", body = Transaction),
        (status = 202, description = "Payment awaiting settlement", body = Transaction),
        (status = 402, description = "Insufficient balance", body = ErrorBody),
        (status = 410, description = "Order expired", body = ErrorBody),
        (status = 422, description = "Payment failed; metadata carries the transaction", body = ErrorBody)
    )
)]
async fn pay_prepaid() {}

/// Pay a postpaid bill
#[utoipa::path(
    post,
    path = "/api/payments/postpaid/{inquiry_id}",
    tag = "payments",
    params(("inquiry_id" = String, Path, description = "Inquiry ID (UUID)")),
    responses(
        (status = 200, description = "Payment settled", body = Transaction),
        (status = 202, description = "Payment awaiting settlement", body = Transaction),
        (status = 402, description = "Insufficient balance", body = ErrorBody),
        (status = 410, description = "Inquiry expired", body = ErrorBody),
        (status = 422, description = "Payment failed; metadata carries the transaction", body = ErrorBody)
    )
)]
async fn pay_postpaid() {}

/// Execute an outgoing bank transfer
#[utoipa::path(
    post,
    path = "/api/payments/transfer/{inquiry_id}",
    tag = "payments",
    params(("inquiry_id" = String, Path, description = "Inquiry ID (UUID)")),
    responses(
        (status = 200, description = "Transfer settled", body = Transaction),
        (status = 202, description = "Transfer awaiting settlement", body = Transaction),
        (status = 402, description = "Insufficient balance", body = ErrorBody),
        (status = 422, description = "Transfer failed; metadata carries the transaction", body = ErrorBody)
    )
)]
async fn pay_transfer() {}

/// Get a transaction
#[utoipa::path(
    get,
    path = "/api/transactions/{id}",
    tag = "transactions",
    params(("id" = String, Path, description = "Transaction ID (UUID)")),
    responses(
        (status = 200, description = "Transaction", body = Transaction),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
async fn get_transaction() {}

/// Query the gateway for a pending transaction
#[utoipa::path(
    post,
    path = "/api/transactions/{id}/reconcile",
    tag = "transactions",
    params(("id" = String, Path, description = "Transaction ID (UUID)")),
    responses(
        (status = 200, description = "Transaction after reconciliation", body = Transaction),
        (status = 502, description = "Gateway status query failed", body = ErrorBody)
    )
)]
async fn reconcile_transaction() {}

/// Gateway status push
#[utoipa::path(
    post,
    path = "/api/gateway/callback",
    tag = "transactions",
    request_body = ProviderCallback,
    security(("gateway_signature" = [])),
    responses(
        (status = 200, description = "Status applied", body = Transaction),
        (status = 401, description = "Missing or invalid signature", body = ErrorBody)
    )
)]
async fn gateway_callback() {}

/// Get a user's balance
#[utoipa::path(
    get,
    path = "/api/balances/{user_id}",
    tag = "balances",
    params(("user_id" = String, Path, description = "User ID (UUID)")),
    responses(
        (status = 200, description = "Balance", body = Balance)
    )
)]
async fn get_balance() {}

/// List balance history, newest first
#[utoipa::path(
    get,
    path = "/api/balances/{user_id}/history",
    tag = "balances",
    params(
        ("user_id" = String, Path, description = "User ID (UUID)"),
        ("limit" = Option<usize>, Query, description = "Maximum number of entries")
    ),
    responses(
        (status = 200, description = "History entries", body = Vec<BalanceHistoryEntry>)
    )
)]
async fn list_history() {}

/// Top up a balance
#[utoipa::path(
    post,
    path = "/api/balances/{user_id}/deposit",
    tag = "balances",
    params(("user_id" = String, Path, description = "User ID (UUID)")),
    request_body = DepositRequest,
    responses(
        (status = 200, description = "Balance after the deposit", body = Balance),
        (status = 400, description = "Invalid amount or reference", body = ErrorBody)
    )
)]
async fn deposit() {}

/// Check a balance against its history
#[utoipa::path(
    get,
    path = "/api/balances/{user_id}/reconciliation",
    tag = "balances",
    params(("user_id" = String, Path, description = "User ID (UUID)")),
    responses(
        (status = 200, description = "Ledger report", body = LedgerReport)
    )
)]
async fn reconcile_ledger() {}

/// OpenAPI documentation for the Wallet API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wallet Ledger API",
        version = "1.0.0",
        description = "Balance ledger and transaction engine for prepaid purchases, postpaid bills and bank transfers.\n\n## Gateway callbacks\n\n`POST /api/gateway/callback` must carry an `X-Signature` header with the hex HMAC-SHA256 of the raw body.",
    ),
    paths(
        health,
        create_inquiry,
        create_order,
        pay_prepaid,
        pay_postpaid,
        pay_transfer,
        get_transaction,
        reconcile_transaction,
        gateway_callback,
        get_balance,
        list_history,
        deposit,
        reconcile_ledger,
    ),
    components(
        schemas(
            CreateInquiryRequest,
            CreateOrderRequest,
            DepositRequest,
            ProviderCallback,
            Inquiry,
            Order,
            Transaction,
            TransactionStatus,
            Balance,
            BalanceHistoryEntry,
            LedgerReport,
            ErrorBody,
            ErrorCode,
            ErrorMetadata,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "inquiries", description = "Quotes and prepaid orders"),
        (name = "payments", description = "Payment execution"),
        (name = "transactions", description = "Transaction lookup and reconciliation"),
        (name = "balances", description = "Balances, history and top-ups"),
    )
)]
pub struct ApiDoc;

/// Security scheme for signed gateway callbacks.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "gateway_signature",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Signature"))),
            );
        }
    }
}
