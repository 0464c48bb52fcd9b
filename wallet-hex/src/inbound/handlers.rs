//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use wallet_gateway::security::{SIGNATURE_HEADER, verify_signature};
use wallet_types::{
    AppError, CreateInquiryRequest, CreateOrderRequest, DepositRequest, ErrorBody, HistoryQuery,
    InquiryId, LedgerStore, OrderId, ProviderCallback, Transaction, TransactionId,
    TransactionStatus, UserId,
};

use crate::TransactionEngine;

/// Application state shared across handlers.
pub struct AppState<S: LedgerStore> {
    pub engine: Arc<TransactionEngine<S>>,
    /// Shared secret for gateway callbacks; callbacks are refused when unset.
    pub callback_secret: Option<String>,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
        }

        let mut body = ErrorBody::new(err.code(), err.to_string());
        if let Some(metadata) = err.metadata() {
            body = body.with_metadata(&metadata);
        }

        (status, Json(body)).into_response()
    }
}

/// Status-dependent response for an executed payment.
///
/// FAILED is reported as an error body carrying the transaction.
fn payment_response(tx: Transaction) -> Response {
    match tx.status {
        TransactionStatus::Processing => (StatusCode::ACCEPTED, Json(tx)).into_response(),
        TransactionStatus::Failed => {
            let (code, message) = match &tx.failure {
                Some(reason) => (reason.code, reason.message.clone()),
                None => (
                    wallet_types::ErrorCode::ServiceUnavailable,
                    "Payment failed".to_string(),
                ),
            };
            let mut body = ErrorBody::new(code, message);
            body.metadata = Some(serde_json::json!({ "transaction": tx }));
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        }
        _ => (StatusCode::OK, Json(tx)).into_response(),
    }
}

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid {} ID", what)))
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Inquiries & Orders
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn create_inquiry<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateInquiryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let inquiry = state.engine.create_inquiry(req).await?;
    Ok((StatusCode::CREATED, Json(inquiry)))
}

#[tracing::instrument(skip(state, req), fields(inquiry_id = %req.inquiry_id))]
pub async fn create_order<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.engine.create_prepaid_order(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Payments
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state), fields(order_id = %id))]
pub async fn pay_prepaid<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let tx = state.engine.execute_prepaid_payment(order_id).await?;
    Ok(payment_response(tx))
}

#[tracing::instrument(skip(state), fields(inquiry_id = %id))]
pub async fn pay_postpaid<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let inquiry_id: InquiryId = parse_id(&id, "inquiry")?;
    let tx = state.engine.execute_postpaid_payment(inquiry_id).await?;
    Ok(payment_response(tx))
}

#[tracing::instrument(skip(state), fields(inquiry_id = %id))]
pub async fn pay_transfer<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let inquiry_id: InquiryId = parse_id(&id, "inquiry")?;
    let tx = state.engine.execute_transfer(inquiry_id).await?;
    Ok(payment_response(tx))
}

#[tracing::instrument(skip(state), fields(transaction_id = %id))]
pub async fn get_transaction<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction_id: TransactionId = parse_id(&id, "transaction")?;
    let tx = state.engine.get_transaction(transaction_id).await?;
    Ok(Json(tx))
}

#[tracing::instrument(skip(state), fields(transaction_id = %id))]
pub async fn reconcile_transaction<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction_id: TransactionId = parse_id(&id, "transaction")?;
    let tx = state.engine.reconcile(transaction_id).await?;
    Ok(Json(tx))
}

/// Status push from the settlement gateway, signed with the shared secret.
#[tracing::instrument(skip(state, headers, body))]
pub async fn gateway_callback<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let secret = state
        .callback_secret
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Gateway callbacks are not configured".into()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing signature".into()))?;
    if !verify_signature(&body, signature, secret) {
        tracing::warn!("Rejected gateway callback with a bad signature");
        return Err(AppError::Unauthorized("Invalid signature".into()).into());
    }

    let callback: ProviderCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid callback body: {}", e)))?;
    let status = callback.provider_status().ok_or_else(|| {
        AppError::BadRequest(format!("Unknown callback status {}", callback.status))
    })?;

    let tx = state
        .engine
        .apply_provider_status(&callback.reference, status)
        .await?;
    Ok(Json(tx))
}

// ─────────────────────────────────────────────────────────────────────────────
// Balances
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state), fields(user_id = %id))]
pub async fn get_balance<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id: UserId = parse_id(&id, "user")?;
    let balance = state.engine.get_balance(user_id).await?;
    Ok(Json(balance))
}

#[tracing::instrument(skip(state, query), fields(user_id = %id))]
pub async fn list_history<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id: UserId = parse_id(&id, "user")?;
    let history = state.engine.list_history(user_id, query.limit).await?;
    Ok(Json(history))
}

#[tracing::instrument(skip(state, req), fields(user_id = %id, amount = req.amount))]
pub async fn deposit<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<DepositRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id: UserId = parse_id(&id, "user")?;
    let balance = state.engine.deposit(user_id, req).await?;
    Ok(Json(balance))
}

#[tracing::instrument(skip(state), fields(user_id = %id))]
pub async fn reconcile_ledger<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id: UserId = parse_id(&id, "user")?;
    let report = state.engine.reconcile_ledger(user_id).await?;
    Ok(Json(report))
}

pub async fn openapi_json() -> impl IntoResponse {
    use utoipa::OpenApi;
    Json(crate::openapi::ApiDoc::openapi())
}
