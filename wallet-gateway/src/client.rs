//! HTTP client for the settlement/biller gateway.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use wallet_types::{
    ErrorCode, GatewayError, Money, PaymentFamily, PaymentSubmission, PricedQuote, PricingError,
    PricingService, ProviderReceipt, ProviderStatus, QuoteRequest, Receipt, SettlementGateway,
    StatusQuery, SubmitOutcome,
};

/// Gateway client configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <api_key>`.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// The gateway deduplicates submissions by `Idempotency-Key`, which
    /// makes retrying a submission safe.
    pub supports_idempotency_key: bool,
    pub max_retries: usize,
    /// First retry delay; each further retry doubles it.
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            supports_idempotency_key: false,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    /// Backoff between attempts: `base`, `2 * base`, `4 * base`, ...
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.retry_base_delay)
            .with_factor(2.0)
            .with_max_delay(self.retry_base_delay * 8)
            .with_max_times(self.max_retries)
    }

    /// The concrete delays [`GatewayConfig::backoff`] produces.
    pub fn retry_schedule(&self) -> Vec<Duration> {
        self.backoff().build().collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    reference: String,
    family: PaymentFamily,
    service_type: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_code: Option<&'a str>,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct PaymentBody {
    status: String,
    #[serde(default)]
    provider_reference: Option<String>,
    #[serde(default)]
    serial_number: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PaymentBody {
    fn receipt(self, fallback_reference: &str) -> ProviderReceipt {
        ProviderReceipt {
            provider_reference: self
                .provider_reference
                .unwrap_or_else(|| fallback_reference.to_string()),
            receipt: Receipt {
                serial_number: self.serial_number,
                token: self.token,
            },
        }
    }

    fn failure(&self) -> (ErrorCode, String) {
        (
            rejection_code(self.error_code.as_deref()),
            self.message
                .clone()
                .unwrap_or_else(|| "Payment rejected by provider".to_string()),
        )
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct InquiryBody<'a> {
    family: PaymentFamily,
    service_type: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_code: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    price: i64,
    #[serde(default)]
    admin_fee: i64,
    #[serde(default)]
    description: Option<String>,
}

/// Provider codes outside our taxonomy are reported as the service being
/// unavailable.
fn rejection_code(code: Option<&str>) -> ErrorCode {
    match code.and_then(ErrorCode::parse) {
        Some(code @ (ErrorCode::ProductUnavailable | ErrorCode::ServiceUnavailable)) => code,
        Some(ErrorCode::ValidationError) => ErrorCode::ValidationError,
        _ => ErrorCode::ServiceUnavailable,
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else if err.is_connect() {
        GatewayError::Unavailable(err.to_string())
    } else {
        GatewayError::Transport(err.to_string())
    }
}

async fn error_from_response(resp: Response) -> GatewayError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();

    if status.is_server_error() {
        return GatewayError::Upstream {
            status: status.as_u16(),
            message: text,
        };
    }

    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    let (code, message) = match body {
        Some(b) => (b.code, b.message),
        None => (None, None),
    };
    GatewayError::Rejected {
        code: rejection_code(code.as_deref()),
        message: message.unwrap_or_else(|| format!("Gateway returned {}", status)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Settlement gateway client.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    http: Client,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.config.api_key)
    }

    async fn send_submit(&self, payment: &PaymentSubmission) -> Result<PaymentBody, GatewayError> {
        let body = SubmitBody {
            reference: payment.transaction_id.to_string(),
            family: payment.family,
            service_type: payment.service_type.as_str(),
            target: &payment.target,
            product_code: payment.product_code.as_deref(),
            amount: payment.amount.amount(),
        };

        let mut req = self.authorized(self.http.post(self.url("/v1/payments"))).json(&body);
        if self.config.supports_idempotency_key {
            req = req.header("Idempotency-Key", &payment.idempotency_key);
        }

        let resp = req.send().await.map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn send_status(&self, reference: &str) -> Result<Option<PaymentBody>, GatewayError> {
        let resp = self
            .authorized(
                self.http
                    .get(self.url(&format!("/v1/payments/{}/status", reference))),
            )
            .send()
            .await
            .map_err(transport_error)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        resp.json()
            .await
            .map(Some)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn send_inquiry(&self, request: &QuoteRequest) -> Result<QuoteBody, GatewayError> {
        let body = InquiryBody {
            family: request.family,
            service_type: request.service_type.as_str(),
            target: &request.target,
            product_code: request.product_code.as_deref(),
        };

        let resp = self
            .authorized(self.http.post(self.url("/v1/inquiries")))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl SettlementGateway for GatewayClient {
    #[instrument(skip(self, payment), fields(transaction_id = %payment.transaction_id, key = %payment.idempotency_key))]
    async fn submit(&self, payment: &PaymentSubmission) -> Result<SubmitOutcome, GatewayError> {
        let body = if self.config.supports_idempotency_key {
            (|| async { self.send_submit(payment).await })
                .retry(self.config.backoff())
                .when(GatewayError::is_retryable)
                .notify(|err, delay| warn!(error = %err, ?delay, "Retrying gateway submission"))
                .await?
        } else {
            self.send_submit(payment).await?
        };

        let fallback = payment.transaction_id.to_string();
        match body.status.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(SubmitOutcome::Completed(body.receipt(&fallback))),
            "PENDING" | "PROCESSING" => Ok(SubmitOutcome::Accepted {
                provider_reference: body.provider_reference.unwrap_or(fallback),
            }),
            "FAILED" => {
                let (code, message) = body.failure();
                Err(GatewayError::Rejected { code, message })
            }
            other => Err(GatewayError::InvalidResponse(format!(
                "Unknown payment status {}",
                other
            ))),
        }
    }

    #[instrument(skip(self, query), fields(transaction_id = %query.transaction_id))]
    async fn query_status(&self, query: &StatusQuery) -> Result<ProviderStatus, GatewayError> {
        let reference = query.lookup_reference();
        let body = (|| async { self.send_status(&reference).await })
            .retry(self.config.backoff())
            .when(GatewayError::is_retryable)
            .notify(|err, delay| warn!(error = %err, ?delay, "Retrying gateway status query"))
            .await?;

        let Some(body) = body else {
            debug!(reference = %reference, "Gateway has no record of payment");
            return Ok(ProviderStatus::Failed {
                code: ErrorCode::ServiceUnavailable,
                message: "Payment not found at gateway".to_string(),
            });
        };

        match body.status.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(ProviderStatus::Success(body.receipt(&reference))),
            "FAILED" => {
                let (code, message) = body.failure();
                Ok(ProviderStatus::Failed { code, message })
            }
            "REFUNDED" | "REVERSED" => Ok(ProviderStatus::Refunded),
            "PENDING" | "PROCESSING" => Ok(ProviderStatus::Pending),
            other => Err(GatewayError::InvalidResponse(format!(
                "Unknown payment status {}",
                other
            ))),
        }
    }
}

#[async_trait::async_trait]
impl PricingService for GatewayClient {
    #[instrument(skip(self, request), fields(service = %request.service_type, target = %request.target))]
    async fn quote(&self, request: &QuoteRequest) -> Result<PricedQuote, PricingError> {
        let body = (|| async { self.send_inquiry(request).await })
            .retry(self.config.backoff())
            .when(GatewayError::is_retryable)
            .await
            .map_err(|e| match e {
                GatewayError::Rejected {
                    code: ErrorCode::ProductUnavailable,
                    message,
                } => PricingError::ProductUnavailable(message),
                GatewayError::Rejected {
                    code: ErrorCode::ValidationError,
                    message,
                } => PricingError::InvalidTarget(message),
                other => PricingError::ServiceUnavailable(other.to_string()),
            })?;

        let invalid = |_| PricingError::ServiceUnavailable("Biller returned a negative price".into());
        Ok(PricedQuote {
            price: Money::new(body.price).map_err(invalid)?,
            admin_fee: Money::new(body.admin_fee).map_err(invalid)?,
            description: body.description,
        })
    }
}
