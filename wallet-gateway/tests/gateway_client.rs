//! GatewayClient HTTP behaviour against a mock gateway.

use std::time::Duration;

use serde_json::json;
use wallet_gateway::{GatewayClient, GatewayConfig};
use wallet_types::{
    ErrorCode, GatewayError, Money, PaymentFamily, PaymentSubmission, PricingError,
    PricingService, ProviderStatus, QuoteRequest, ServiceType, SettlementGateway, StatusQuery,
    SubmitOutcome, TransactionId, UserId,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        base_url: server.uri(),
        api_key: "gw_test_key".to_string(),
        timeout: Duration::from_millis(500),
        supports_idempotency_key: false,
        max_retries: 3,
        retry_base_delay: Duration::from_millis(5),
    }
}

fn submission() -> PaymentSubmission {
    PaymentSubmission {
        idempotency_key: "order:5b0c3a52-0b0e-4a53-9d7c-0f1a2b3c4d5e".to_string(),
        transaction_id: TransactionId::new(),
        family: PaymentFamily::Prepaid,
        service_type: ServiceType::new("pulsa").unwrap(),
        target: "081234567890".to_string(),
        product_code: Some("TSEL50".to_string()),
        amount: Money::new(51_500).unwrap(),
    }
}

fn status_query(reference: &str) -> StatusQuery {
    StatusQuery {
        transaction_id: TransactionId::new(),
        idempotency_key: "inquiry:1".to_string(),
        provider_reference: Some(reference.to_string()),
    }
}

#[tokio::test]
async fn test_submit_sends_bearer_token_and_parses_receipt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .and(header("authorization", "Bearer gw_test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCESS",
            "provider_reference": "GW-100",
            "serial_number": "SN-777"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let outcome = client.submit(&submission()).await.unwrap();

    match outcome {
        SubmitOutcome::Completed(receipt) => {
            assert_eq!(receipt.provider_reference, "GW-100");
            assert_eq!(receipt.receipt.serial_number.as_deref(), Some("SN-777"));
        }
        other => panic!("expected completed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_pending_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "status": "PENDING",
            "provider_reference": "GW-101"
        })))
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let outcome = client.submit(&submission()).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Accepted {
            provider_reference: "GW-101".to_string()
        }
    );
}

#[tokio::test]
async fn test_submit_not_retried_without_idempotency_support() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let err = client.submit(&submission()).await.unwrap_err();

    assert!(matches!(err, GatewayError::Upstream { status: 503, .. }));
    assert!(err.is_ambiguous());
}

#[tokio::test]
async fn test_submit_retried_with_idempotency_key_when_supported() {
    let server = MockServer::start().await;
    let payment = submission();

    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .and(header("idempotency-key", payment.idempotency_key.as_str()))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .and(header("idempotency-key", payment.idempotency_key.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCESS",
            "provider_reference": "GW-102"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.supports_idempotency_key = true;
    let client = GatewayClient::new(cfg).unwrap();

    let outcome = client.submit(&payment).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Completed(_)));
}

#[tokio::test]
async fn test_submit_rejection_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "code": "PRODUCT_UNAVAILABLE",
            "message": "Product is out of stock"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.supports_idempotency_key = true;
    let client = GatewayClient::new(cfg).unwrap();
    let err = client.submit(&submission()).await.unwrap_err();

    match err {
        GatewayError::Rejected { code, message } => {
            assert_eq!(code, ErrorCode::ProductUnavailable);
            assert_eq!(message, "Product is out of stock");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_timeout_is_ambiguous() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "SUCCESS"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let err = client.submit(&submission()).await.unwrap_err();

    assert!(matches!(err, GatewayError::Timeout));
    assert!(err.is_ambiguous());
}

#[tokio::test]
async fn test_timed_out_payment_is_found_by_transaction_id() {
    let server = MockServer::start().await;
    let payment = submission();
    let transaction_id = payment.transaction_id.to_string();

    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .and(body_partial_json(json!({ "reference": transaction_id })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "SUCCESS"}))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/payments/{}/status", transaction_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCESS",
            "serial_number": "SN-LATE"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let err = client.submit(&payment).await.unwrap_err();
    assert!(err.is_ambiguous());

    let query = StatusQuery {
        transaction_id: payment.transaction_id,
        idempotency_key: payment.idempotency_key.clone(),
        provider_reference: None,
    };
    match client.query_status(&query).await.unwrap() {
        ProviderStatus::Success(receipt) => {
            assert_eq!(receipt.provider_reference, transaction_id);
            assert_eq!(receipt.receipt.serial_number.as_deref(), Some("SN-LATE"));
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_status_query_retries_server_errors_three_times() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/GW-200/status"))
        .respond_with(ResponseTemplate::new(502))
        .expect(4)
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let err = client.query_status(&status_query("GW-200")).await.unwrap_err();

    assert!(matches!(err, GatewayError::Upstream { status: 502, .. }));
}

#[tokio::test]
async fn test_status_query_recovers_after_transient_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/GW-201/status"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/GW-201/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCESS",
            "token": "1234-5678-9012"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let status = client.query_status(&status_query("GW-201")).await.unwrap();

    match status {
        ProviderStatus::Success(receipt) => {
            assert_eq!(receipt.provider_reference, "GW-201");
            assert_eq!(receipt.receipt.token.as_deref(), Some("1234-5678-9012"));
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_status_query_never_retries_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/GW-202/status"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "UNAUTHORIZED",
            "message": "bad token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let err = client.query_status(&status_query("GW-202")).await.unwrap_err();

    assert!(matches!(err, GatewayError::Rejected { .. }));
}

#[tokio::test]
async fn test_status_query_maps_refund_and_unknown_payment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/GW-203/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "REFUNDED"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/GW-404/status"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();

    assert_eq!(
        client.query_status(&status_query("GW-203")).await.unwrap(),
        ProviderStatus::Refunded
    );
    assert!(matches!(
        client.query_status(&status_query("GW-404")).await.unwrap(),
        ProviderStatus::Failed { .. }
    ));
}

#[tokio::test]
async fn test_refused_connection_is_unavailable() {
    let cfg = GatewayConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        timeout: Duration::from_millis(500),
        retry_base_delay: Duration::from_millis(1),
        ..GatewayConfig::default()
    };
    let client = GatewayClient::new(cfg).unwrap();

    let err = client.submit(&submission()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(_)));
    assert!(!err.is_ambiguous());
}

#[tokio::test]
async fn test_pricing_quote() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/inquiries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "price": 150000,
            "admin_fee": 2500,
            "description": "BUDI SANTOSO / 1300VA"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/inquiries"))
        .and(wiremock::matchers::body_partial_json(json!({"target": "000"})))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "PRODUCT_UNAVAILABLE",
            "message": "Unknown customer number"
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(config(&server)).unwrap();
    let mut request = QuoteRequest {
        user_id: UserId::new(),
        family: PaymentFamily::Postpaid,
        service_type: ServiceType::new("pln").unwrap(),
        target: "532100012345".to_string(),
        product_code: None,
    };

    let quote = client.quote(&request).await.unwrap();
    assert_eq!(quote.price.amount(), 150_000);
    assert_eq!(quote.admin_fee.amount(), 2_500);

    request.target = "000".to_string();
    assert!(matches!(
        client.quote(&request).await,
        Err(PricingError::ProductUnavailable(_))
    ));
}
