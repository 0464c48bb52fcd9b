//! TransactionEngine unit tests.

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use wallet_repo::MemoryStore;
    use wallet_types::{
        AppError, CreateInquiryRequest, CreateOrderRequest, DepositRequest, Direction,
        DiscountType, ErrorCode, GatewayError, HistoryCategory, Inquiry, InquiryId, LedgerStore,
        Money, Notifier, Order, PaymentEvent, PaymentFamily, PaymentKey, PricedQuote,
        PricingError, PricingService, ProviderReceipt, ProviderStatus, QuoteRequest, Receipt,
        ServiceType, SettlementGateway, StatusQuery, SubmitOutcome, TransactionStatus, UserId,
        Voucher, VoucherId, domain,
    };

    use crate::{EngineConfig, ReconciliationWorker, TransactionEngine};

    // ─────────────────────────────────────────────────────────────────────────────
    // Fakes
    // ─────────────────────────────────────────────────────────────────────────────

    /// Scripted gateway. Submissions complete unless a result was queued.
    pub struct FakeGateway {
        submit_results: Mutex<VecDeque<Result<SubmitOutcome, GatewayError>>>,
        status: Mutex<Result<ProviderStatus, GatewayError>>,
        submits: AtomicUsize,
        delay: Duration,
    }

    impl FakeGateway {
        pub fn new() -> Self {
            Self {
                submit_results: Mutex::new(VecDeque::new()),
                status: Mutex::new(Ok(ProviderStatus::Pending)),
                submits: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        pub fn push_submit(&self, result: Result<SubmitOutcome, GatewayError>) {
            self.submit_results.lock().unwrap().push_back(result);
        }

        pub fn set_status(&self, status: Result<ProviderStatus, GatewayError>) {
            *self.status.lock().unwrap() = status;
        }

        pub fn submit_count(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SettlementGateway for FakeGateway {
        async fn submit(
            &self,
            payment: &wallet_types::PaymentSubmission,
        ) -> Result<SubmitOutcome, GatewayError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let scripted = self.submit_results.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(SubmitOutcome::Completed(receipt(&format!(
                    "GW-{}",
                    payment.transaction_id
                ))))
            })
        }

        async fn query_status(&self, _query: &StatusQuery) -> Result<ProviderStatus, GatewayError> {
            self.status.lock().unwrap().clone()
        }
    }

    pub struct FakePricing {
        quote: Mutex<(i64, i64)>,
        unavailable: Mutex<bool>,
    }

    impl FakePricing {
        pub fn new(price: i64, admin_fee: i64) -> Self {
            Self {
                quote: Mutex::new((price, admin_fee)),
                unavailable: Mutex::new(false),
            }
        }

        pub fn set_price(&self, price: i64, admin_fee: i64) {
            *self.quote.lock().unwrap() = (price, admin_fee);
        }

        pub fn set_unavailable(&self) {
            *self.unavailable.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl PricingService for FakePricing {
        async fn quote(&self, request: &QuoteRequest) -> Result<PricedQuote, PricingError> {
            if *self.unavailable.lock().unwrap() {
                return Err(PricingError::ProductUnavailable(format!(
                    "{} is out of stock",
                    request.service_type
                )));
            }
            let (price, admin_fee) = *self.quote.lock().unwrap();
            Ok(PricedQuote {
                price: Money::new(price).unwrap(),
                admin_fee: Money::new(admin_fee).unwrap(),
                description: None,
            })
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<PaymentEvent>>,
    }

    impl RecordingNotifier {
        pub fn statuses(&self) -> Vec<TransactionStatus> {
            self.events.lock().unwrap().iter().map(|e| e.status).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: PaymentEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Harness
    // ─────────────────────────────────────────────────────────────────────────────

    struct Harness {
        engine: Arc<TransactionEngine<MemoryStore>>,
        gateway: Arc<FakeGateway>,
        pricing: Arc<FakePricing>,
        events: Arc<RecordingNotifier>,
        user: UserId,
    }

    fn harness() -> Harness {
        harness_with(FakeGateway::new(), EngineConfig::default())
    }

    fn harness_with(gateway: FakeGateway, config: EngineConfig) -> Harness {
        let gateway = Arc::new(gateway);
        let pricing = Arc::new(FakePricing::new(48_500, 1_500));
        let events = Arc::new(RecordingNotifier::default());
        let engine = TransactionEngine::new(
            MemoryStore::new(),
            gateway.clone(),
            pricing.clone(),
            config,
        )
        .with_notifier(events.clone());

        Harness {
            engine: Arc::new(engine),
            gateway,
            pricing,
            events,
            user: UserId::new(),
        }
    }

    fn money(v: i64) -> Money {
        Money::new(v).unwrap()
    }

    fn receipt(reference: &str) -> ProviderReceipt {
        ProviderReceipt {
            provider_reference: reference.to_string(),
            receipt: Receipt {
                serial_number: Some("SN-0001".into()),
                token: None,
            },
        }
    }

    impl Harness {
        fn store(&self) -> &MemoryStore {
            self.engine.store()
        }

        async fn fund(&self, user: UserId, amount: i64) {
            self.engine
                .deposit(
                    user,
                    DepositRequest {
                        amount,
                        reference: format!("VA-{}", InquiryId::new()),
                    },
                )
                .await
                .unwrap();
        }

        async fn inquiry(
            &self,
            user: UserId,
            family: PaymentFamily,
            codes: &[&str],
        ) -> Result<Inquiry, AppError> {
            let (service_type, product_code) = match family {
                PaymentFamily::Prepaid => ("pulsa", Some("TSEL50".to_string())),
                PaymentFamily::Postpaid => ("pln", None),
                PaymentFamily::Transfer => ("bank_transfer", None),
            };
            self.engine
                .create_inquiry(CreateInquiryRequest {
                    user_id: user,
                    family,
                    service_type: service_type.into(),
                    target: "081234567890".into(),
                    product_code,
                    voucher_codes: codes.iter().map(|c| c.to_string()).collect(),
                })
                .await
        }

        async fn order(&self, user: UserId, codes: &[&str]) -> Order {
            let inquiry = self.inquiry(user, PaymentFamily::Prepaid, &[]).await.unwrap();
            self.engine
                .create_prepaid_order(CreateOrderRequest {
                    inquiry_id: inquiry.id,
                    voucher_codes: codes.iter().map(|c| c.to_string()).collect(),
                })
                .await
                .unwrap()
        }

        async fn voucher(&self, code: &str, discount_type: DiscountType, value: i64) -> Voucher {
            let voucher = Voucher {
                id: VoucherId::new(),
                code: code.into(),
                discount_type,
                discount_value: value,
                min_transaction: Money::zero(),
                max_discount: None,
                max_usage: 100,
                max_usage_per_user: 1,
                current_usage: 0,
                service_types: vec![ServiceType::ALL.into()],
                is_active: true,
                expires_at: None,
            };
            self.save(&voucher).await;
            voucher
        }

        async fn save(&self, voucher: &Voucher) {
            self.store().save_voucher(voucher).await.unwrap();
        }

        async fn voucher_usage(&self, id: VoucherId) -> i64 {
            self.store().get_voucher(id).await.unwrap().unwrap().current_usage
        }

        async fn balance(&self, user: UserId) -> i64 {
            self.engine.get_balance(user).await.unwrap().amount.amount()
        }

        async fn debits(&self, user: UserId) -> usize {
            self.engine
                .list_history(user, None)
                .await
                .unwrap()
                .iter()
                .filter(|e| e.direction == Direction::Debit)
                .count()
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_prepaid_payment_debits_balance() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let order = h.order(h.user, &[]).await;

        let tx = h.engine.execute_prepaid_payment(order.id).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.total_payment, money(50_000));
        assert_eq!(tx.balance_before, Some(money(100_000)));
        assert_eq!(tx.balance_after, Some(money(50_000)));
        assert_eq!(h.balance(h.user).await, 50_000);

        let history = h.engine.list_history(h.user, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].direction, Direction::Debit);
        assert_eq!(history[0].category, HistoryCategory::Prepaid);
        assert_eq!(history[0].reference_id, tx.id.to_string());

        let stored = h.store().get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(h.events.statuses(), vec![TransactionStatus::Success]);
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_no_trace() {
        let h = harness();
        h.fund(h.user, 10_000).await;
        let inquiry = h.inquiry(h.user, PaymentFamily::Postpaid, &[]).await.unwrap();

        let err = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::InsufficientBalance {
                available: 10_000,
                requested: 50_000
            }
        ));
        assert_eq!(h.balance(h.user).await, 10_000);
        assert_eq!(h.debits(h.user).await, 0);
        assert!(
            h.store()
                .find_transaction_by_key(&inquiry.key())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(h.gateway.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_inquiry_is_rejected() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let now = domain::now();
        let inquiry = Inquiry {
            id: InquiryId::new(),
            user_id: h.user,
            family: PaymentFamily::Postpaid,
            service_type: ServiceType::new("pln").unwrap(),
            target: "532100012345".into(),
            product_code: None,
            description: None,
            price: money(48_000),
            admin_fee: money(2_000),
            voucher_codes: vec![],
            status: TransactionStatus::Inquiry,
            expires_at: now - ChronoDuration::seconds(1),
            created_at: now - ChronoDuration::minutes(16),
        };
        h.store().save_inquiry(&inquiry).await.unwrap();

        let err = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::InquiryExpired);
        assert_eq!(h.balance(h.user).await, 100_000);
        assert_eq!(h.gateway.submit_count(), 0);
        let stored = h.store().get_inquiry(inquiry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Expired);
    }

    #[tokio::test]
    async fn test_expired_order_is_rejected() {
        let config = EngineConfig {
            order_ttl: ChronoDuration::seconds(-1),
            ..EngineConfig::default()
        };
        let h = harness_with(FakeGateway::new(), config);
        h.fund(h.user, 100_000).await;
        let order = h.order(h.user, &[]).await;

        let err = h.engine.execute_prepaid_payment(order.id).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::OrderExpired);
        assert_eq!(h.debits(h.user).await, 0);
        let stored = h.store().get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Expired);
    }

    #[tokio::test]
    async fn test_replay_returns_same_transaction() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let order = h.order(h.user, &[]).await;

        let first = h.engine.execute_prepaid_payment(order.id).await.unwrap();
        let second = h.engine.execute_prepaid_payment(order.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.gateway.submit_count(), 1);
        assert_eq!(h.debits(h.user).await, 1);
        assert_eq!(h.balance(h.user).await, 50_000);
    }

    #[tokio::test]
    async fn test_replay_after_expiry_returns_stored_result() {
        let config = EngineConfig {
            order_ttl: ChronoDuration::milliseconds(200),
            ..EngineConfig::default()
        };
        let h = harness_with(FakeGateway::new(), config);
        h.fund(h.user, 100_000).await;
        let order = h.order(h.user, &[]).await;

        let first = h.engine.execute_prepaid_payment(order.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let replay = h.engine.execute_prepaid_payment(order.id).await.unwrap();

        assert_eq!(first, replay);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_for_one_key_settle_once() {
        let h = harness_with(
            FakeGateway::with_delay(Duration::from_millis(50)),
            EngineConfig::default(),
        );
        h.fund(h.user, 100_000).await;
        let order = h.order(h.user, &[]).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.execute_prepaid_payment(order.id).await
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(h.gateway.submit_count(), 1);
        assert_eq!(h.debits(h.user).await, 1);
        assert_eq!(h.balance(h.user).await, 50_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_overdraw() {
        let h = harness_with(
            FakeGateway::with_delay(Duration::from_millis(10)),
            EngineConfig::default(),
        );
        h.pricing.set_price(30_000, 0);
        h.fund(h.user, 100_000).await;

        let mut orders = Vec::new();
        for _ in 0..5 {
            orders.push(h.order(h.user, &[]).await);
        }

        let mut handles = Vec::new();
        for order in orders {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.execute_prepaid_payment(order.id).await
            }));
        }

        let mut succeeded = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(tx) => {
                    assert_eq!(tx.status, TransactionStatus::Success);
                    succeeded += 1;
                }
                Err(AppError::InsufficientBalance { .. }) => insufficient += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(insufficient, 2);
        assert_eq!(h.balance(h.user).await, 10_000);
        let report = h.engine.reconcile_ledger(h.user).await.unwrap();
        assert!(report.consistent);
        assert_eq!(report.entries, 4);
        assert_eq!(report.history_total, 10_000);
    }

    #[tokio::test]
    async fn test_rejected_payment_fails_without_debit() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let voucher = h.voucher("HEMAT", DiscountType::Fixed, 1_000).await;
        let order = h.order(h.user, &["HEMAT"]).await;
        h.gateway.push_submit(Err(GatewayError::Rejected {
            code: ErrorCode::ProductUnavailable,
            message: "Product is out of stock".into(),
        }));

        let tx = h.engine.execute_prepaid_payment(order.id).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        let failure = tx.failure.clone().unwrap();
        assert_eq!(failure.code, ErrorCode::ProductUnavailable);
        assert_eq!(h.balance(h.user).await, 100_000);
        assert_eq!(h.debits(h.user).await, 0);
        assert_eq!(h.voucher_usage(voucher.id).await, 0);

        let replay = h.engine.execute_prepaid_payment(order.id).await.unwrap();
        assert_eq!(replay, tx);
        assert_eq!(h.gateway.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_fails_as_service_unavailable() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let inquiry = h.inquiry(h.user, PaymentFamily::Transfer, &[]).await.unwrap();
        h.gateway
            .push_submit(Err(GatewayError::Unavailable("connection refused".into())));

        let tx = h.engine.execute_transfer(inquiry.id).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.failure.unwrap().code, ErrorCode::ServiceUnavailable);
        assert_eq!(h.balance(h.user).await, 100_000);
    }

    #[tokio::test]
    async fn test_transfer_uses_transfer_category() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let inquiry = h.inquiry(h.user, PaymentFamily::Transfer, &[]).await.unwrap();

        let tx = h.engine.execute_transfer(inquiry.id).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Success);
        let history = h.engine.list_history(h.user, Some(1)).await.unwrap();
        assert_eq!(history[0].category, HistoryCategory::Transfer);
    }

    #[tokio::test]
    async fn test_family_mismatch_is_rejected() {
        let h = harness();
        let prepaid = h.inquiry(h.user, PaymentFamily::Prepaid, &[]).await.unwrap();
        let postpaid = h.inquiry(h.user, PaymentFamily::Postpaid, &[]).await.unwrap();

        let err = h.engine.execute_postpaid_payment(prepaid.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let err = h.engine.execute_transfer(postpaid.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let err = h
            .engine
            .create_prepaid_order(CreateOrderRequest {
                inquiry_id: postpaid.id,
                voucher_codes: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_unknown_payment_is_not_found() {
        let h = harness();
        let err = h
            .engine
            .execute_prepaid_payment(wallet_types::OrderId::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Vouchers
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_fixed_voucher_reduces_total() {
        let h = harness();
        h.pricing.set_price(19_000, 1_000);
        h.fund(h.user, 100_000).await;
        let mut voucher = h.voucher("HEMAT12", DiscountType::Fixed, 12_000).await;
        voucher.min_transaction = money(10_000);
        voucher.max_discount = Some(money(12_000));
        h.save(&voucher).await;

        let inquiry = h
            .inquiry(h.user, PaymentFamily::Postpaid, &["hemat12"])
            .await
            .unwrap();
        let tx = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap();

        assert_eq!(tx.discount, money(12_000));
        assert_eq!(tx.total_payment, money(8_000));
        assert_eq!(tx.voucher_ids, vec![voucher.id]);
        assert_eq!(h.balance(h.user).await, 92_000);
        assert_eq!(h.voucher_usage(voucher.id).await, 1);

        // Per-user limit of one.
        let again = h
            .inquiry(h.user, PaymentFamily::Postpaid, &["HEMAT12"])
            .await
            .unwrap();
        let err = h.engine.execute_postpaid_payment(again.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::VoucherUsed);
        assert_eq!(h.balance(h.user).await, 92_000);
    }

    #[tokio::test]
    async fn test_percentage_voucher_is_capped() {
        let h = harness();
        h.pricing.set_price(300_000, 0);
        h.fund(h.user, 500_000).await;
        let mut voucher = h.voucher("PLN5", DiscountType::Percentage, 5).await;
        voucher.max_discount = Some(money(10_000));
        h.save(&voucher).await;

        let inquiry = h
            .inquiry(h.user, PaymentFamily::Postpaid, &["PLN5"])
            .await
            .unwrap();
        let tx = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap();

        assert_eq!(tx.discount, money(10_000));
        assert_eq!(tx.total_payment, money(290_000));
    }

    #[tokio::test]
    async fn test_fully_discounted_payment_skips_debit() {
        let h = harness();
        h.pricing.set_price(20_000, 0);
        h.voucher("GRATIS", DiscountType::Fixed, 20_000).await;

        let inquiry = h
            .inquiry(h.user, PaymentFamily::Postpaid, &["GRATIS"])
            .await
            .unwrap();
        let tx = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Success);
        assert!(tx.total_payment.is_zero());
        assert_eq!(tx.balance_before, Some(Money::zero()));
        assert_eq!(tx.balance_after, Some(Money::zero()));
        assert!(h.engine.list_history(h.user, None).await.unwrap().is_empty());
        assert!(h.engine.reconcile_ledger(h.user).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_too_many_vouchers() {
        let h = harness();
        let err = h
            .inquiry(h.user, PaymentFamily::Postpaid, &["A", "B", "C"])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MaxVouchersExceeded);
    }

    #[tokio::test]
    async fn test_unknown_voucher_blocks_order() {
        let h = harness();
        let inquiry = h.inquiry(h.user, PaymentFamily::Prepaid, &[]).await.unwrap();

        let err = h
            .engine
            .create_prepaid_order(CreateOrderRequest {
                inquiry_id: inquiry.id,
                voucher_codes: vec!["NOPE".into()],
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidVoucher);
        let stored = h.store().get_inquiry(inquiry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Inquiry);
    }

    #[tokio::test]
    async fn test_voucher_below_minimum_is_rejected() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let mut voucher = h.voucher("BIG", DiscountType::Fixed, 5_000).await;
        voucher.min_transaction = money(100_000);
        h.save(&voucher).await;

        let inquiry = h
            .inquiry(h.user, PaymentFamily::Postpaid, &["BIG"])
            .await
            .unwrap();
        let err = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::MinTransactionNotMet);
        assert_eq!(h.gateway.submit_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_voucher_use_goes_to_one_user() {
        let h = harness_with(
            FakeGateway::with_delay(Duration::from_millis(50)),
            EngineConfig::default(),
        );
        let mut voucher = h.voucher("LAST", DiscountType::Fixed, 1_000).await;
        voucher.max_usage = 1;
        h.save(&voucher).await;

        let mut orders = Vec::new();
        for _ in 0..2 {
            let user = UserId::new();
            h.fund(user, 100_000).await;
            orders.push(h.order(user, &["LAST"]).await);
        }

        let mut handles = Vec::new();
        for order in orders {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.execute_prepaid_payment(order.id).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(tx) => {
                    assert_eq!(tx.status, TransactionStatus::Success);
                    succeeded += 1;
                }
                Err(e) => assert_eq!(e.code(), ErrorCode::VoucherUsed),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(h.voucher_usage(voucher.id).await, 1);
    }

    #[tokio::test]
    async fn test_abandoned_payment_returns_voucher_claim() {
        let h = harness_with(
            FakeGateway::with_delay(Duration::from_millis(300)),
            EngineConfig::default(),
        );
        h.fund(h.user, 100_000).await;
        let mut voucher = h.voucher("LAST", DiscountType::Fixed, 1_000).await;
        voucher.max_usage = 1;
        h.save(&voucher).await;
        let order = h.order(h.user, &["LAST"]).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            h.engine.execute_prepaid_payment(order.id),
        )
        .await;
        assert!(abandoned.is_err(), "payment finished before the caller gave up");
        assert_eq!(h.gateway.submit_count(), 1);

        assert_eq!(h.voucher_usage(voucher.id).await, 0);
        assert_eq!(h.balance(h.user).await, 100_000);
        let recorded = h
            .store()
            .find_transaction_by_key(&PaymentKey::Order(order.id))
            .await
            .unwrap();
        assert!(recorded.is_none());

        let tx = h.engine.execute_prepaid_payment(order.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.voucher_ids, vec![voucher.id]);
        assert_eq!(h.voucher_usage(voucher.id).await, 1);
        assert_eq!(h.balance(h.user).await, 100_000 - tx.total_payment.amount());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_timeout_then_reconcile_success_debits_once() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let order = h.order(h.user, &[]).await;
        h.gateway.push_submit(Err(GatewayError::Timeout));

        let tx = h.engine.execute_prepaid_payment(order.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Processing);
        assert_eq!(h.balance(h.user).await, 100_000);

        h.gateway
            .set_status(Ok(ProviderStatus::Success(receipt("GW-LATE"))));
        let settled = h.engine.reconcile(tx.id).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);
        assert_eq!(settled.provider_reference.as_deref(), Some("GW-LATE"));
        assert_eq!(h.balance(h.user).await, 50_000);

        let again = h.engine.reconcile(tx.id).await.unwrap();
        assert_eq!(again, settled);
        assert_eq!(h.debits(h.user).await, 1);

        // A replay of the original request sees the settled transaction.
        let replay = h.engine.execute_prepaid_payment(order.id).await.unwrap();
        assert_eq!(replay.status, TransactionStatus::Success);
        assert_eq!(h.gateway.submit_count(), 1);

        assert_eq!(
            h.events.statuses(),
            vec![TransactionStatus::Processing, TransactionStatus::Success]
        );
    }

    #[tokio::test]
    async fn test_reconcile_failure_releases_voucher() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let voucher = h.voucher("HEMAT", DiscountType::Fixed, 1_000).await;
        let order = h.order(h.user, &["HEMAT"]).await;
        h.gateway.push_submit(Err(GatewayError::Upstream {
            status: 504,
            message: "gateway timeout".into(),
        }));

        let tx = h.engine.execute_prepaid_payment(order.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Processing);
        assert_eq!(h.voucher_usage(voucher.id).await, 1);

        h.gateway.set_status(Ok(ProviderStatus::Failed {
            code: ErrorCode::ServiceUnavailable,
            message: "biller offline".into(),
        }));
        let failed = h.engine.reconcile(tx.id).await.unwrap();

        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(h.voucher_usage(voucher.id).await, 0);
        assert_eq!(h.balance(h.user).await, 100_000);
    }

    #[tokio::test]
    async fn test_refund_before_settlement() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let inquiry = h.inquiry(h.user, PaymentFamily::Postpaid, &[]).await.unwrap();
        h.gateway.push_submit(Err(GatewayError::Timeout));

        let tx = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap();
        h.gateway.set_status(Ok(ProviderStatus::Refunded));
        let refunded = h.engine.reconcile(tx.id).await.unwrap();

        assert_eq!(refunded.status, TransactionStatus::Refunded);
        assert_eq!(h.debits(h.user).await, 0);
        let stored = h.store().get_inquiry(inquiry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Refunded);
    }

    #[tokio::test]
    async fn test_pending_status_changes_nothing() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let inquiry = h.inquiry(h.user, PaymentFamily::Postpaid, &[]).await.unwrap();
        h.gateway.push_submit(Err(GatewayError::Timeout));

        let tx = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap();
        let still = h.engine.reconcile(tx.id).await.unwrap();

        assert_eq!(still.status, TransactionStatus::Processing);
        assert_eq!(h.balance(h.user).await, 100_000);
    }

    #[tokio::test]
    async fn test_status_query_failure_is_upstream_error() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let inquiry = h.inquiry(h.user, PaymentFamily::Postpaid, &[]).await.unwrap();
        h.gateway.push_submit(Err(GatewayError::Timeout));
        let tx = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap();

        h.gateway.set_status(Err(GatewayError::Timeout));
        let err = h.engine.reconcile(tx.id).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::UpstreamError);
        let stored = h.engine.get_transaction(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Processing);
    }

    #[tokio::test]
    async fn test_confirmed_payment_without_funds_stays_processing() {
        let h = harness();
        h.fund(h.user, 50_000).await;
        let order = h.order(h.user, &[]).await;
        h.gateway.push_submit(Err(GatewayError::Timeout));
        let pending = h.engine.execute_prepaid_payment(order.id).await.unwrap();

        h.pricing.set_price(29_000, 1_000);
        let bill = h.inquiry(h.user, PaymentFamily::Postpaid, &[]).await.unwrap();
        let paid = h.engine.execute_postpaid_payment(bill.id).await.unwrap();
        assert_eq!(paid.status, TransactionStatus::Success);
        assert_eq!(h.balance(h.user).await, 20_000);

        h.gateway
            .set_status(Ok(ProviderStatus::Success(receipt("GW-LATE"))));
        let err = h.engine.reconcile(pending.id).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::InsufficientBalance);
        let stored = h.engine.get_transaction(pending.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Processing);
        assert_eq!(h.balance(h.user).await, 20_000);
    }

    #[tokio::test]
    async fn test_callback_settles_accepted_payment() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let order = h.order(h.user, &[]).await;
        h.gateway.push_submit(Ok(SubmitOutcome::Accepted {
            provider_reference: "GW-ACC".into(),
        }));

        let tx = h.engine.execute_prepaid_payment(order.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Processing);
        assert_eq!(tx.provider_reference.as_deref(), Some("GW-ACC"));

        let settled = h
            .engine
            .apply_provider_status("GW-ACC", ProviderStatus::Success(receipt("GW-ACC")))
            .await
            .unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);

        // Terminal transactions ignore later pushes.
        let ignored = h
            .engine
            .apply_provider_status(
                "GW-ACC",
                ProviderStatus::Failed {
                    code: ErrorCode::ServiceUnavailable,
                    message: "late".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(ignored.status, TransactionStatus::Success);
        assert_eq!(h.debits(h.user).await, 1);
    }

    #[tokio::test]
    async fn test_callback_by_transaction_id() {
        let h = harness();
        h.fund(h.user, 100_000).await;
        let inquiry = h.inquiry(h.user, PaymentFamily::Postpaid, &[]).await.unwrap();
        h.gateway.push_submit(Err(GatewayError::Timeout));
        let tx = h.engine.execute_postpaid_payment(inquiry.id).await.unwrap();

        let settled = h
            .engine
            .apply_provider_status(&tx.id.to_string(), ProviderStatus::Success(receipt("GW-9")))
            .await
            .unwrap();

        assert_eq!(settled.id, tx.id);
        assert_eq!(settled.status, TransactionStatus::Success);

        let err = h
            .engine
            .apply_provider_status("GW-UNKNOWN", ProviderStatus::Refunded)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_reconcile_pending_batch() {
        let h = harness();
        h.fund(h.user, 200_000).await;
        for _ in 0..2 {
            let inquiry = h.inquiry(h.user, PaymentFamily::Postpaid, &[]).await.unwrap();
            h.gateway.push_submit(Err(GatewayError::Timeout));
            h.engine.execute_postpaid_payment(inquiry.id).await.unwrap();
        }

        let worker = ReconciliationWorker::new(h.engine.clone(), Duration::from_secs(30), 10);
        let idle = worker.run_once().await;
        assert_eq!(idle.checked, 2);
        assert_eq!(idle.still_processing, 2);

        h.gateway
            .set_status(Ok(ProviderStatus::Success(receipt("GW-BATCH"))));
        let summary = worker.run_once().await;

        assert_eq!(summary.checked, 2);
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(h.balance(h.user).await, 100_000);
        assert!(h.store().list_processing(10).await.unwrap().is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Inquiries, orders & balances
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_inquiry_carries_quote_and_deadline() {
        let h = harness();
        let before = domain::now();
        let inquiry = h.inquiry(h.user, PaymentFamily::Prepaid, &[]).await.unwrap();

        assert_eq!(inquiry.status, TransactionStatus::Inquiry);
        assert_eq!(inquiry.price, money(48_500));
        assert_eq!(inquiry.admin_fee, money(1_500));
        assert!(inquiry.expires_at >= before + ChronoDuration::minutes(15));
        let stored = h.store().get_inquiry(inquiry.id).await.unwrap().unwrap();
        assert_eq!(stored, inquiry);
    }

    #[tokio::test]
    async fn test_prepaid_inquiry_requires_product() {
        let h = harness();
        let err = h
            .engine
            .create_inquiry(CreateInquiryRequest {
                user_id: h.user,
                family: PaymentFamily::Prepaid,
                service_type: "pulsa".into(),
                target: "081234567890".into(),
                product_code: None,
                voucher_codes: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_pricing_unavailable() {
        let h = harness();
        h.pricing.set_unavailable();
        let err = h
            .inquiry(h.user, PaymentFamily::Prepaid, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProductUnavailable);
    }

    #[tokio::test]
    async fn test_second_order_for_inquiry_is_duplicate() {
        let h = harness();
        let inquiry = h.inquiry(h.user, PaymentFamily::Prepaid, &[]).await.unwrap();
        let req = CreateOrderRequest {
            inquiry_id: inquiry.id,
            voucher_codes: vec![],
        };

        h.engine.create_prepaid_order(req.clone()).await.unwrap();
        let err = h.engine.create_prepaid_order(req).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::DuplicateTransaction);
        let stored = h.store().get_inquiry(inquiry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::OrderPending);
    }

    #[tokio::test]
    async fn test_order_on_expired_inquiry() {
        let config = EngineConfig {
            inquiry_ttl: ChronoDuration::seconds(-1),
            ..EngineConfig::default()
        };
        let h = harness_with(FakeGateway::new(), config);
        let inquiry = h.inquiry(h.user, PaymentFamily::Prepaid, &[]).await.unwrap();

        let err = h
            .engine
            .create_prepaid_order(CreateOrderRequest {
                inquiry_id: inquiry.id,
                voucher_codes: vec![],
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InquiryExpired);
        let stored = h.store().get_inquiry(inquiry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Expired);
    }

    #[tokio::test]
    async fn test_deposit_replay_is_ignored() {
        let h = harness();
        let req = DepositRequest {
            amount: 100_000,
            reference: "VA-0001".into(),
        };

        let first = h.engine.deposit(h.user, req.clone()).await.unwrap();
        let second = h.engine.deposit(h.user, req).await.unwrap();

        assert_eq!(first.amount, money(100_000));
        assert_eq!(second.amount, money(100_000));
        assert_eq!(h.engine.list_history(h.user, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deposit_validation() {
        let h = harness();
        for amount in [0, -5_000] {
            let err = h
                .engine
                .deposit(
                    h.user,
                    DepositRequest {
                        amount,
                        reference: "VA-BAD".into(),
                    },
                )
                .await
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::ValidationError);
        }
        assert_eq!(h.balance(h.user).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_user_has_zero_balance() {
        let h = harness();
        let balance = h.engine.get_balance(UserId::new()).await.unwrap();
        assert!(balance.amount.is_zero());

        let report = h.engine.reconcile_ledger(UserId::new()).await.unwrap();
        assert!(report.consistent);
        assert_eq!(report.entries, 0);
    }
}
