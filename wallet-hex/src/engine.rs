//! Transaction Engine
//!
//! Orchestrates payments through the storage, gateway, pricing and
//! notification ports. Contains NO infrastructure logic.
//!
//! Every payment follows the same protocol regardless of family:
//! replay lookup, expiry check, balance lock, voucher evaluation, funds
//! check, gateway submission, one atomic commit, notification.

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, instrument, warn};

use wallet_gateway::TracingNotifier;
use wallet_types::domain::now;
use wallet_types::{
    AppError, Balance, BalanceHistoryEntry, BalanceScope, CreateInquiryRequest,
    CreateOrderRequest, DepositRequest, FailureReason, GatewayError, HistoryCategory, Inquiry,
    InquiryId, LedgerReference, LedgerReport, LedgerStore, Money, Notifier, Order, OrderId,
    PaymentEvent, PaymentFamily, PaymentKey, PaymentQuote, PaymentSubmission, PricingService,
    ProviderReceipt, QuoteRequest, ReferenceType, ServiceType, SettlementGateway, SubmitOutcome,
    Transaction, TransactionId, TransactionStatus, UserId, UserVoucherUsage,
};

use crate::idempotency::IdempotencyGuard;
use crate::voucher::{VoucherCandidate, VoucherEngine, VoucherSelection};

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_vouchers_per_transaction: usize,
    /// Lifetime of a freshly priced inquiry.
    pub inquiry_ttl: Duration,
    /// Lifetime of a prepaid order, counted from its creation.
    pub order_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_vouchers_per_transaction: 2,
            inquiry_ttl: Duration::minutes(15),
            order_ttl: Duration::minutes(15),
        }
    }
}

/// Executes payments against a user's balance.
///
/// Generic over `S: LedgerStore` so the same engine runs on Postgres in
/// production and on the in-memory store in tests.
pub struct TransactionEngine<S: LedgerStore> {
    pub(crate) store: S,
    pub(crate) gateway: Arc<dyn SettlementGateway>,
    pricing: Arc<dyn PricingService>,
    pub(crate) notifier: Arc<dyn Notifier>,
    vouchers: VoucherEngine,
    config: EngineConfig,
}

impl<S: LedgerStore> TransactionEngine<S> {
    pub fn new(
        store: S,
        gateway: Arc<dyn SettlementGateway>,
        pricing: Arc<dyn PricingService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            pricing,
            notifier: Arc::new(TracingNotifier),
            vouchers: VoucherEngine::new(config.max_vouchers_per_transaction),
            config,
        }
    }

    /// Replaces the default log-only notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Inquiries & Orders
    // ─────────────────────────────────────────────────────────────────────────────

    /// Prices a product or looks up a bill and stores the quote.
    #[instrument(skip(self, req), fields(user_id = %req.user_id, family = %req.family))]
    pub async fn create_inquiry(&self, req: CreateInquiryRequest) -> Result<Inquiry, AppError> {
        let service_type = ServiceType::new(req.service_type)?;
        let target = req.target.trim().to_string();
        if target.is_empty() {
            return Err(AppError::BadRequest("Target cannot be empty".into()));
        }
        let product_code = req
            .product_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if req.family == PaymentFamily::Prepaid && product_code.is_none() {
            return Err(AppError::BadRequest(
                "Prepaid inquiries require a product code".into(),
            ));
        }
        self.vouchers.check_codes(&req.voucher_codes)?;

        let priced = self
            .pricing
            .quote(&QuoteRequest {
                user_id: req.user_id,
                family: req.family,
                service_type: service_type.clone(),
                target: target.clone(),
                product_code: product_code.clone(),
            })
            .await?;

        let created_at = now();
        let inquiry = Inquiry {
            id: InquiryId::new(),
            user_id: req.user_id,
            family: req.family,
            service_type,
            target,
            product_code,
            description: priced.description,
            price: priced.price,
            admin_fee: priced.admin_fee,
            voucher_codes: req.voucher_codes,
            status: TransactionStatus::Inquiry,
            expires_at: created_at + self.config.inquiry_ttl,
            created_at,
        };
        self.store.save_inquiry(&inquiry).await?;

        info!(inquiry_id = %inquiry.id, price = %inquiry.price, "Inquiry created");
        Ok(inquiry)
    }

    /// Turns a prepaid inquiry into an order.
    #[instrument(skip(self, req), fields(inquiry_id = %req.inquiry_id))]
    pub async fn create_prepaid_order(&self, req: CreateOrderRequest) -> Result<Order, AppError> {
        let mut inquiry = self.load_inquiry(req.inquiry_id).await?;
        if inquiry.family != PaymentFamily::Prepaid {
            return Err(AppError::BadRequest(format!(
                "Inquiry {} is a {} inquiry, not PREPAID",
                inquiry.id, inquiry.family
            )));
        }

        let at = now();
        match inquiry.status {
            TransactionStatus::Inquiry if inquiry.is_expired_at(at) => {
                self.expire(&inquiry.quote()).await;
                return Err(AppError::InquiryExpired(inquiry.id));
            }
            TransactionStatus::Inquiry => {}
            TransactionStatus::Expired => return Err(AppError::InquiryExpired(inquiry.id)),
            _ => {
                return Err(AppError::DuplicateTransaction(format!(
                    "Inquiry {} already has an order",
                    inquiry.id
                )));
            }
        }

        let codes = if req.voucher_codes.is_empty() {
            inquiry.voucher_codes.clone()
        } else {
            req.voucher_codes
        };
        self.vouchers.check_codes(&codes)?;

        let order = Order::place(&mut inquiry, codes, at + self.config.order_ttl)?;
        // Vouchers are re-checked when the order is paid; this only surfaces
        // unusable codes early.
        self.select_vouchers(&order.quote(), at).await?;

        self.store.place_order(&inquiry, &order).await?;

        info!(order_id = %order.id, "Order placed");
        Ok(order)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn execute_prepaid_payment(&self, order_id: OrderId) -> Result<Transaction, AppError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        self.execute(order.quote()).await
    }

    #[instrument(skip(self), fields(inquiry_id = %inquiry_id))]
    pub async fn execute_postpaid_payment(
        &self,
        inquiry_id: InquiryId,
    ) -> Result<Transaction, AppError> {
        let inquiry = self.load_inquiry_of(inquiry_id, PaymentFamily::Postpaid).await?;
        self.execute(inquiry.quote()).await
    }

    #[instrument(skip(self), fields(inquiry_id = %inquiry_id))]
    pub async fn execute_transfer(&self, inquiry_id: InquiryId) -> Result<Transaction, AppError> {
        let inquiry = self.load_inquiry_of(inquiry_id, PaymentFamily::Transfer).await?;
        self.execute(inquiry.quote()).await
    }

    async fn execute(&self, quote: PaymentQuote) -> Result<Transaction, AppError> {
        // A settled key answers with its stored transaction, even once the
        // quote itself has expired.
        if let Some(existing) = IdempotencyGuard::lookup(&self.store, &quote.key).await? {
            return Ok(existing);
        }

        let at = now();
        if quote.status == TransactionStatus::Expired || at > quote.expires_at {
            self.expire(&quote).await;
            return Err(expired(&quote.key));
        }
        self.vouchers.check_codes(&quote.voucher_codes)?;

        let mut scope = self.store.lock_for_update(quote.user_id).await?;
        if let Some(existing) = IdempotencyGuard::confirm(&mut scope, &quote.key).await? {
            return Ok(existing);
        }

        let selection = self.select_vouchers(&quote, at).await?;
        let mut tx = Transaction::processing(&quote, selection.discount, selection.voucher_ids())?;

        if !scope.balance().has_sufficient_funds(tx.total_payment) {
            let available = scope.balance().amount;
            info!(available = %available, requested = %tx.total_payment, "Insufficient balance");
            return Err(AppError::InsufficientBalance {
                available: available.amount(),
                requested: tx.total_payment.amount(),
            });
        }

        // Claims made through the scope are returned if it never commits,
        // including when this future is dropped.
        reserve_vouchers(&mut scope, &selection).await?;

        let submission = PaymentSubmission {
            idempotency_key: quote.key.to_string(),
            transaction_id: tx.id,
            family: tx.family,
            service_type: tx.service_type.clone(),
            target: tx.target.clone(),
            product_code: tx.product_code.clone(),
            amount: tx.amount.checked_add(tx.admin_fee)?,
        };

        let staged = match self.gateway.submit(&submission).await {
            Ok(SubmitOutcome::Completed(receipt)) => settle(&mut scope, &mut tx, receipt),
            Ok(SubmitOutcome::Accepted { provider_reference }) => {
                info!(transaction_id = %tx.id, provider_reference = %provider_reference, "Payment accepted for asynchronous settlement");
                tx.provider_reference = Some(provider_reference);
                scope.record_transaction(tx.clone());
                Ok(())
            }
            Err(e) if e.is_ambiguous() => {
                warn!(transaction_id = %tx.id, "Gateway outcome unknown, awaiting reconciliation: {}", e);
                scope.record_transaction(tx.clone());
                Ok(())
            }
            Err(e) => {
                info!(transaction_id = %tx.id, "Payment refused: {}", e);
                match tx.fail(failure_reason(e)) {
                    Ok(()) => {
                        scope.record_transaction(tx.clone());
                        release_vouchers(&mut scope, &tx).await
                    }
                    Err(e) => Err(e.into()),
                }
            }
        };

        let committed = match staged {
            Ok(()) => scope.commit().await.map_err(AppError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            error!(transaction_id = %tx.id, status = %tx.status, "Failed to record payment outcome: {}", e);
            return Err(e);
        }

        info!(transaction_id = %tx.id, status = %tx.status, total = %tx.total_payment, "Payment recorded");
        self.after_commit(&tx).await;
        Ok(tx)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {}", id)))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Balances
    // ─────────────────────────────────────────────────────────────────────────────

    /// Credits a top-up. Replaying a reference leaves the balance unchanged.
    #[instrument(skip(self, req), fields(user_id = %user_id, reference = %req.reference))]
    pub async fn deposit(&self, user_id: UserId, req: DepositRequest) -> Result<Balance, AppError> {
        let amount = Money::new(req.amount)?;
        if amount.is_zero() {
            return Err(AppError::BadRequest("Amount must be positive".into()));
        }
        let reference_id = req.reference.trim();
        if reference_id.is_empty() {
            return Err(AppError::BadRequest("Deposit reference cannot be empty".into()));
        }
        let reference = LedgerReference::new(
            HistoryCategory::Deposit,
            ReferenceType::Deposit,
            reference_id,
        );

        let mut scope = self.store.lock_for_update(user_id).await?;
        if scope.has_history_reference(&reference).await? {
            info!("Deposit already applied");
            return Ok(scope.balance().clone());
        }

        scope.credit(amount, reference)?;
        let balance = scope.balance().clone();
        scope.commit().await?;

        info!(amount = %amount, balance = %balance.amount, "Deposit credited");
        Ok(balance)
    }

    /// Users without a balance row read as a zero balance.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Balance, AppError> {
        Ok(self
            .store
            .get_balance(user_id)
            .await?
            .unwrap_or_else(|| Balance::open(user_id)))
    }

    pub async fn list_history(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<BalanceHistoryEntry>, AppError> {
        Ok(self.store.list_history(user_id, limit).await?)
    }

    /// Checks that the stored balance equals the replayed history.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn reconcile_ledger(&self, user_id: UserId) -> Result<LedgerReport, AppError> {
        let balance = self.get_balance(user_id).await?;
        let mut history = self.store.list_history(user_id, None).await?;
        if history.is_empty() {
            return Ok(LedgerReport::empty(&balance));
        }
        history.reverse();

        let mut running: i64 = 0;
        let mut chained = true;
        for entry in &history {
            let expected_after = entry.balance_before.amount() + entry.signed_amount();
            if entry.balance_before.amount() != running
                || entry.balance_after.amount() != expected_after
            {
                chained = false;
            }
            running += entry.signed_amount();
        }

        let consistent = chained && running == balance.amount.amount();
        if !consistent {
            error!(
                balance = %balance.amount,
                history_total = running,
                "Balance does not match its history"
            );
        }

        Ok(LedgerReport {
            user_id,
            balance: balance.amount,
            history_total: running,
            entries: history.len(),
            consistent,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────────

    async fn load_inquiry(&self, id: InquiryId) -> Result<Inquiry, AppError> {
        self.store
            .get_inquiry(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Inquiry {}", id)))
    }

    async fn load_inquiry_of(
        &self,
        id: InquiryId,
        family: PaymentFamily,
    ) -> Result<Inquiry, AppError> {
        let inquiry = self.load_inquiry(id).await?;
        if inquiry.family != family {
            return Err(AppError::BadRequest(format!(
                "Inquiry {} is a {} inquiry, not {}",
                id, inquiry.family, family
            )));
        }
        Ok(inquiry)
    }

    /// Loads the quote's vouchers with the user's usage and prices them.
    async fn select_vouchers(
        &self,
        quote: &PaymentQuote,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<VoucherSelection, AppError> {
        if quote.voucher_codes.is_empty() {
            return Ok(VoucherSelection::default());
        }

        let found = self
            .store
            .find_vouchers_by_codes(&quote.voucher_codes)
            .await?;
        let mut candidates = Vec::with_capacity(found.len());
        for voucher in found {
            let user_usage = self
                .store
                .count_user_voucher_usage(voucher.id, quote.user_id)
                .await?;
            candidates.push(VoucherCandidate {
                voucher,
                user_usage,
            });
        }

        self.vouchers.apply(
            &quote.voucher_codes,
            &candidates,
            &quote.service_type,
            quote.subtotal()?,
            at,
        )
    }

    /// Marks an open quote EXPIRED. Best effort: the caller already knows
    /// the outcome.
    async fn expire(&self, quote: &PaymentQuote) {
        if !quote
            .status
            .can_transition(TransactionStatus::Expired, quote.family)
        {
            return;
        }
        if let Err(e) = self.sync_quote_status(&quote.key, TransactionStatus::Expired).await {
            warn!(payment_key = %quote.key, "Failed to mark quote expired: {}", e);
        }
    }

    async fn sync_quote_status(
        &self,
        key: &PaymentKey,
        status: TransactionStatus,
    ) -> Result<(), wallet_types::RepoError> {
        match key {
            PaymentKey::Order(id) => self.store.update_order_status(*id, status).await,
            PaymentKey::Inquiry(id) => self.store.update_inquiry_status(*id, status).await,
        }
    }

    /// Mirrors the transaction status onto its quote and emits the event.
    pub(crate) async fn after_commit(&self, tx: &Transaction) {
        if let Err(e) = self.sync_quote_status(&tx.payment_key, tx.status).await {
            warn!(transaction_id = %tx.id, "Failed to update quote status: {}", e);
        }
        self.notifier.notify(PaymentEvent::from_transaction(tx));
    }
}

/// Debits the total (if any) and moves `tx` to SUCCESS inside `scope`.
///
/// Fails with `InsufficientBalance` without staging anything.
pub(crate) fn settle<B: BalanceScope>(
    scope: &mut B,
    tx: &mut Transaction,
    receipt: ProviderReceipt,
) -> Result<(), AppError> {
    let before = scope.balance().amount;
    if !tx.total_payment.is_zero() {
        if before < tx.total_payment {
            return Err(AppError::InsufficientBalance {
                available: before.amount(),
                requested: tx.total_payment.amount(),
            });
        }
        scope.debit(tx.total_payment, tx.ledger_reference())?;
    }
    let after = scope.balance().amount;

    tx.succeed(before, after, receipt.provider_reference, receipt.receipt)?;
    let used_at = tx.completed_at.unwrap_or_else(now);
    for voucher_id in &tx.voucher_ids {
        scope.record_voucher_usage(UserVoucherUsage {
            voucher_id: *voucher_id,
            user_id: tx.user_id,
            transaction_id: tx.id,
            used_at,
        });
    }
    scope.record_transaction(tx.clone());
    Ok(())
}

/// Claims one global use of each selected voucher inside `scope`.
async fn reserve_vouchers<B: BalanceScope>(
    scope: &mut B,
    selection: &VoucherSelection,
) -> Result<(), AppError> {
    for applied in &selection.applied {
        if !scope.reserve_voucher_usage(applied.voucher_id).await? {
            return Err(AppError::VoucherRejected {
                code: applied.code.clone(),
                rejection: wallet_types::VoucherRejection::UsageExhausted,
            });
        }
    }
    Ok(())
}

/// Gives back the uses claimed by a transaction that will never settle.
pub(crate) async fn release_vouchers<B: BalanceScope>(
    scope: &mut B,
    tx: &Transaction,
) -> Result<(), AppError> {
    for voucher_id in &tx.voucher_ids {
        scope.release_voucher_usage(*voucher_id).await?;
    }
    Ok(())
}

pub(crate) fn failure_reason(err: GatewayError) -> FailureReason {
    match err {
        GatewayError::Rejected { code, message } => FailureReason { code, message },
        other => FailureReason {
            code: wallet_types::ErrorCode::ServiceUnavailable,
            message: other.to_string(),
        },
    }
}

fn expired(key: &PaymentKey) -> AppError {
    match key {
        PaymentKey::Order(id) => AppError::OrderExpired(*id),
        PaymentKey::Inquiry(id) => AppError::InquiryExpired(*id),
    }
}
