//! Settling PROCESSING transactions once the gateway knows their outcome.
//!
//! Outcomes arrive two ways: pulled with a status query, or pushed by the
//! gateway callback. Both funnel into the same locked resolution.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use wallet_types::{
    AppError, BalanceScope, FailureReason, LedgerStore, ProviderStatus, ReconcileSummary,
    StatusQuery, Transaction, TransactionId,
};

use crate::engine::{TransactionEngine, release_vouchers, settle};

impl<S: LedgerStore> TransactionEngine<S> {
    /// Queries the gateway for one transaction and applies the answer.
    ///
    /// Terminal transactions are returned as they are.
    #[instrument(skip(self), fields(transaction_id = %id))]
    pub async fn reconcile(&self, id: TransactionId) -> Result<Transaction, AppError> {
        let tx = self.get_transaction(id).await?;
        if tx.is_terminal() {
            return Ok(tx);
        }

        let query = StatusQuery {
            transaction_id: tx.id,
            idempotency_key: tx.payment_key.to_string(),
            provider_reference: tx.provider_reference.clone(),
        };
        let status = self.gateway.query_status(&query).await.map_err(|e| {
            warn!("Status query failed: {}", e);
            AppError::Upstream(e.to_string())
        })?;

        self.resolve(&tx, status).await
    }

    /// Applies a status pushed by the gateway.
    ///
    /// `reference` is the provider reference, or our transaction id for
    /// payments the gateway accepted without one.
    #[instrument(skip(self, status), fields(reference = %reference))]
    pub async fn apply_provider_status(
        &self,
        reference: &str,
        status: ProviderStatus,
    ) -> Result<Transaction, AppError> {
        let found = match self.store.get_transaction_by_reference(reference).await? {
            Some(tx) => Some(tx),
            None => match reference.parse::<TransactionId>() {
                Ok(id) => self.store.get_transaction(id).await?,
                Err(_) => None,
            },
        };
        let tx = found.ok_or_else(|| {
            AppError::NotFound(format!("Transaction with reference {}", reference))
        })?;
        if tx.is_terminal() {
            info!(transaction_id = %tx.id, status = %tx.status, "Ignoring status for settled transaction");
            return Ok(tx);
        }

        self.resolve(&tx, status).await
    }

    /// Reconciles up to `limit` of the oldest PROCESSING transactions.
    #[instrument(skip(self))]
    pub async fn reconcile_pending(&self, limit: usize) -> Result<ReconcileSummary, AppError> {
        let pending = self.store.list_processing(limit).await?;
        let mut summary = ReconcileSummary::default();

        for tx in pending {
            match self.reconcile(tx.id).await {
                Ok(updated) => summary.record(updated.status),
                Err(e) => {
                    error!(transaction_id = %tx.id, "Reconciliation failed: {}", e);
                    summary.record_error();
                }
            }
        }

        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                resolved = summary.resolved,
                still_processing = summary.still_processing,
                errors = summary.errors,
                "Reconciliation batch finished"
            );
        }
        Ok(summary)
    }

    async fn resolve(
        &self,
        snapshot: &Transaction,
        status: ProviderStatus,
    ) -> Result<Transaction, AppError> {
        if status == ProviderStatus::Pending {
            return Ok(snapshot.clone());
        }

        let mut scope = self.store.lock_for_update(snapshot.user_id).await?;
        let mut tx = scope
            .find_transaction_by_key(&snapshot.payment_key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {}", snapshot.id)))?;
        if tx.is_terminal() {
            return Ok(tx);
        }

        match status {
            ProviderStatus::Success(receipt) => {
                if let Err(e) = settle(&mut scope, &mut tx, receipt) {
                    // The provider delivered but the balance no longer
                    // covers it; leave the transaction open for an operator.
                    error!(transaction_id = %tx.id, "Cannot settle confirmed payment: {}", e);
                    return Err(e);
                }
            }
            ProviderStatus::Failed { code, message } => {
                tx.fail(FailureReason { code, message })?;
                scope.record_transaction(tx.clone());
                release_vouchers(&mut scope, &tx).await?;
            }
            ProviderStatus::Refunded => {
                tx.refund()?;
                scope.record_transaction(tx.clone());
                release_vouchers(&mut scope, &tx).await?;
            }
            ProviderStatus::Pending => return Ok(tx),
        }

        scope.commit().await?;

        info!(transaction_id = %tx.id, status = %tx.status, "Transaction reconciled");
        self.after_commit(&tx).await;
        Ok(tx)
    }
}

/// Periodically reconciles PROCESSING transactions.
pub struct ReconciliationWorker<S: LedgerStore> {
    engine: Arc<TransactionEngine<S>>,
    interval: Duration,
    batch_size: usize,
}

impl<S: LedgerStore> ReconciliationWorker<S> {
    pub fn new(engine: Arc<TransactionEngine<S>>, interval: Duration, batch_size: usize) -> Self {
        Self {
            engine,
            interval,
            batch_size,
        }
    }

    /// Runs forever; spawn it.
    pub async fn run(self) {
        info!(
            "Starting reconciliation worker (every {:?}, batch {})",
            self.interval, self.batch_size
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) -> ReconcileSummary {
        match self.engine.reconcile_pending(self.batch_size).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Failed to list pending transactions: {}", e);
                ReconcileSummary::default()
            }
        }
    }
}
