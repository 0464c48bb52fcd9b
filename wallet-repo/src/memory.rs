//! In-memory ledger store.
//!
//! Row locks are per-user async mutexes; table data sits behind one
//! synchronous lock that is never held across an await point. A user's
//! mutex is dropped from the lock map once no scope holds or awaits it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use wallet_types::{
    Balance, BalanceHistoryEntry, BalanceScope, Inquiry, InquiryId, LedgerReference, LedgerStore,
    Order, OrderId, PaymentKey, RepoError, StagedLedger, Transaction, TransactionId,
    TransactionStatus, UserId, UserVoucherUsage, Voucher, VoucherId,
};

#[derive(Default)]
struct Tables {
    balances: HashMap<UserId, Balance>,
    history: HashMap<UserId, Vec<BalanceHistoryEntry>>,
    inquiries: HashMap<InquiryId, Inquiry>,
    orders: HashMap<OrderId, Order>,
    transactions: HashMap<TransactionId, Transaction>,
    keys: HashMap<PaymentKey, TransactionId>,
    vouchers: HashMap<VoucherId, Voucher>,
    voucher_usages: Vec<UserVoucherUsage>,
}

impl Tables {
    /// Moves `current_usage` by `delta`, clamped to `[0, max_usage]`.
    fn adjust_voucher_usage(
        &mut self,
        voucher_id: VoucherId,
        delta: i64,
    ) -> Result<bool, RepoError> {
        let voucher = self
            .vouchers
            .get_mut(&voucher_id)
            .ok_or(RepoError::NotFound)?;
        if delta > 0 && voucher.current_usage + delta > voucher.max_usage {
            return Ok(false);
        }
        voucher.current_usage = (voucher.current_usage + delta).max(0);
        Ok(true)
    }

    fn transaction_by_key(&self, key: &PaymentKey) -> Option<&Transaction> {
        self.keys.get(key).and_then(|id| self.transactions.get(id))
    }

    /// Rejects staged transaction writes that would overwrite a terminal
    /// row or reuse a payment key.
    fn check_transaction_write(&self, tx: &Transaction) -> Result<(), RepoError> {
        match self.transactions.get(&tx.id) {
            Some(existing) if existing.status != TransactionStatus::Processing => Err(
                RepoError::Conflict(format!("Transaction {} is already {}", tx.id, existing.status)),
            ),
            Some(_) => Ok(()),
            None if self.keys.contains_key(&tx.payment_key) => Err(RepoError::Conflict(format!(
                "Payment key {} already has a transaction",
                tx.payment_key
            ))),
            None => Ok(()),
        }
    }
}

/// In-memory implementation of [`LedgerStore`].
///
/// Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, RepoError> {
        read_tables(&self.tables)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, RepoError> {
        write_tables(&self.tables)
    }
}

fn read_tables(tables: &RwLock<Tables>) -> Result<RwLockReadGuard<'_, Tables>, RepoError> {
    tables
        .read()
        .map_err(|_| RepoError::Database("memory store poisoned".into()))
}

fn write_tables(tables: &RwLock<Tables>) -> Result<RwLockWriteGuard<'_, Tables>, RepoError> {
    tables
        .write()
        .map_err(|_| RepoError::Database("memory store poisoned".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Balance scope
// ─────────────────────────────────────────────────────────────────────────────

/// Locked scope over one user's balance.
///
/// Voucher claims are written through to the tables immediately and
/// reverted on drop unless the scope committed.
pub struct MemoryScope {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
    staged: StagedLedger,
    voucher_claims: Vec<(VoucherId, i64)>,
    committed: bool,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        let user_id = self.staged.balance().user_id;

        if !self.committed && !self.voucher_claims.is_empty() {
            match self.tables.write() {
                Ok(mut tables) => {
                    for (voucher_id, delta) in self.voucher_claims.drain(..).rev() {
                        if let Err(e) = tables.adjust_voucher_usage(voucher_id, -delta) {
                            warn!(voucher_id = %voucher_id, "Cannot return voucher claim: {}", e);
                        }
                    }
                    debug!(user_id = %user_id, "Returned voucher claims of an uncommitted scope");
                }
                Err(_) => {
                    warn!(user_id = %user_id, "Cannot return voucher claims: memory store poisoned")
                }
            }
        }

        // Our guard and the map entry are the only references left when
        // no other scope is waiting for this user.
        self.locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

#[async_trait]
impl BalanceScope for MemoryScope {
    fn staged(&self) -> &StagedLedger {
        &self.staged
    }

    fn staged_mut(&mut self) -> &mut StagedLedger {
        &mut self.staged
    }

    async fn find_transaction_by_key(
        &mut self,
        key: &PaymentKey,
    ) -> Result<Option<Transaction>, RepoError> {
        if let Some(tx) = self
            .staged
            .transactions()
            .iter()
            .find(|t| &t.payment_key == key)
        {
            return Ok(Some(tx.clone()));
        }
        Ok(read_tables(&self.tables)?.transaction_by_key(key).cloned())
    }

    async fn has_history_reference(
        &mut self,
        reference: &LedgerReference,
    ) -> Result<bool, RepoError> {
        if self.staged.has_reference(reference) {
            return Ok(true);
        }
        let user_id = self.staged.balance().user_id;
        let tables = read_tables(&self.tables)?;
        Ok(tables
            .history
            .get(&user_id)
            .is_some_and(|entries| entries.iter().any(|e| &e.reference() == reference)))
    }

    async fn reserve_voucher_usage(&mut self, voucher_id: VoucherId) -> Result<bool, RepoError> {
        let claimed = write_tables(&self.tables)?.adjust_voucher_usage(voucher_id, 1)?;
        if claimed {
            self.voucher_claims.push((voucher_id, 1));
        }
        Ok(claimed)
    }

    async fn release_voucher_usage(&mut self, voucher_id: VoucherId) -> Result<(), RepoError> {
        let mut tables = write_tables(&self.tables)?;
        let before = tables
            .vouchers
            .get(&voucher_id)
            .map(|v| v.current_usage)
            .ok_or(RepoError::NotFound)?;
        tables.adjust_voucher_usage(voucher_id, -1)?;
        if before > 0 {
            self.voucher_claims.push((voucher_id, -1));
        }
        Ok(())
    }

    async fn commit(mut self) -> Result<(), RepoError> {
        let mut tables = write_tables(&self.tables)?;

        for tx in self.staged.transactions() {
            tables.check_transaction_write(tx)?;
        }

        let balance = self.staged.balance().clone();
        let user_id = balance.user_id;
        tables.balances.insert(user_id, balance);
        tables
            .history
            .entry(user_id)
            .or_default()
            .extend(self.staged.entries().iter().cloned());

        for tx in self.staged.transactions() {
            tables.keys.insert(tx.payment_key, tx.id);
            tables.transactions.insert(tx.id, tx.clone());
        }
        tables
            .voucher_usages
            .extend(self.staged.voucher_usages().iter().cloned());
        drop(tables);

        self.committed = true;
        debug!(
            user_id = %user_id,
            entries = self.staged.entries().len(),
            transactions = self.staged.transactions().len(),
            "Committed balance scope"
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl LedgerStore for MemoryStore {
    type Scope = MemoryScope;

    async fn get_balance(&self, user_id: UserId) -> Result<Option<Balance>, RepoError> {
        Ok(self.read()?.balances.get(&user_id).cloned())
    }

    async fn list_history(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<BalanceHistoryEntry>, RepoError> {
        let tables = self.read()?;
        let entries = tables.history.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(entries
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn lock_for_update(&self, user_id: UserId) -> Result<MemoryScope, RepoError> {
        let lock = self.locks.entry(user_id).or_default().clone();
        let guard = lock.lock_owned().await;

        let balance = self
            .read()?
            .balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Balance::open(user_id));

        Ok(MemoryScope {
            tables: Arc::clone(&self.tables),
            locks: Arc::clone(&self.locks),
            staged: StagedLedger::new(balance),
            voucher_claims: Vec::new(),
            committed: false,
            _guard: guard,
        })
    }

    async fn save_inquiry(&self, inquiry: &Inquiry) -> Result<(), RepoError> {
        self.write()?.inquiries.insert(inquiry.id, inquiry.clone());
        Ok(())
    }

    async fn get_inquiry(&self, id: InquiryId) -> Result<Option<Inquiry>, RepoError> {
        Ok(self.read()?.inquiries.get(&id).cloned())
    }

    async fn update_inquiry_status(
        &self,
        id: InquiryId,
        status: TransactionStatus,
    ) -> Result<(), RepoError> {
        let mut tables = self.write()?;
        let inquiry = tables.inquiries.get_mut(&id).ok_or(RepoError::NotFound)?;
        inquiry.status = status;
        Ok(())
    }

    async fn place_order(&self, inquiry: &Inquiry, order: &Order) -> Result<(), RepoError> {
        let mut tables = self.write()?;
        let stored = tables
            .inquiries
            .get_mut(&inquiry.id)
            .ok_or(RepoError::NotFound)?;
        if stored.status != TransactionStatus::Inquiry {
            return Err(RepoError::Conflict(format!(
                "Inquiry {} is already {}",
                inquiry.id, stored.status
            )));
        }
        *stored = inquiry.clone();
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: TransactionStatus,
    ) -> Result<(), RepoError> {
        let mut tables = self.write()?;
        let order = tables.orders.get_mut(&id).ok_or(RepoError::NotFound)?;
        order.status = status;
        Ok(())
    }

    async fn find_transaction_by_key(
        &self,
        key: &PaymentKey,
    ) -> Result<Option<Transaction>, RepoError> {
        Ok(self.read()?.transaction_by_key(key).cloned())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError> {
        Ok(self.read()?.transactions.get(&id).cloned())
    }

    async fn get_transaction_by_reference(
        &self,
        provider_reference: &str,
    ) -> Result<Option<Transaction>, RepoError> {
        Ok(self
            .read()?
            .transactions
            .values()
            .find(|t| t.provider_reference.as_deref() == Some(provider_reference))
            .cloned())
    }

    async fn list_processing(&self, limit: usize) -> Result<Vec<Transaction>, RepoError> {
        let tables = self.read()?;
        let mut pending: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Processing)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn save_voucher(&self, voucher: &Voucher) -> Result<(), RepoError> {
        let mut tables = self.write()?;
        let code_taken = tables
            .vouchers
            .values()
            .any(|v| v.id != voucher.id && v.code.eq_ignore_ascii_case(&voucher.code));
        if code_taken {
            return Err(RepoError::Conflict(format!(
                "Voucher code {} already exists",
                voucher.code
            )));
        }
        tables.vouchers.insert(voucher.id, voucher.clone());
        Ok(())
    }

    async fn find_vouchers_by_codes(&self, codes: &[String]) -> Result<Vec<Voucher>, RepoError> {
        let tables = self.read()?;
        Ok(tables
            .vouchers
            .values()
            .filter(|v| codes.iter().any(|c| c.eq_ignore_ascii_case(&v.code)))
            .cloned()
            .collect())
    }

    async fn get_voucher(&self, id: VoucherId) -> Result<Option<Voucher>, RepoError> {
        Ok(self.read()?.vouchers.get(&id).cloned())
    }

    async fn count_user_voucher_usage(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<i64, RepoError> {
        let tables = self.read()?;
        let consumed = tables
            .voucher_usages
            .iter()
            .filter(|u| u.voucher_id == voucher_id && u.user_id == user_id)
            .count();
        let in_flight = tables
            .transactions
            .values()
            .filter(|t| {
                t.user_id == user_id
                    && t.status == TransactionStatus::Processing
                    && t.voucher_ids.contains(&voucher_id)
            })
            .count();
        Ok((consumed + in_flight) as i64)
    }
}
