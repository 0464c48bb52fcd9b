//! Storage port.
//!
//! Adapters (Postgres, in-memory) implement [`LedgerStore`]. Every balance
//! mutation happens inside a [`BalanceScope`] obtained from
//! [`LedgerStore::lock_for_update`].

use crate::domain::{
    Balance, BalanceHistoryEntry, Inquiry, InquiryId, LedgerReference, Money, Order, OrderId,
    PaymentKey, StagedLedger, Transaction, TransactionId, TransactionStatus, UserId,
    UserVoucherUsage, Voucher, VoucherId,
};
use crate::error::RepoError;

/// The storage port for the ledger and its satellite records.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Scope: BalanceScope;

    // ─────────────────────────────────────────────────────────────────────────────
    // Balances
    // ─────────────────────────────────────────────────────────────────────────────

    async fn get_balance(&self, user_id: UserId) -> Result<Option<Balance>, RepoError>;

    /// History entries for a user, newest first. `None` returns all of them.
    async fn list_history(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<BalanceHistoryEntry>, RepoError>;

    /// Takes the exclusive row lock on a user's balance, creating a zero
    /// balance first if the user has none.
    ///
    /// Same-user calls wait for the previous scope to commit or drop.
    async fn lock_for_update(&self, user_id: UserId) -> Result<Self::Scope, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Inquiries & Orders
    // ─────────────────────────────────────────────────────────────────────────────

    async fn save_inquiry(&self, inquiry: &Inquiry) -> Result<(), RepoError>;

    async fn get_inquiry(&self, id: InquiryId) -> Result<Option<Inquiry>, RepoError>;

    async fn update_inquiry_status(
        &self,
        id: InquiryId,
        status: TransactionStatus,
    ) -> Result<(), RepoError>;

    /// Stores `order` and the inquiry's new status together.
    ///
    /// Fails with [`RepoError::Conflict`] unless the stored inquiry is still
    /// in INQUIRY.
    async fn place_order(&self, inquiry: &Inquiry, order: &Order) -> Result<(), RepoError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError>;

    async fn update_order_status(
        &self,
        id: OrderId,
        status: TransactionStatus,
    ) -> Result<(), RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────────

    async fn find_transaction_by_key(
        &self,
        key: &PaymentKey,
    ) -> Result<Option<Transaction>, RepoError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError>;

    async fn get_transaction_by_reference(
        &self,
        provider_reference: &str,
    ) -> Result<Option<Transaction>, RepoError>;

    /// Oldest PROCESSING transactions first.
    async fn list_processing(&self, limit: usize) -> Result<Vec<Transaction>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Vouchers
    // ─────────────────────────────────────────────────────────────────────────────

    async fn save_voucher(&self, voucher: &Voucher) -> Result<(), RepoError>;

    /// Vouchers matching `codes`, compared case-insensitively. Unknown codes
    /// are simply absent from the result.
    async fn find_vouchers_by_codes(&self, codes: &[String]) -> Result<Vec<Voucher>, RepoError>;

    async fn get_voucher(&self, id: VoucherId) -> Result<Option<Voucher>, RepoError>;

    /// How many times `user_id` has consumed the voucher, counting payments
    /// still in PROCESSING.
    async fn count_user_voucher_usage(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<i64, RepoError>;

}

/// A locked balance mutation scope.
///
/// Writes are staged in a [`StagedLedger`] and flushed by
/// [`BalanceScope::commit`]. Dropping the scope without committing discards
/// them, returns any voucher uses it claimed and releases the lock.
#[async_trait::async_trait]
pub trait BalanceScope: Send + Sized {
    fn staged(&self) -> &StagedLedger;

    fn staged_mut(&mut self) -> &mut StagedLedger;

    /// Reads inside the lock; sees transactions committed by earlier
    /// holders of the same lock.
    async fn find_transaction_by_key(
        &mut self,
        key: &PaymentKey,
    ) -> Result<Option<Transaction>, RepoError>;

    async fn has_history_reference(
        &mut self,
        reference: &LedgerReference,
    ) -> Result<bool, RepoError>;

    /// Claims one global use of a voucher if `current_usage` is below
    /// `max_usage`. Returns `false` when the voucher is exhausted.
    ///
    /// The claim is visible to other scopes at once but only becomes
    /// permanent when this scope commits.
    async fn reserve_voucher_usage(&mut self, voucher_id: VoucherId) -> Result<bool, RepoError>;

    /// Gives back one use of a voucher as part of this scope.
    async fn release_voucher_usage(&mut self, voucher_id: VoucherId) -> Result<(), RepoError>;

    async fn commit(self) -> Result<(), RepoError>;

    fn balance(&self) -> &Balance {
        self.staged().balance()
    }

    /// Stages a debit and its history entry.
    ///
    /// Fails with `InsufficientBalance` if `amount` exceeds the balance.
    fn debit(
        &mut self,
        amount: Money,
        reference: LedgerReference,
    ) -> Result<BalanceHistoryEntry, RepoError> {
        Ok(self.staged_mut().debit(amount, reference)?)
    }

    fn credit(
        &mut self,
        amount: Money,
        reference: LedgerReference,
    ) -> Result<BalanceHistoryEntry, RepoError> {
        Ok(self.staged_mut().credit(amount, reference)?)
    }

    fn record_transaction(&mut self, tx: Transaction) {
        self.staged_mut().record_transaction(tx);
    }

    fn record_voucher_usage(&mut self, usage: UserVoucherUsage) {
        self.staged_mut().record_voucher_usage(usage);
    }
}
