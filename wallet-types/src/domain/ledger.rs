//! Writes staged inside a balance mutation scope.

use super::balance::{Balance, BalanceHistoryEntry, Direction, LedgerReference};
use super::money::Money;
use super::transaction::Transaction;
use super::voucher::UserVoucherUsage;
use crate::error::DomainError;

/// Everything a locked scope will write on commit.
///
/// Storage adapters hold one of these next to their row lock and flush it
/// in a single atomic unit. Balance and history only change together
/// through [`StagedLedger::debit`] and [`StagedLedger::credit`].
#[derive(Debug, Clone)]
pub struct StagedLedger {
    initial: Balance,
    balance: Balance,
    entries: Vec<BalanceHistoryEntry>,
    transactions: Vec<Transaction>,
    voucher_usages: Vec<UserVoucherUsage>,
}

impl StagedLedger {
    pub fn new(balance: Balance) -> Self {
        Self {
            initial: balance.clone(),
            balance,
            entries: Vec::new(),
            transactions: Vec::new(),
            voucher_usages: Vec::new(),
        }
    }

    /// Balance as it will be after commit.
    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    /// Balance as it was when the lock was taken.
    pub fn initial(&self) -> &Balance {
        &self.initial
    }

    pub fn debit(
        &mut self,
        amount: Money,
        reference: LedgerReference,
    ) -> Result<BalanceHistoryEntry, DomainError> {
        self.post(Direction::Debit, amount, reference)
    }

    pub fn credit(
        &mut self,
        amount: Money,
        reference: LedgerReference,
    ) -> Result<BalanceHistoryEntry, DomainError> {
        self.post(Direction::Credit, amount, reference)
    }

    fn post(
        &mut self,
        direction: Direction,
        amount: Money,
        reference: LedgerReference,
    ) -> Result<BalanceHistoryEntry, DomainError> {
        let (balance, entry) = self.balance.apply(direction, amount, reference)?;
        self.balance = balance;
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Stages an insert, or an update of a transaction staged earlier.
    pub fn record_transaction(&mut self, tx: Transaction) {
        match self.transactions.iter_mut().find(|t| t.id == tx.id) {
            Some(existing) => *existing = tx,
            None => self.transactions.push(tx),
        }
    }

    pub fn record_voucher_usage(&mut self, usage: UserVoucherUsage) {
        self.voucher_usages.push(usage);
    }

    pub fn has_reference(&self, reference: &LedgerReference) -> bool {
        self.entries.iter().any(|e| &e.reference() == reference)
    }

    pub fn entries(&self) -> &[BalanceHistoryEntry] {
        &self.entries
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn voucher_usages(&self) -> &[UserVoucherUsage] {
        &self.voucher_usages
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.transactions.is_empty() && self.voucher_usages.is_empty()
    }

    pub fn balance_changed(&self) -> bool {
        !self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HistoryCategory, ReferenceType, UserId};

    #[test]
    fn test_staged_movements_chain() {
        let mut balance = Balance::open(UserId::new());
        balance.amount = Money::new(100_000).unwrap();
        let mut staged = StagedLedger::new(balance);

        let first = staged
            .credit(
                Money::new(20_000).unwrap(),
                LedgerReference::new(HistoryCategory::Deposit, ReferenceType::Deposit, "topup-1"),
            )
            .unwrap();
        let second = staged
            .debit(
                Money::new(50_000).unwrap(),
                LedgerReference::new(HistoryCategory::Prepaid, ReferenceType::Transaction, "tx"),
            )
            .unwrap();

        assert_eq!(first.balance_after, second.balance_before);
        assert_eq!(staged.balance().amount.amount(), 70_000);
        assert_eq!(staged.initial().amount.amount(), 100_000);
        assert_eq!(staged.entries().len(), 2);
    }

    #[test]
    fn test_failed_debit_stages_nothing() {
        let staged_balance = Balance::open(UserId::new());
        let mut staged = StagedLedger::new(staged_balance);

        let result = staged.debit(
            Money::new(1).unwrap(),
            LedgerReference::new(HistoryCategory::Transfer, ReferenceType::Transaction, "tx"),
        );

        assert!(result.is_err());
        assert!(staged.is_empty());
        assert!(staged.balance().amount.is_zero());
    }
}
