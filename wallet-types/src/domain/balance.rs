//! Balance row and its append-only history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::id::UserId;
use super::money::Money;
use crate::error::DomainError;

/// Direction of a balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "CREDIT",
            Direction::Debit => "DEBIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREDIT" => Some(Direction::Credit),
            "DEBIT" => Some(Direction::Debit),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business category of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryCategory {
    Deposit,
    Prepaid,
    Postpaid,
    Transfer,
}

impl HistoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryCategory::Deposit => "DEPOSIT",
            HistoryCategory::Prepaid => "PREPAID",
            HistoryCategory::Postpaid => "POSTPAID",
            HistoryCategory::Transfer => "TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(HistoryCategory::Deposit),
            "PREPAID" => Some(HistoryCategory::Prepaid),
            "POSTPAID" => Some(HistoryCategory::Postpaid),
            "TRANSFER" => Some(HistoryCategory::Transfer),
            _ => None,
        }
    }
}

/// Kind of record a history entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Transaction,
    Deposit,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Transaction => "TRANSACTION",
            ReferenceType::Deposit => "DEPOSIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRANSACTION" => Some(ReferenceType::Transaction),
            "DEPOSIT" => Some(ReferenceType::Deposit),
            _ => None,
        }
    }
}

/// What caused a balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct LedgerReference {
    pub category: HistoryCategory,
    pub reference_type: ReferenceType,
    pub reference_id: String,
}

impl LedgerReference {
    pub fn new(
        category: HistoryCategory,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            category,
            reference_type,
            reference_id: reference_id.into(),
        }
    }
}

/// A user's stored balance. One row per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Balance {
    pub user_id: UserId,
    /// Spendable amount; never negative.
    pub amount: Money,
    /// Funds held for payments awaiting settlement. Payments keep the row
    /// locked instead of holding funds, so this stays zero; movements
    /// carry it through unchanged.
    pub pending_amount: Money,
    /// Loyalty points. Stored and reported, never earned or spent here.
    pub points: i64,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// A fresh zero balance.
    pub fn open(user_id: UserId) -> Self {
        Self {
            user_id,
            amount: Money::zero(),
            pending_amount: Money::zero(),
            points: 0,
            updated_at: super::now(),
        }
    }

    pub fn has_sufficient_funds(&self, amount: Money) -> bool {
        self.amount >= amount
    }

    /// Applies one movement and produces the matching history entry.
    ///
    /// This is the only place a balance amount changes; every caller gets the
    /// entry back and cannot obtain the new balance without it.
    pub(crate) fn apply(
        &self,
        direction: Direction,
        amount: Money,
        reference: LedgerReference,
    ) -> Result<(Balance, BalanceHistoryEntry), DomainError> {
        if amount.is_zero() {
            return Err(DomainError::Validation(
                "Balance movement must be positive".into(),
            ));
        }

        let after = match direction {
            Direction::Debit => self.amount.checked_sub(amount)?,
            Direction::Credit => self.amount.checked_add(amount)?,
        };
        let now = super::now();

        let entry = BalanceHistoryEntry {
            user_id: self.user_id,
            direction,
            category: reference.category,
            amount,
            balance_before: self.amount,
            balance_after: after,
            reference_type: reference.reference_type,
            reference_id: reference.reference_id,
            created_at: now,
        };
        let balance = Balance {
            amount: after,
            updated_at: now,
            ..self.clone()
        };

        Ok((balance, entry))
    }
}

/// Immutable record of one balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BalanceHistoryEntry {
    pub user_id: UserId,
    pub direction: Direction,
    pub category: HistoryCategory,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl BalanceHistoryEntry {
    /// Amount with sign: positive for credits, negative for debits.
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Credit => self.amount.amount(),
            Direction::Debit => -self.amount.amount(),
        }
    }

    pub fn reference(&self) -> LedgerReference {
        LedgerReference::new(self.category, self.reference_type, self.reference_id.clone())
    }
}
