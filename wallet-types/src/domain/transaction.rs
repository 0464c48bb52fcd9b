//! Transaction domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::balance::{LedgerReference, ReferenceType};
use super::id::{TransactionId, UserId, VoucherId};
use super::inquiry::{PaymentFamily, PaymentKey, PaymentQuote, ServiceType};
use super::money::Money;
use super::status::TransactionStatus;
use crate::error::{DomainError, ErrorCode};

/// Receipt fields returned by the provider on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Receipt {
    /// Serial number printed on the voucher / top-up confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Prepaid electricity token and similar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Why a transaction ended in FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FailureReason {
    pub code: ErrorCode,
    pub message: String,
}

/// An executed payment.
///
/// Created in PROCESSING by the engine and immutable once terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub family: PaymentFamily,
    #[schema(value_type = String, example = "order:3f0e6a8c-8d9b-4f4e-9a43-2b1a9c1d7e55")]
    pub payment_key: PaymentKey,
    pub service_type: ServiceType,
    pub target: String,
    pub product_code: Option<String>,
    /// Base price quoted by the biller.
    pub amount: Money,
    pub admin_fee: Money,
    pub discount: Money,
    /// `amount + admin_fee - discount`, the sum debited on success.
    pub total_payment: Money,
    pub status: TransactionStatus,
    pub balance_before: Option<Money>,
    pub balance_after: Option<Money>,
    pub provider_reference: Option<String>,
    pub receipt: Option<Receipt>,
    pub failure: Option<FailureReason>,
    pub voucher_ids: Vec<VoucherId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Starts executing a quote.
    pub fn processing(
        quote: &PaymentQuote,
        discount: Money,
        voucher_ids: Vec<VoucherId>,
    ) -> Result<Self, DomainError> {
        let status = quote
            .status
            .transition(TransactionStatus::Processing, quote.family)?;
        let subtotal = quote.subtotal()?;
        if discount > subtotal {
            return Err(DomainError::Validation(
                "Discount cannot exceed the transaction amount".into(),
            ));
        }

        Ok(Self {
            id: TransactionId::new(),
            user_id: quote.user_id,
            family: quote.family,
            payment_key: quote.key,
            service_type: quote.service_type.clone(),
            target: quote.target.clone(),
            product_code: quote.product_code.clone(),
            amount: quote.price,
            admin_fee: quote.admin_fee,
            discount,
            total_payment: subtotal.saturating_sub(discount),
            status,
            balance_before: None,
            balance_after: None,
            provider_reference: None,
            receipt: None,
            failure: None,
            voucher_ids,
            created_at: super::now(),
            completed_at: None,
        })
    }

    /// The history reference used for this transaction's debit.
    pub fn ledger_reference(&self) -> LedgerReference {
        LedgerReference::new(
            self.family.history_category(),
            ReferenceType::Transaction,
            self.id.to_string(),
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Records a settled payment.
    ///
    /// Rejects a balance pair that does not differ by exactly `total_payment`.
    pub fn succeed(
        &mut self,
        balance_before: Money,
        balance_after: Money,
        provider_reference: String,
        receipt: Receipt,
    ) -> Result<(), DomainError> {
        if balance_before.checked_sub(self.total_payment)? != balance_after {
            return Err(DomainError::Validation(format!(
                "Balance movement {} -> {} does not match total payment {}",
                balance_before, balance_after, self.total_payment
            )));
        }
        self.status = self
            .status
            .transition(TransactionStatus::Success, self.family)?;
        self.balance_before = Some(balance_before);
        self.balance_after = Some(balance_after);
        self.provider_reference = Some(provider_reference);
        self.receipt = Some(receipt);
        self.completed_at = Some(super::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason) -> Result<(), DomainError> {
        self.status = self
            .status
            .transition(TransactionStatus::Failed, self.family)?;
        self.failure = Some(reason);
        self.completed_at = Some(super::now());
        Ok(())
    }

    /// The provider reversed the payment before settling it with us.
    pub fn refund(&mut self) -> Result<(), DomainError> {
        self.status = self
            .status
            .transition(TransactionStatus::Refunded, self.family)?;
        self.completed_at = Some(super::now());
        Ok(())
    }
}
