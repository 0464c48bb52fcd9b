//! Voucher selection for a single payment.
//!
//! The per-voucher rules live on [`Voucher`]; this module applies a list
//! of codes to one subtotal.

use chrono::{DateTime, Utc};

use wallet_types::{AppError, Money, ServiceType, Voucher, VoucherId, VoucherRejection};

/// A voucher loaded for evaluation, with the paying user's usage count.
#[derive(Debug, Clone)]
pub struct VoucherCandidate {
    pub voucher: Voucher,
    pub user_usage: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedVoucher {
    pub voucher_id: VoucherId,
    pub code: String,
    pub discount: Money,
}

/// Outcome of applying vouchers to a subtotal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoucherSelection {
    pub applied: Vec<AppliedVoucher>,
    /// Sum of applied discounts, never above the subtotal.
    pub discount: Money,
}

impl VoucherSelection {
    pub fn voucher_ids(&self) -> Vec<VoucherId> {
        self.applied.iter().map(|v| v.voucher_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Stateless voucher rules engine.
#[derive(Debug, Clone, Copy)]
pub struct VoucherEngine {
    max_per_transaction: usize,
}

impl VoucherEngine {
    pub fn new(max_per_transaction: usize) -> Self {
        Self {
            max_per_transaction,
        }
    }

    pub fn max_per_transaction(&self) -> usize {
        self.max_per_transaction
    }

    /// Rejects too many codes, or the same code twice.
    pub fn check_codes(&self, codes: &[String]) -> Result<(), AppError> {
        if codes.len() > self.max_per_transaction {
            return Err(AppError::MaxVouchersExceeded {
                max: self.max_per_transaction,
                got: codes.len(),
            });
        }
        for (i, code) in codes.iter().enumerate() {
            if code.trim().is_empty() {
                return Err(AppError::BadRequest("Voucher code cannot be empty".into()));
            }
            if codes[..i].iter().any(|c| c.eq_ignore_ascii_case(code)) {
                return Err(AppError::BadRequest(format!(
                    "Voucher {} is listed more than once",
                    code
                )));
            }
        }
        Ok(())
    }

    pub fn is_applicable(
        &self,
        voucher: &Voucher,
        service_type: &ServiceType,
        amount: Money,
        user_usage: i64,
        now: DateTime<Utc>,
    ) -> Result<(), VoucherRejection> {
        voucher.check_applicable(service_type, amount, user_usage, now)
    }

    pub fn compute_discount(&self, voucher: &Voucher, amount: Money) -> Money {
        voucher.compute_discount(amount)
    }

    /// Applies `codes` in the order given.
    ///
    /// Each voucher is checked and priced against the full subtotal; the
    /// running total is clamped so the combined discount never exceeds it.
    pub fn apply(
        &self,
        codes: &[String],
        candidates: &[VoucherCandidate],
        service_type: &ServiceType,
        subtotal: Money,
        now: DateTime<Utc>,
    ) -> Result<VoucherSelection, AppError> {
        self.check_codes(codes)?;

        let mut remaining = subtotal;
        let mut applied = Vec::with_capacity(codes.len());

        for code in codes {
            let candidate = candidates
                .iter()
                .find(|c| c.voucher.code.eq_ignore_ascii_case(code.trim()))
                .ok_or_else(|| AppError::UnknownVoucher(code.clone()))?;

            self.is_applicable(
                &candidate.voucher,
                service_type,
                subtotal,
                candidate.user_usage,
                now,
            )
            .map_err(|rejection| AppError::VoucherRejected {
                code: candidate.voucher.code.clone(),
                rejection,
            })?;

            let discount = self
                .compute_discount(&candidate.voucher, subtotal)
                .min(remaining);
            remaining = remaining.saturating_sub(discount);

            applied.push(AppliedVoucher {
                voucher_id: candidate.voucher.id,
                code: candidate.voucher.code.clone(),
                discount,
            });
        }

        Ok(VoucherSelection {
            applied,
            discount: subtotal.saturating_sub(remaining),
        })
    }
}

impl Default for VoucherEngine {
    fn default() -> Self {
        Self::new(2)
    }
}
