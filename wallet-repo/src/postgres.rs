//! PostgreSQL ledger store.
//!
//! Each balance scope is one database transaction holding
//! `SELECT ... FOR UPDATE` on the user's balance row.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use tracing::{debug, info};
use uuid::Uuid;

use wallet_types::{
    Balance, BalanceHistoryEntry, BalanceScope, Inquiry, InquiryId, LedgerReference, LedgerStore,
    Order, OrderId, PaymentKey, RepoError, StagedLedger, Transaction, TransactionId,
    TransactionStatus, UserId, Voucher, VoucherId,
};

use crate::types::{
    DbBalance, DbHistoryEntry, DbInquiry, DbOrder, DbTransaction, DbVoucher, TRANSACTION_COLUMNS,
    VOUCHER_COLUMNS,
};

fn db_err(e: sqlx::Error) -> RepoError {
    RepoError::Database(e.to_string())
}

/// Maps unique-key violations to [`RepoError::Conflict`].
fn write_err(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepoError::Conflict(db.message().to_string())
        }
        _ => RepoError::Database(e.to_string()),
    }
}

/// Executes SQL statements from a migration file, splitting by semicolons.
async fn execute_migration(pool: &PgPool, sql: &str, name: &str) -> Result<(), anyhow::Error> {
    debug!(migration = name, "Applying migration");
    for statement in sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration {} failed: {}", name, e))?;
        }
    }
    Ok(())
}

async fn run_migrations(pool: &PgPool) -> Result<(), anyhow::Error> {
    execute_migration(
        pool,
        include_str!("../migrations/0001_create_ledger_pg.sql"),
        "0001",
    )
    .await?;
    info!("Database migrations applied");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// PostgreSQL Store
// ─────────────────────────────────────────────────────────────────────────────

/// PostgreSQL store with row-level locking.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects and runs migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Balance scope
// ─────────────────────────────────────────────────────────────────────────────

pub struct PostgresScope {
    tx: sqlx::Transaction<'static, Postgres>,
    staged: StagedLedger,
}

async fn insert_history(
    conn: &mut sqlx::PgConnection,
    entry: &BalanceHistoryEntry,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"INSERT INTO balance_history
               (user_id, direction, category, amount, balance_before, balance_after, reference_type, reference_id, created_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
    )
    .bind(entry.user_id.into_uuid())
    .bind(entry.direction.as_str())
    .bind(entry.category.as_str())
    .bind(entry.amount.amount())
    .bind(entry.balance_before.amount())
    .bind(entry.balance_after.amount())
    .bind(entry.reference_type.as_str())
    .bind(&entry.reference_id)
    .bind(entry.created_at)
    .execute(conn)
    .await
    .map_err(write_err)?;
    Ok(())
}

/// Inserts a transaction or updates one that is still PROCESSING.
async fn upsert_transaction(
    conn: &mut sqlx::PgConnection,
    tx: &Transaction,
) -> Result<(), RepoError> {
    let receipt = tx.receipt.clone().unwrap_or_default();
    let voucher_ids: Vec<Uuid> = tx.voucher_ids.iter().map(|v| v.into_uuid()).collect();

    let result = sqlx::query(
        r#"INSERT INTO transactions
               (id, user_id, family, payment_key, service_type, target, product_code, amount, admin_fee,
                discount, total_payment, status, balance_before, balance_after, provider_reference,
                serial_number, token, failure_code, failure_message, voucher_ids, created_at, completed_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
           ON CONFLICT (id) DO UPDATE SET
               status = EXCLUDED.status,
               balance_before = EXCLUDED.balance_before,
               balance_after = EXCLUDED.balance_after,
               provider_reference = EXCLUDED.provider_reference,
               serial_number = EXCLUDED.serial_number,
               token = EXCLUDED.token,
               failure_code = EXCLUDED.failure_code,
               failure_message = EXCLUDED.failure_message,
               completed_at = EXCLUDED.completed_at
           WHERE transactions.status = 'PROCESSING'"#,
    )
    .bind(tx.id.into_uuid())
    .bind(tx.user_id.into_uuid())
    .bind(tx.family.as_str())
    .bind(tx.payment_key.to_string())
    .bind(tx.service_type.as_str())
    .bind(&tx.target)
    .bind(&tx.product_code)
    .bind(tx.amount.amount())
    .bind(tx.admin_fee.amount())
    .bind(tx.discount.amount())
    .bind(tx.total_payment.amount())
    .bind(tx.status.as_str())
    .bind(tx.balance_before.map(|m| m.amount()))
    .bind(tx.balance_after.map(|m| m.amount()))
    .bind(&tx.provider_reference)
    .bind(receipt.serial_number)
    .bind(receipt.token)
    .bind(tx.failure.as_ref().map(|f| f.code.as_str()))
    .bind(tx.failure.as_ref().map(|f| f.message.clone()))
    .bind(voucher_ids)
    .bind(tx.created_at)
    .bind(tx.completed_at)
    .execute(conn)
    .await
    .map_err(write_err)?;

    if result.rows_affected() == 0 {
        return Err(RepoError::Conflict(format!(
            "Transaction {} is already terminal",
            tx.id
        )));
    }
    Ok(())
}

#[async_trait]
impl BalanceScope for PostgresScope {
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

        let row: Option<DbTransaction> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE payment_key = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(key.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        row.map(DbTransaction::into_domain).transpose()
    }

    async fn has_history_reference(
        &mut self,
        reference: &LedgerReference,
    ) -> Result<bool, RepoError> {
        if self.staged.has_reference(reference) {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(
                   SELECT 1 FROM balance_history
                   WHERE user_id = $1 AND category = $2 AND reference_type = $3 AND reference_id = $4
               )"#,
        )
        .bind(self.staged.balance().user_id.into_uuid())
        .bind(reference.category.as_str())
        .bind(reference.reference_type.as_str())
        .bind(&reference.reference_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(exists)
    }

    async fn reserve_voucher_usage(&mut self, voucher_id: VoucherId) -> Result<bool, RepoError> {
        // The row lock taken here is held until the scope ends.
        let result = sqlx::query(
            r#"UPDATE vouchers SET current_usage = current_usage + 1
               WHERE id = $1 AND current_usage < max_usage"#,
        )
        .bind(voucher_id.into_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_voucher_usage(&mut self, voucher_id: VoucherId) -> Result<(), RepoError> {
        sqlx::query(
            r#"UPDATE vouchers SET current_usage = current_usage - 1
               WHERE id = $1 AND current_usage > 0"#,
        )
        .bind(voucher_id.into_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn commit(mut self) -> Result<(), RepoError> {
        if self.staged.balance_changed() {
            let balance = self.staged.balance();
            sqlx::query(
                r#"UPDATE balances SET amount = $2, updated_at = $3 WHERE user_id = $1"#,
            )
            .bind(balance.user_id.into_uuid())
            .bind(balance.amount.amount())
            .bind(balance.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }

        for entry in self.staged.entries() {
            insert_history(&mut self.tx, entry).await?;
        }

        for tx in self.staged.transactions() {
            upsert_transaction(&mut self.tx, tx).await?;
        }

        for usage in self.staged.voucher_usages() {
            sqlx::query(
                r#"INSERT INTO user_voucher_usages (voucher_id, user_id, transaction_id, used_at)
                   VALUES ($1, $2, $3, $4)"#,
            )
            .bind(usage.voucher_id.into_uuid())
            .bind(usage.user_id.into_uuid())
            .bind(usage.transaction_id.into_uuid())
            .bind(usage.used_at)
            .execute(&mut *self.tx)
            .await
            .map_err(write_err)?;
        }

        self.tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        debug!(
            user_id = %self.staged.balance().user_id,
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
impl LedgerStore for PostgresStore {
    type Scope = PostgresScope;

    async fn get_balance(&self, user_id: UserId) -> Result<Option<Balance>, RepoError> {
        let row: Option<DbBalance> = sqlx::query_as(
            r#"SELECT user_id, amount, pending_amount, points, updated_at FROM balances WHERE user_id = $1"#,
        )
        .bind(user_id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbBalance::into_domain).transpose()
    }

    async fn list_history(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<BalanceHistoryEntry>, RepoError> {
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows: Vec<DbHistoryEntry> = sqlx::query_as(
            r#"SELECT user_id, direction, category, amount, balance_before, balance_after, reference_type, reference_id, created_at
               FROM balance_history WHERE user_id = $1 ORDER BY id DESC LIMIT $2"#,
        )
        .bind(user_id.into_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbHistoryEntry::into_domain).collect()
    }

    async fn lock_for_update(&self, user_id: UserId) -> Result<PostgresScope, RepoError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        sqlx::query(r#"INSERT INTO balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING"#)
            .bind(user_id.into_uuid())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let row: DbBalance = sqlx::query_as(
            r#"SELECT user_id, amount, pending_amount, points, updated_at FROM balances WHERE user_id = $1 FOR UPDATE"#,
        )
        .bind(user_id.into_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        Ok(PostgresScope {
            tx,
            staged: StagedLedger::new(row.into_domain()?),
        })
    }

    async fn save_inquiry(&self, inquiry: &Inquiry) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO inquiries
                   (id, user_id, family, service_type, target, product_code, description, price, admin_fee, voucher_codes, status, expires_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(inquiry.id.into_uuid())
        .bind(inquiry.user_id.into_uuid())
        .bind(inquiry.family.as_str())
        .bind(inquiry.service_type.as_str())
        .bind(&inquiry.target)
        .bind(&inquiry.product_code)
        .bind(&inquiry.description)
        .bind(inquiry.price.amount())
        .bind(inquiry.admin_fee.amount())
        .bind(&inquiry.voucher_codes)
        .bind(inquiry.status.as_str())
        .bind(inquiry.expires_at)
        .bind(inquiry.created_at)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn get_inquiry(&self, id: InquiryId) -> Result<Option<Inquiry>, RepoError> {
        let row: Option<DbInquiry> = sqlx::query_as(
            r#"SELECT id, user_id, family, service_type, target, product_code, description, price, admin_fee, voucher_codes, status, expires_at, created_at
               FROM inquiries WHERE id = $1"#,
        )
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbInquiry::into_domain).transpose()
    }

    async fn update_inquiry_status(
        &self,
        id: InquiryId,
        status: TransactionStatus,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(r#"UPDATE inquiries SET status = $2 WHERE id = $1"#)
            .bind(id.into_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn place_order(&self, inquiry: &Inquiry, order: &Order) -> Result<(), RepoError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        let moved = sqlx::query(
            r#"UPDATE inquiries SET status = $2 WHERE id = $1 AND status = 'INQUIRY'"#,
        )
        .bind(inquiry.id.into_uuid())
        .bind(inquiry.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if moved.rows_affected() == 0 {
            return Err(RepoError::Conflict(format!(
                "Inquiry {} already has an order",
                inquiry.id
            )));
        }

        sqlx::query(
            r#"INSERT INTO orders
                   (id, inquiry_id, user_id, service_type, target, product_code, price, admin_fee, voucher_codes, status, expires_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(order.id.into_uuid())
        .bind(order.inquiry_id.into_uuid())
        .bind(order.user_id.into_uuid())
        .bind(order.service_type.as_str())
        .bind(&order.target)
        .bind(&order.product_code)
        .bind(order.price.amount())
        .bind(order.admin_fee.amount())
        .bind(&order.voucher_codes)
        .bind(order.status.as_str())
        .bind(order.expires_at)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        tx.commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
        let row: Option<DbOrder> = sqlx::query_as(
            r#"SELECT id, inquiry_id, user_id, service_type, target, product_code, price, admin_fee, voucher_codes, status, expires_at, created_at
               FROM orders WHERE id = $1"#,
        )
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbOrder::into_domain).transpose()
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: TransactionStatus,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(r#"UPDATE orders SET status = $2 WHERE id = $1"#)
            .bind(id.into_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn find_transaction_by_key(
        &self,
        key: &PaymentKey,
    ) -> Result<Option<Transaction>, RepoError> {
        let row: Option<DbTransaction> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE payment_key = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbTransaction::into_domain).transpose()
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError> {
        let row: Option<DbTransaction> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbTransaction::into_domain).transpose()
    }

    async fn get_transaction_by_reference(
        &self,
        provider_reference: &str,
    ) -> Result<Option<Transaction>, RepoError> {
        let row: Option<DbTransaction> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE provider_reference = $1 LIMIT 1",
            TRANSACTION_COLUMNS
        ))
        .bind(provider_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbTransaction::into_domain).transpose()
    }

    async fn list_processing(&self, limit: usize) -> Result<Vec<Transaction>, RepoError> {
        let rows: Vec<DbTransaction> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE status = 'PROCESSING' ORDER BY created_at ASC LIMIT $1",
            TRANSACTION_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbTransaction::into_domain).collect()
    }

    async fn save_voucher(&self, voucher: &Voucher) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO vouchers
                   (id, code, discount_type, discount_value, min_transaction, max_discount, max_usage, max_usage_per_user, current_usage, service_types, is_active, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               ON CONFLICT (id) DO UPDATE SET
                   code = EXCLUDED.code,
                   discount_type = EXCLUDED.discount_type,
                   discount_value = EXCLUDED.discount_value,
                   min_transaction = EXCLUDED.min_transaction,
                   max_discount = EXCLUDED.max_discount,
                   max_usage = EXCLUDED.max_usage,
                   max_usage_per_user = EXCLUDED.max_usage_per_user,
                   service_types = EXCLUDED.service_types,
                   is_active = EXCLUDED.is_active,
                   expires_at = EXCLUDED.expires_at"#,
        )
        .bind(voucher.id.into_uuid())
        .bind(&voucher.code)
        .bind(voucher.discount_type.as_str())
        .bind(voucher.discount_value)
        .bind(voucher.min_transaction.amount())
        .bind(voucher.max_discount.map(|m| m.amount()))
        .bind(voucher.max_usage)
        .bind(voucher.max_usage_per_user)
        .bind(voucher.current_usage)
        .bind(&voucher.service_types)
        .bind(voucher.is_active)
        .bind(voucher.expires_at)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn find_vouchers_by_codes(&self, codes: &[String]) -> Result<Vec<Voucher>, RepoError> {
        let upper: Vec<String> = codes.iter().map(|c| c.to_uppercase()).collect();
        let rows: Vec<DbVoucher> = sqlx::query_as(&format!(
            "SELECT {} FROM vouchers WHERE UPPER(code) = ANY($1)",
            VOUCHER_COLUMNS
        ))
        .bind(&upper)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbVoucher::into_domain).collect()
    }

    async fn get_voucher(&self, id: VoucherId) -> Result<Option<Voucher>, RepoError> {
        let row: Option<DbVoucher> = sqlx::query_as(&format!(
            "SELECT {} FROM vouchers WHERE id = $1",
            VOUCHER_COLUMNS
        ))
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbVoucher::into_domain).transpose()
    }

    async fn count_user_voucher_usage(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<i64, RepoError> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT
                   (SELECT COUNT(*) FROM user_voucher_usages WHERE voucher_id = $1 AND user_id = $2)
                 + (SELECT COUNT(*) FROM transactions
                    WHERE user_id = $2 AND status = 'PROCESSING' AND $1 = ANY(voucher_ids))"#,
        )
        .bind(voucher_id.into_uuid())
        .bind(user_id.into_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(count)
    }
}
