use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::model::{
    SecurityFlag, Transaction, TransactionStatus, TransactionType, UserAccount,
};

use super::{PortfolioStore, TransactionStore, UserStore};

/// Production store over PostgreSQL.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TX_COLUMNS: &str = "id, user_id, wallet_address, tx_type, status, from_symbol, to_symbol, \
     from_amount, to_amount, price, gas_used, gas_fee, client_ip, user_agent, \
     signature, nonce, security_flags, blocked_at, blocked_reason, created_at";

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    wallet_address: String,
    tx_type: String,
    status: String,
    from_symbol: String,
    to_symbol: String,
    from_amount: f64,
    to_amount: f64,
    price: f64,
    gas_used: f64,
    gas_fee: f64,
    client_ip: Option<String>,
    user_agent: Option<String>,
    signature: Option<String>,
    nonce: Option<String>,
    security_flags: Json<Vec<SecurityFlag>>,
    blocked_at: Option<DateTime<Utc>>,
    blocked_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_model(self) -> eyre::Result<Transaction> {
        Ok(Transaction {
            tx_type: TransactionType::parse(&self.tx_type)
                .ok_or_else(|| eyre::eyre!("unknown transaction type '{}'", self.tx_type))?,
            status: TransactionStatus::parse(&self.status)
                .ok_or_else(|| eyre::eyre!("unknown transaction status '{}'", self.status))?,
            client_ip: self.client_ip.and_then(|s| s.parse().ok()),
            id: self.id,
            user_id: self.user_id,
            wallet_address: self.wallet_address,
            from_symbol: self.from_symbol,
            to_symbol: self.to_symbol,
            from_amount: self.from_amount,
            to_amount: self.to_amount,
            price: self.price,
            gas_used: self.gas_used,
            gas_fee: self.gas_fee,
            user_agent: self.user_agent,
            signature: self.signature,
            nonce: self.nonce,
            security_flags: self.security_flags.0,
            blocked_at: self.blocked_at,
            blocked_reason: self.blocked_reason,
            created_at: self.created_at,
        })
    }
}

fn rows_to_models(rows: Vec<TransactionRow>) -> eyre::Result<Vec<Transaction>> {
    rows.into_iter().map(TransactionRow::into_model).collect()
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn insert(&self, tx: &Transaction) -> eyre::Result<()> {
        sqlx::query(
            "INSERT INTO transactions (id, user_id, wallet_address, tx_type, status, \
             from_symbol, to_symbol, from_amount, to_amount, price, gas_used, gas_fee, \
             client_ip, user_agent, signature, nonce, security_flags, blocked_at, \
             blocked_reason, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
             $16, $17, $18, $19, $20)",
        )
        .bind(&tx.id)
        .bind(&tx.user_id)
        .bind(&tx.wallet_address)
        .bind(tx.tx_type.as_str())
        .bind(tx.status.as_str())
        .bind(&tx.from_symbol)
        .bind(&tx.to_symbol)
        .bind(tx.from_amount)
        .bind(tx.to_amount)
        .bind(tx.price)
        .bind(tx.gas_used)
        .bind(tx.gas_fee)
        .bind(tx.client_ip.map(|ip| ip.to_string()))
        .bind(&tx.user_agent)
        .bind(&tx.signature)
        .bind(&tx.nonce)
        .bind(Json(&tx.security_flags))
        .bind(tx.blocked_at)
        .bind(&tx.blocked_reason)
        .bind(tx.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn created_since(&self, since: DateTime<Utc>) -> eyre::Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE created_at >= $1 ORDER BY created_at ASC"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows_to_models(rows)
    }

    async fn recent_for_user(&self, user_id: &str, limit: i64) -> eyre::Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows_to_models(rows)
    }

    async fn count_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM transactions WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    async fn count_for_wallet(&self, wallet: &str) -> eyre::Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE wallet_address = $1")
                .bind(wallet)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.0)
    }

    async fn count_for_wallet_since(
        &self,
        wallet: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM transactions WHERE wallet_address = $1 AND created_at >= $2",
        )
        .bind(wallet)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    async fn for_wallet_since(
        &self,
        wallet: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE wallet_address = $1 AND created_at >= $2 ORDER BY created_at ASC"
        ))
        .bind(wallet)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows_to_models(rows)
    }

    async fn for_pair_since(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE from_symbol = $1 AND to_symbol = $2 AND created_at >= $3 \
             ORDER BY created_at ASC"
        ))
        .bind(from_symbol)
        .bind(to_symbol)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows_to_models(rows)
    }

    async fn recent_for_pair(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        limit: i64,
    ) -> eyre::Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE from_symbol = $1 AND to_symbol = $2 \
             ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(from_symbol)
        .bind(to_symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows_to_models(rows)
    }

    async fn for_wallet_pair_since(
        &self,
        wallet: &str,
        from_symbol: &str,
        to_symbol: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE wallet_address = $1 AND from_symbol = $2 AND to_symbol = $3 \
             AND created_at >= $4 ORDER BY created_at ASC"
        ))
        .bind(wallet)
        .bind(from_symbol)
        .bind(to_symbol)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows_to_models(rows)
    }

    async fn find_by_signature(
        &self,
        wallet: &str,
        signature: &str,
    ) -> eyre::Result<Option<Transaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE wallet_address = $1 AND signature = $2 LIMIT 1"
        ))
        .bind(wallet)
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_model).transpose()
    }

    async fn concurrent_spends(
        &self,
        wallet: &str,
        from_symbol: &str,
        since: DateTime<Utc>,
        exclude_id: &str,
    ) -> eyre::Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE id != $1 AND wallet_address = $2 AND from_symbol = $3 \
             AND created_at >= $4"
        ))
        .bind(exclude_id)
        .bind(wallet)
        .bind(from_symbol)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows_to_models(rows)
    }

    async fn mark_blocked(
        &self,
        id: &str,
        status: TransactionStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) -> eyre::Result<()> {
        // Terminal statuses are excluded in the predicate so a block never
        // overwrites an earlier block or failure.
        sqlx::query(
            "UPDATE transactions SET status = $2, blocked_at = $3, blocked_reason = $4
             WHERE id = $1
             AND status NOT IN ('failed', 'security_check_failed', 'blocked_by_anomaly_detection')",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> eyre::Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows_to_models(rows)
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    wallet_addresses: Vec<String>,
    password_changed_at: Option<DateTime<Utc>>,
    two_factor_enabled: bool,
    two_factor_changed_at: Option<DateTime<Utc>>,
    withdrawal_address_changed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            id: row.id,
            wallet_addresses: row.wallet_addresses,
            password_changed_at: row.password_changed_at,
            two_factor_enabled: row.two_factor_enabled,
            two_factor_changed_at: row.two_factor_changed_at,
            withdrawal_address_changed_at: row.withdrawal_address_changed_at,
            updated_at: row.updated_at,
        }
    }
}

const USER_COLUMNS: &str = "id, wallet_addresses, password_changed_at, two_factor_enabled, \
     two_factor_changed_at, withdrawal_address_changed_at, updated_at";

#[async_trait]
impl UserStore for PostgresStore {
    async fn find(&self, user_id: &str) -> eyre::Result<Option<UserAccount>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(UserAccount::from))
    }

    async fn updated_since(&self, since: DateTime<Utc>) -> eyre::Result<Vec<UserAccount>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE updated_at >= $1"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserAccount::from).collect())
    }
}

#[async_trait]
impl PortfolioStore for PostgresStore {
    async fn balance(&self, user_id: &str, symbol: &str) -> eyre::Result<f64> {
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT balance FROM portfolio_balances WHERE user_id = $1 AND symbol = $2",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(b,)| b).unwrap_or(0.0))
    }
}
