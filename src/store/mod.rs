pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Transaction, TransactionStatus, UserAccount};

/// Query surface the detectors need over persisted transactions.
/// Results ordered oldest-first unless noted otherwise.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> eyre::Result<()>;

    /// All transactions created at or after `since`.
    async fn created_since(&self, since: DateTime<Utc>) -> eyre::Result<Vec<Transaction>>;

    /// Most recent transactions for a user, newest first.
    async fn recent_for_user(&self, user_id: &str, limit: i64) -> eyre::Result<Vec<Transaction>>;

    async fn count_for_user_since(&self, user_id: &str, since: DateTime<Utc>)
        -> eyre::Result<i64>;

    async fn count_for_wallet(&self, wallet: &str) -> eyre::Result<i64>;

    async fn count_for_wallet_since(&self, wallet: &str, since: DateTime<Utc>)
        -> eyre::Result<i64>;

    async fn for_wallet_since(
        &self,
        wallet: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>>;

    async fn for_pair_since(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>>;

    /// Most recent transactions on a symbol pair, newest first.
    async fn recent_for_pair(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        limit: i64,
    ) -> eyre::Result<Vec<Transaction>>;

    async fn for_wallet_pair_since(
        &self,
        wallet: &str,
        from_symbol: &str,
        to_symbol: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>>;

    /// Replay-attack lookup: an already-stored transaction carrying the same
    /// signature from the same wallet.
    async fn find_by_signature(
        &self,
        wallet: &str,
        signature: &str,
    ) -> eyre::Result<Option<Transaction>>;

    /// Double-spend lookup: other in-flight spends of `from_symbol` from the
    /// same wallet since `since`, excluding the transaction under validation.
    async fn concurrent_spends(
        &self,
        wallet: &str,
        from_symbol: &str,
        since: DateTime<Utc>,
        exclude_id: &str,
    ) -> eyre::Result<Vec<Transaction>>;

    /// Transition a transaction into a blocked status. Must not downgrade a
    /// status that is already terminal.
    async fn mark_blocked(
        &self,
        id: &str,
        status: TransactionStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) -> eyre::Result<()>;

    /// Operator listing, newest first.
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> eyre::Result<Vec<Transaction>>;
}

/// The user fields the fraud engine correlates against.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, user_id: &str) -> eyre::Result<Option<UserAccount>>;

    async fn updated_since(&self, since: DateTime<Utc>) -> eyre::Result<Vec<UserAccount>>;
}

/// Balance resolution for the double-spend check.
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    /// Current balance of `symbol` for a user. Zero if no portfolio exists.
    async fn balance(&self, user_id: &str, symbol: &str) -> eyre::Result<f64>;
}
