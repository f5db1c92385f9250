use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::{Transaction, TransactionStatus, UserAccount};

use super::{PortfolioStore, TransactionStore, UserStore};

/// Process-local store backing the test suite and single-node demo setups.
/// Mirrors the query shapes of `PostgresStore` over plain vectors.
#[derive(Default)]
pub struct MemoryStore {
    transactions: RwLock<Vec<Transaction>>,
    users: RwLock<HashMap<String, UserAccount>>,
    balances: RwLock<HashMap<(String, String), f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(&self, user: UserAccount) {
        self.users
            .write()
            .expect("users lock poisoned")
            .insert(user.id.clone(), user);
    }

    pub fn set_balance(&self, user_id: &str, symbol: &str, balance: f64) {
        self.balances
            .write()
            .expect("balances lock poisoned")
            .insert((user_id.to_string(), symbol.to_string()), balance);
    }

    pub fn transaction(&self, id: &str) -> Option<Transaction> {
        self.transactions
            .read()
            .expect("transactions lock poisoned")
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    fn read_txs(&self) -> std::sync::RwLockReadGuard<'_, Vec<Transaction>> {
        self.transactions.read().expect("transactions lock poisoned")
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, tx: &Transaction) -> eyre::Result<()> {
        self.transactions
            .write()
            .expect("transactions lock poisoned")
            .push(tx.clone());
        Ok(())
    }

    async fn created_since(&self, since: DateTime<Utc>) -> eyre::Result<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .read_txs()
            .iter()
            .filter(|t| t.created_at >= since)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn recent_for_user(&self, user_id: &str, limit: i64) -> eyre::Result<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .read_txs()
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn count_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<i64> {
        Ok(self
            .read_txs()
            .iter()
            .filter(|t| t.user_id == user_id && t.created_at >= since)
            .count() as i64)
    }

    async fn count_for_wallet(&self, wallet: &str) -> eyre::Result<i64> {
        Ok(self
            .read_txs()
            .iter()
            .filter(|t| t.wallet_address == wallet)
            .count() as i64)
    }

    async fn count_for_wallet_since(
        &self,
        wallet: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<i64> {
        Ok(self
            .read_txs()
            .iter()
            .filter(|t| t.wallet_address == wallet && t.created_at >= since)
            .count() as i64)
    }

    async fn for_wallet_since(
        &self,
        wallet: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .read_txs()
            .iter()
            .filter(|t| t.wallet_address == wallet && t.created_at >= since)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn for_pair_since(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .read_txs()
            .iter()
            .filter(|t| {
                t.from_symbol == from_symbol
                    && t.to_symbol == to_symbol
                    && t.created_at >= since
            })
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn recent_for_pair(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        limit: i64,
    ) -> eyre::Result<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .read_txs()
            .iter()
            .filter(|t| t.from_symbol == from_symbol && t.to_symbol == to_symbol)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn for_wallet_pair_since(
        &self,
        wallet: &str,
        from_symbol: &str,
        to_symbol: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .read_txs()
            .iter()
            .filter(|t| {
                t.wallet_address == wallet
                    && t.from_symbol == from_symbol
                    && t.to_symbol == to_symbol
                    && t.created_at >= since
            })
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn find_by_signature(
        &self,
        wallet: &str,
        signature: &str,
    ) -> eyre::Result<Option<Transaction>> {
        Ok(self
            .read_txs()
            .iter()
            .find(|t| {
                t.wallet_address == wallet && t.signature.as_deref() == Some(signature)
            })
            .cloned())
    }

    async fn concurrent_spends(
        &self,
        wallet: &str,
        from_symbol: &str,
        since: DateTime<Utc>,
        exclude_id: &str,
    ) -> eyre::Result<Vec<Transaction>> {
        Ok(self
            .read_txs()
            .iter()
            .filter(|t| {
                t.id != exclude_id
                    && t.wallet_address == wallet
                    && t.from_symbol == from_symbol
                    && t.created_at >= since
            })
            .cloned()
            .collect())
    }

    async fn mark_blocked(
        &self,
        id: &str,
        status: TransactionStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) -> eyre::Result<()> {
        let mut txs = self.transactions.write().expect("transactions lock poisoned");
        if let Some(tx) = txs.iter_mut().find(|t| t.id == id) {
            if tx.status.is_terminal() {
                return Ok(());
            }
            tx.status = status;
            tx.blocked_at = Some(at);
            tx.blocked_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> eyre::Result<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .read_txs()
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find(&self, user_id: &str) -> eyre::Result<Option<UserAccount>> {
        Ok(self
            .users
            .read()
            .expect("users lock poisoned")
            .get(user_id)
            .cloned())
    }

    async fn updated_since(&self, since: DateTime<Utc>) -> eyre::Result<Vec<UserAccount>> {
        Ok(self
            .users
            .read()
            .expect("users lock poisoned")
            .values()
            .filter(|u| u.updated_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PortfolioStore for MemoryStore {
    async fn balance(&self, user_id: &str, symbol: &str) -> eyre::Result<f64> {
        Ok(self
            .balances
            .read()
            .expect("balances lock poisoned")
            .get(&(user_id.to_string(), symbol.to_string()))
            .copied()
            .unwrap_or(0.0))
    }
}

/// Delegating wrapper that fails user-scoped reads for one configured user.
/// Backs the engine tests that exercise per-transaction error recovery.
#[cfg(test)]
pub struct FlakyStore {
    pub inner: std::sync::Arc<MemoryStore>,
    fail_user: String,
}

#[cfg(test)]
impl FlakyStore {
    pub fn failing_for(user_id: &str) -> Self {
        Self {
            inner: std::sync::Arc::new(MemoryStore::new()),
            fail_user: user_id.to_string(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl TransactionStore for FlakyStore {
    async fn insert(&self, tx: &Transaction) -> eyre::Result<()> {
        self.inner.insert(tx).await
    }

    async fn created_since(&self, since: DateTime<Utc>) -> eyre::Result<Vec<Transaction>> {
        self.inner.created_since(since).await
    }

    async fn recent_for_user(&self, user_id: &str, limit: i64) -> eyre::Result<Vec<Transaction>> {
        if user_id == self.fail_user {
            eyre::bail!("synthetic read failure for {user_id}");
        }
        self.inner.recent_for_user(user_id, limit).await
    }

    async fn count_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<i64> {
        if user_id == self.fail_user {
            eyre::bail!("synthetic read failure for {user_id}");
        }
        self.inner.count_for_user_since(user_id, since).await
    }

    async fn count_for_wallet(&self, wallet: &str) -> eyre::Result<i64> {
        self.inner.count_for_wallet(wallet).await
    }

    async fn count_for_wallet_since(
        &self,
        wallet: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<i64> {
        self.inner.count_for_wallet_since(wallet, since).await
    }

    async fn for_wallet_since(
        &self,
        wallet: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        self.inner.for_wallet_since(wallet, since).await
    }

    async fn for_pair_since(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        self.inner.for_pair_since(from_symbol, to_symbol, since).await
    }

    async fn recent_for_pair(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        limit: i64,
    ) -> eyre::Result<Vec<Transaction>> {
        self.inner.recent_for_pair(from_symbol, to_symbol, limit).await
    }

    async fn for_wallet_pair_since(
        &self,
        wallet: &str,
        from_symbol: &str,
        to_symbol: &str,
        since: DateTime<Utc>,
    ) -> eyre::Result<Vec<Transaction>> {
        self.inner
            .for_wallet_pair_since(wallet, from_symbol, to_symbol, since)
            .await
    }

    async fn find_by_signature(
        &self,
        wallet: &str,
        signature: &str,
    ) -> eyre::Result<Option<Transaction>> {
        self.inner.find_by_signature(wallet, signature).await
    }

    async fn concurrent_spends(
        &self,
        wallet: &str,
        from_symbol: &str,
        since: DateTime<Utc>,
        exclude_id: &str,
    ) -> eyre::Result<Vec<Transaction>> {
        self.inner
            .concurrent_spends(wallet, from_symbol, since, exclude_id)
            .await
    }

    async fn mark_blocked(
        &self,
        id: &str,
        status: TransactionStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) -> eyre::Result<()> {
        self.inner.mark_blocked(id, status, reason, at).await
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> eyre::Result<Vec<Transaction>> {
        self.inner.list_for_user(user_id, limit, offset).await
    }
}
