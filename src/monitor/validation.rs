use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::ValidationConfig;
use crate::model::Transaction;
use crate::store::{PortfolioStore, TransactionStore};

use super::types::{risk_score, Issue, IssueKind, Severity, ValidationReport};

const AMOUNT_HISTORY_LIMIT: i64 = 100;
const AMOUNT_HISTORY_MIN: usize = 5;
const FREQUENCY_WINDOW_MINUTES: i64 = 30;
const RAPID_WALLET_WINDOW_MINUTES: i64 = 5;
const PRICE_WINDOW_HOURS: i64 = 1;
const FRONT_RUN_WINDOW_SECONDS: i64 = 60;
const FRONT_RUN_LARGER_COUNT: usize = 3;
const DOUBLE_SPEND_WINDOW_SECONDS: i64 = 5;

/// Synchronous admission gate. Every check reads history from the store and
/// yields zero or more issues; a store error fails open so a database blip
/// cannot freeze the exchange.
pub struct TransactionValidator {
    transactions: Arc<dyn TransactionStore>,
    portfolios: Arc<dyn PortfolioStore>,
    config: ValidationConfig,
}

impl TransactionValidator {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        portfolios: Arc<dyn PortfolioStore>,
        config: ValidationConfig,
    ) -> Self {
        Self {
            transactions,
            portfolios,
            config,
        }
    }

    pub async fn validate(&self, tx: &Transaction) -> ValidationReport {
        self.validate_at(tx, Utc::now()).await
    }

    pub async fn validate_at(&self, tx: &Transaction, now: DateTime<Utc>) -> ValidationReport {
        let (amount, frequency, address, price, replay, front_run, double_spend) = tokio::join!(
            self.check_amount_anomaly(tx),
            self.check_frequency_anomaly(tx, now),
            self.check_address_patterns(tx, now),
            self.check_price_deviation(tx, now),
            self.check_replay(tx),
            self.check_front_running(tx, now),
            self.check_double_spend(tx, now),
        );

        let mut issues = Vec::new();
        for (name, result) in [
            ("amount_anomaly", amount),
            ("frequency_anomaly", frequency),
            ("address_patterns", address),
            ("price_deviation", price),
            ("replay", replay),
            ("front_running", front_run),
            ("double_spend", double_spend),
        ] {
            match result {
                Ok(found) => issues.extend(found),
                Err(err) => {
                    tracing::warn!(check = name, tx_id = %tx.id, ?err, "validation check failed, passing");
                }
            }
        }

        let score = risk_score(&issues);
        ValidationReport {
            is_valid: issues.is_empty(),
            risk_score: score,
            issues,
            timestamp: now,
        }
    }

    /// Amount more than `amount_sigma` standard deviations above the user's
    /// recent mean. Users with a thin history always pass.
    async fn check_amount_anomaly(&self, tx: &Transaction) -> eyre::Result<Vec<Issue>> {
        let history = self
            .transactions
            .recent_for_user(&tx.user_id, AMOUNT_HISTORY_LIMIT)
            .await?;
        if history.len() < AMOUNT_HISTORY_MIN {
            return Ok(Vec::new());
        }

        let amounts: Vec<f64> = history.iter().map(|t| t.from_amount).collect();
        let mean = amounts.iter().sum::<f64>() / amounts.len() as f64;
        let variance =
            amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / amounts.len() as f64;
        let std_dev = variance.sqrt();

        if tx.from_amount > mean + self.config.amount_sigma * std_dev {
            return Ok(vec![Issue {
                kind: IssueKind::AmountAnomaly,
                severity: Severity::High,
                message: format!(
                    "amount {:.2} exceeds user mean {:.2} by more than {} sigma",
                    tx.from_amount, mean, self.config.amount_sigma
                ),
            }]);
        }
        Ok(Vec::new())
    }

    /// Burst of activity well above the user's own hourly baseline.
    async fn check_frequency_anomaly(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> eyre::Result<Vec<Issue>> {
        let recent = self
            .transactions
            .count_for_user_since(&tx.user_id, now - Duration::minutes(FREQUENCY_WINDOW_MINUTES))
            .await?;
        let daily = self
            .transactions
            .count_for_user_since(&tx.user_id, now - Duration::hours(24))
            .await?;
        if daily == 0 {
            return Ok(Vec::new());
        }

        let hourly_avg = daily as f64 / 24.0;
        if recent as f64 > hourly_avg * self.config.frequency_multiplier {
            return Ok(vec![Issue {
                kind: IssueKind::FrequencyAnomaly,
                severity: Severity::Medium,
                message: format!(
                    "{recent} transactions in {FREQUENCY_WINDOW_MINUTES}m against hourly average {hourly_avg:.1}"
                ),
            }]);
        }
        Ok(Vec::new())
    }

    async fn check_address_patterns(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> eyre::Result<Vec<Issue>> {
        let mut issues = Vec::new();

        if self
            .config
            .blacklisted_addresses
            .iter()
            .any(|a| a == &tx.wallet_address)
        {
            issues.push(Issue {
                kind: IssueKind::BlacklistedAddress,
                severity: Severity::Critical,
                message: format!("wallet {} is blacklisted", tx.wallet_address),
            });
        }

        let recent = self
            .transactions
            .count_for_wallet_since(
                &tx.wallet_address,
                now - Duration::minutes(RAPID_WALLET_WINDOW_MINUTES),
            )
            .await?;
        if recent > self.config.rapid_wallet_threshold {
            issues.push(Issue {
                kind: IssueKind::RapidAddressUsage,
                severity: Severity::High,
                message: format!(
                    "wallet {} used {recent} times in {RAPID_WALLET_WINDOW_MINUTES}m",
                    tx.wallet_address
                ),
            });
        }
        Ok(issues)
    }

    /// Execution price far off the recent pair average. Needs at least two
    /// prior trades so a lone quote cannot anchor the market.
    async fn check_price_deviation(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> eyre::Result<Vec<Issue>> {
        let trades = self
            .transactions
            .for_pair_since(
                &tx.from_symbol,
                &tx.to_symbol,
                now - Duration::hours(PRICE_WINDOW_HOURS),
            )
            .await?;
        if trades.len() < 2 {
            return Ok(Vec::new());
        }

        let mean = trades.iter().map(|t| t.price).sum::<f64>() / trades.len() as f64;
        if mean <= 0.0 {
            return Ok(Vec::new());
        }
        let deviation_pct = ((tx.price - mean) / mean).abs() * 100.0;
        if deviation_pct > self.config.price_deviation_pct {
            return Ok(vec![Issue {
                kind: IssueKind::PriceManipulation,
                severity: Severity::High,
                message: format!(
                    "price {:.4} deviates {deviation_pct:.1}% from {} average {mean:.4}",
                    tx.price,
                    tx.symbol_pair()
                ),
            }]);
        }
        Ok(Vec::new())
    }

    /// A signature may be spent once per wallet.
    async fn check_replay(&self, tx: &Transaction) -> eyre::Result<Vec<Issue>> {
        let Some(signature) = tx.signature.as_deref() else {
            return Ok(Vec::new());
        };
        if self
            .transactions
            .find_by_signature(&tx.wallet_address, signature)
            .await?
            .is_some()
        {
            return Ok(vec![Issue {
                kind: IssueKind::ReplayAttack,
                severity: Severity::Critical,
                message: "transaction signature was already used by this wallet".to_string(),
            }]);
        }
        Ok(Vec::new())
    }

    /// Several much larger orders landing on the same pair right before this
    /// one suggests the order flow leaked.
    async fn check_front_running(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> eyre::Result<Vec<Issue>> {
        let recent = self
            .transactions
            .for_pair_since(
                &tx.from_symbol,
                &tx.to_symbol,
                now - Duration::seconds(FRONT_RUN_WINDOW_SECONDS),
            )
            .await?;
        let larger = recent
            .iter()
            .filter(|t| t.from_amount > tx.from_amount * 2.0)
            .count();
        if larger > FRONT_RUN_LARGER_COUNT {
            return Ok(vec![Issue {
                kind: IssueKind::FrontRunning,
                severity: Severity::High,
                message: format!(
                    "{larger} orders over twice this size hit {} in the last {FRONT_RUN_WINDOW_SECONDS}s",
                    tx.symbol_pair()
                ),
            }]);
        }
        Ok(Vec::new())
    }

    /// Concurrent spends from the same wallet that together exceed the
    /// portfolio balance for the source asset.
    async fn check_double_spend(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> eyre::Result<Vec<Issue>> {
        let concurrent = self
            .transactions
            .concurrent_spends(
                &tx.wallet_address,
                &tx.from_symbol,
                now - Duration::seconds(DOUBLE_SPEND_WINDOW_SECONDS),
                &tx.id,
            )
            .await?;
        if concurrent.is_empty() {
            return Ok(Vec::new());
        }

        let balance = self.portfolios.balance(&tx.user_id, &tx.from_symbol).await?;
        let committed: f64 = concurrent.iter().map(|t| t.from_amount).sum();
        if committed + tx.from_amount > balance {
            return Ok(vec![Issue {
                kind: IssueKind::DoubleSpend,
                severity: Severity::Critical,
                message: format!(
                    "concurrent spends of {:.2} {} exceed balance {balance:.2}",
                    committed + tx.from_amount,
                    tx.from_symbol
                ),
            }]);
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TransactionStatus, TransactionType};
    use crate::store::memory::MemoryStore;

    fn validator(store: Arc<MemoryStore>) -> TransactionValidator {
        TransactionValidator::new(store.clone(), store, ValidationConfig::default())
    }

    fn sample_tx(id: &str, amount: f64, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: id.to_string(),
            user_id: "u1".to_string(),
            wallet_address: "wallet-1".to_string(),
            tx_type: TransactionType::Swap,
            status: TransactionStatus::Pending,
            from_symbol: "GOLD".to_string(),
            to_symbol: "USD".to_string(),
            from_amount: amount,
            to_amount: amount * 2.0,
            price: 2.0,
            gas_used: 0.0,
            gas_fee: 0.0,
            client_ip: None,
            user_agent: None,
            signature: Some(format!("sig-{id}")),
            nonce: None,
            security_flags: Vec::new(),
            blocked_at: None,
            blocked_reason: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_clean_transaction_passes() {
        let store = Arc::new(MemoryStore::new());
        store.set_balance("u1", "GOLD", 1_000_000.0);
        let validator = validator(store);

        let report = validator.validate(&sample_tx("a", 100.0, Utc::now())).await;
        assert!(report.is_valid);
        assert_eq!(report.risk_score, 0);
    }

    #[tokio::test]
    async fn test_replayed_signature_is_critical() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .insert(&sample_tx("old", 100.0, now - Duration::hours(2)))
            .await
            .unwrap();
        let validator = validator(store);

        let mut replay = sample_tx("new", 100.0, now);
        replay.signature = Some("sig-old".to_string());
        let report = validator.validate_at(&replay, now).await;

        assert!(!report.is_valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::ReplayAttack));
        assert!(report.risk_score >= Severity::Critical.risk_weight());
    }

    #[tokio::test]
    async fn test_amount_anomaly_needs_history() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        // Only three prior transactions: below the history minimum.
        for i in 0..3 {
            store
                .insert(&sample_tx(&format!("h{i}"), 10.0, now - Duration::hours(3)))
                .await
                .unwrap();
        }
        let validator = validator(store);

        let report = validator.validate_at(&sample_tx("big", 1_000_000.0, now), now).await;
        assert!(!report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::AmountAnomaly));
    }

    #[tokio::test]
    async fn test_amount_anomaly_flags_outlier() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for i in 0..10 {
            store
                .insert(&sample_tx(
                    &format!("h{i}"),
                    100.0 + i as f64,
                    now - Duration::hours(3),
                ))
                .await
                .unwrap();
        }
        let validator = validator(store);

        let report = validator
            .validate_at(&sample_tx("big", 1_000_000.0, now), now)
            .await;
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::AmountAnomaly));
    }

    #[tokio::test]
    async fn test_blacklisted_wallet_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut config = ValidationConfig::default();
        config.blacklisted_addresses = vec!["wallet-1".to_string()];
        let validator = TransactionValidator::new(store.clone(), store, config);

        let report = validator.validate(&sample_tx("a", 100.0, Utc::now())).await;
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::BlacklistedAddress));
        assert!(report.risk_score > 80);
    }

    #[tokio::test]
    async fn test_double_spend_over_balance() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.set_balance("u1", "GOLD", 150.0);
        let mut concurrent = sample_tx("other", 100.0, now - Duration::seconds(2));
        concurrent.signature = Some("sig-unique".to_string());
        store.insert(&concurrent).await.unwrap();
        let validator = validator(store);

        let report = validator.validate_at(&sample_tx("cur", 100.0, now), now).await;
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::DoubleSpend));
    }
}
