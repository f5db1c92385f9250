use chrono::{DateTime, Duration, Local, Timelike, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::config::AnomalyEngineConfig;
use crate::engine::EngineRunner;
use crate::model::{Transaction, TransactionStatus};
use crate::monitor::types::{Alert, AlertKind, Severity};
use crate::monitor::SecurityMonitor;
use crate::store::TransactionStore;

use super::rules::{self, Finding};

const PAIR_WINDOW_HOURS: i64 = 1;
const USER_HISTORY_LIMIT: i64 = 50;
const PAIR_RECENT_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
pub struct AnomalyStats {
    pub users_tracked: usize,
}

/// Periodic anomaly scan over newly created transactions. The only engine
/// allowed to move a transaction into a blocked status.
pub struct AnomalyEngine {
    runner: EngineRunner,
    monitor: Arc<SecurityMonitor>,
    transactions: Arc<dyn TransactionStore>,
    config: AnomalyEngineConfig,
    symbols_seen: Mutex<HashMap<String, HashSet<String>>>,
    last_scan: Mutex<DateTime<Utc>>,
}

impl AnomalyEngine {
    pub fn new(
        monitor: Arc<SecurityMonitor>,
        transactions: Arc<dyn TransactionStore>,
        config: AnomalyEngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runner: EngineRunner::new("anomaly"),
            monitor,
            transactions,
            config,
            symbols_seen: Mutex::new(HashMap::new()),
            last_scan: Mutex::new(Utc::now()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let engine = self.clone();
        self.runner
            .start(std::time::Duration::from_secs(self.config.tick_secs), move || {
                let engine = engine.clone();
                async move {
                    if let Err(err) = engine.scan().await {
                        tracing::warn!(engine = "anomaly", ?err, "scan pass failed");
                    }
                }
            });
    }

    pub fn stop(&self) {
        self.runner.stop();
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    pub fn stats(&self) -> AnomalyStats {
        AnomalyStats {
            users_tracked: self
                .symbols_seen
                .lock()
                .expect("symbols lock poisoned")
                .len(),
        }
    }

    async fn scan(&self) -> eyre::Result<()> {
        let now = Utc::now();
        let since = {
            let mut last = self.last_scan.lock().expect("last_scan lock poisoned");
            std::mem::replace(&mut *last, now)
        };

        let batch = self.transactions.created_since(since).await?;
        for tx in &batch {
            // One bad transaction must not starve the rest of the batch.
            if let Err(err) = self.analyze_and_apply(tx, now).await {
                tracing::warn!(
                    engine = "anomaly",
                    transaction = %tx.id,
                    ?err,
                    "analysis failed, skipping transaction"
                );
            }
        }
        Ok(())
    }

    async fn analyze_and_apply(&self, tx: &Transaction, now: DateTime<Utc>) -> eyre::Result<()> {
        let findings = self.analyze(tx, now).await?;
        self.apply_findings(tx, &findings, now).await
    }

    async fn analyze(&self, tx: &Transaction, now: DateTime<Utc>) -> eyre::Result<Vec<Finding>> {
        let mut findings = Vec::new();

        // Statistical analyzers over the user's recent history.
        let history = self
            .transactions
            .recent_for_user(&tx.user_id, USER_HISTORY_LIMIT)
            .await?;
        let prior: Vec<Transaction> =
            history.iter().filter(|t| t.id != tx.id).cloned().collect();
        findings.extend(rules::amount_z_score(tx, &prior, self.config.z_score_threshold));
        findings.extend(rules::rapid_interval(&history));

        // Behavioral analyzers.
        let distinct = {
            let mut seen = self.symbols_seen.lock().expect("symbols lock poisoned");
            let set = seen.entry(tx.user_id.clone()).or_default();
            set.insert(tx.from_symbol.clone());
            set.insert(tx.to_symbol.clone());
            set.len()
        };
        findings.extend(rules::symbol_diversity(
            &tx.user_id,
            distinct,
            self.config.symbol_diversity_limit,
        ));
        if self.night_scan_due(now) {
            findings.extend(rules::night_activity(&history));
        }

        // Network analyzers over the pair.
        let pair_window = self
            .transactions
            .for_wallet_pair_since(
                &tx.wallet_address,
                &tx.from_symbol,
                &tx.to_symbol,
                now - Duration::hours(PAIR_WINDOW_HOURS),
            )
            .await?;
        findings.extend(rules::amount_clustering(
            tx,
            &pair_window,
            self.config.exact_match_threshold,
            self.config.cluster_threshold,
        ));
        let recent_pair = self
            .transactions
            .recent_for_pair(&tx.from_symbol, &tx.to_symbol, PAIR_RECENT_LIMIT)
            .await?;
        findings.extend(rules::wallet_dominance(
            tx,
            &recent_pair,
            self.config.dominance_threshold,
        ));

        Ok(findings)
    }

    /// The night sweep only runs during night hours and only for a sampled
    /// fraction of transactions.
    fn night_scan_due(&self, now: DateTime<Utc>) -> bool {
        now.with_timezone(&Local).hour() < 6
            && rand::thread_rng().gen::<f64>() < self.config.night_sample_probability
    }

    async fn apply_findings(
        &self,
        tx: &Transaction,
        findings: &[Finding],
        now: DateTime<Utc>,
    ) -> eyre::Result<()> {
        for finding in findings {
            self.monitor.add_alert(
                Alert::new(AlertKind::AnomalyDetected, finding.severity, &finding.message)
                    .user(&tx.user_id)
                    .transaction(&tx.id)
                    .symbol_pair(tx.symbol_pair())
                    .wallet(&tx.wallet_address),
            );
            self.monitor.record_suspicious_activity(
                &tx.user_id,
                finding.rule,
                json!({
                    "transaction_id": tx.id,
                    "severity": finding.severity,
                    "message": finding.message,
                }),
            );
        }

        if let Some(critical) = findings.iter().find(|f| f.severity == Severity::Critical) {
            self.transactions
                .mark_blocked(
                    &tx.id,
                    TransactionStatus::BlockedByAnomalyDetection,
                    &critical.message,
                    now,
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionType;
    use crate::store::memory::{FlakyStore, MemoryStore};

    fn engine_with_store() -> (Arc<AnomalyEngine>, Arc<MemoryStore>, Arc<SecurityMonitor>) {
        let store = Arc::new(MemoryStore::new());
        let monitor = Arc::new(SecurityMonitor::new());
        let engine = AnomalyEngine::new(
            monitor.clone(),
            store.clone(),
            AnomalyEngineConfig::default(),
        );
        (engine, store, monitor)
    }

    fn tx_at(id: &str, amount: f64, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: id.to_string(),
            user_id: "u1".to_string(),
            wallet_address: "wallet-1".to_string(),
            tx_type: TransactionType::Swap,
            status: TransactionStatus::Pending,
            from_symbol: "GOLD".to_string(),
            to_symbol: "USD".to_string(),
            from_amount: amount,
            to_amount: amount,
            price: 1.0,
            gas_used: 0.0,
            gas_fee: 0.0,
            client_ip: None,
            user_agent: None,
            signature: None,
            nonce: None,
            security_flags: Vec::new(),
            blocked_at: None,
            blocked_reason: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_exact_repeat_raises_alert() {
        let (engine, store, monitor) = engine_with_store();
        let now = Utc::now();
        // Five identical amounts on one wallet and pair within the hour.
        for i in 0..5 {
            store
                .insert(&tx_at(&format!("t{i}"), 250.0, now - Duration::minutes(i)))
                .await
                .unwrap();
        }
        let cur = tx_at("cur", 250.0, now);
        store.insert(&cur).await.unwrap();

        let findings = engine.analyze(&cur, now).await.unwrap();
        engine.apply_findings(&cur, &findings, now).await.unwrap();

        assert!(findings.iter().any(|f| f.rule == "EXACT_AMOUNT_REPEAT"));
        assert!(monitor
            .get_alerts(100)
            .iter()
            .any(|a| a.kind == AlertKind::AnomalyDetected && a.severity == Severity::High));
        assert!(monitor.suspicious_count("u1", "EXACT_AMOUNT_REPEAT") > 0);
    }

    #[tokio::test]
    async fn test_thin_history_produces_no_statistical_findings() {
        let (engine, store, _monitor) = engine_with_store();
        let now = Utc::now();
        let cur = tx_at("cur", 1_000_000.0, now);
        store.insert(&cur).await.unwrap();

        let findings = engine.analyze(&cur, now).await.unwrap();
        assert!(findings.iter().all(|f| f.rule != "AMOUNT_Z_SCORE"));
    }

    #[tokio::test]
    async fn test_store_error_skips_transaction_not_tick() {
        let store = Arc::new(FlakyStore::failing_for("u-broken"));
        let monitor = Arc::new(SecurityMonitor::new());
        let engine = AnomalyEngine::new(
            monitor.clone(),
            store.clone(),
            AnomalyEngineConfig::default(),
        );

        let now = Utc::now();
        let mut bad = tx_at("bad", 100.0, now);
        bad.user_id = "u-broken".to_string();
        store.insert(&bad).await.unwrap();
        store
            .insert(&tx_at("good", 100.0, now + Duration::seconds(1)))
            .await
            .unwrap();

        engine.scan().await.unwrap();

        // The failing transaction was dropped; the rest of the batch still
        // reached the behavioral analyzers.
        assert_eq!(engine.stats().users_tracked, 1);
    }

    #[tokio::test]
    async fn test_critical_finding_blocks_transaction() {
        let (engine, store, _monitor) = engine_with_store();
        let now = Utc::now();
        let cur = tx_at("cur", 100.0, now);
        store.insert(&cur).await.unwrap();

        let findings = vec![Finding {
            rule: "EXACT_AMOUNT_REPEAT",
            severity: Severity::Critical,
            message: "bot signature".to_string(),
        }];
        engine.apply_findings(&cur, &findings, now).await.unwrap();

        let stored = store.transaction("cur").unwrap();
        assert_eq!(stored.status, TransactionStatus::BlockedByAnomalyDetection);
        assert_eq!(stored.blocked_reason.as_deref(), Some("bot signature"));
    }
}
