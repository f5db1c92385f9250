use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::ManipulationEngineConfig;
use crate::engine::EngineRunner;
use crate::model::Transaction;
use crate::monitor::types::Alert;
use crate::monitor::SecurityMonitor;
use crate::store::TransactionStore;

use super::rules::{self, PatternHit, PricePoint};

const PUMP_WINDOW_HOURS: i64 = 24;
const WASH_WINDOW_MINUTES: i64 = 5;
const SLIPPAGE_WINDOW_MINUTES: i64 = 1;

#[derive(Debug, Serialize)]
pub struct ManipulationStats {
    pub pairs_tracked: usize,
    pub price_points: usize,
}

/// Price manipulation engine. Keeps a bounded price window per symbol pair
/// and sweeps wider windows for cross-wallet patterns.
pub struct ManipulationEngine {
    runner: EngineRunner,
    monitor: Arc<SecurityMonitor>,
    transactions: Arc<dyn TransactionStore>,
    config: ManipulationEngineConfig,
    windows: Mutex<HashMap<String, Vec<PricePoint>>>,
    last_fed: Mutex<DateTime<Utc>>,
}

impl ManipulationEngine {
    pub fn new(
        monitor: Arc<SecurityMonitor>,
        transactions: Arc<dyn TransactionStore>,
        config: ManipulationEngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runner: EngineRunner::new("manipulation"),
            monitor,
            transactions,
            config,
            windows: Mutex::new(HashMap::new()),
            last_fed: Mutex::new(Utc::now()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let engine = self.clone();
        self.runner
            .start(std::time::Duration::from_secs(self.config.tick_secs), move || {
                let engine = engine.clone();
                async move {
                    if let Err(err) = engine.scan().await {
                        tracing::warn!(engine = "manipulation", ?err, "scan pass failed");
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

    pub fn stats(&self) -> ManipulationStats {
        let windows = self.windows.lock().expect("windows lock poisoned");
        ManipulationStats {
            pairs_tracked: windows.len(),
            price_points: windows.values().map(Vec::len).sum(),
        }
    }

    async fn scan(&self) -> eyre::Result<()> {
        self.scan_at(Utc::now()).await
    }

    async fn scan_at(&self, now: DateTime<Utc>) -> eyre::Result<()> {
        let since = {
            let mut last = self.last_fed.lock().expect("last_fed lock poisoned");
            std::mem::replace(&mut *last, now)
        };
        for tx in self.transactions.created_since(since).await? {
            self.observe(&tx);
        }

        let day = self
            .transactions
            .created_since(now - Duration::hours(PUMP_WINDOW_HOURS))
            .await?;
        self.emit(
            rules::pump_and_dump(&day, self.config.pump_range_pct, self.config.pump_wallet_ratio),
            None,
        );

        let five_min = self
            .transactions
            .created_since(now - Duration::minutes(WASH_WINDOW_MINUTES))
            .await?;
        self.emit(
            rules::wash_trades(&five_min, self.config.wash_trade_threshold),
            None,
        );

        let minute = self
            .transactions
            .created_since(now - Duration::minutes(SLIPPAGE_WINDOW_MINUTES))
            .await?;
        self.emit(rules::slippage_manipulation(&minute), None);
        Ok(())
    }

    /// Feed one transaction into its pair window and run the per-pair
    /// detectors on the updated window.
    pub fn observe(&self, tx: &Transaction) {
        let pair = tx.symbol_pair();
        let hits = {
            let mut windows = self.windows.lock().expect("windows lock poisoned");
            let window = windows.entry(pair.clone()).or_default();
            window.push(PricePoint {
                price: tx.price,
                volume: tx.from_amount,
                timestamp: tx.created_at,
                transaction_id: tx.id.clone(),
                wallet_address: tx.wallet_address.clone(),
            });
            while window.len() > self.config.window_size {
                window.remove(0);
            }

            let mut hits = Vec::new();
            hits.extend(rules::volatility_spike(
                window,
                &pair,
                self.config.volatility_pct,
                self.config.volatility_window_secs,
            ));
            hits.extend(rules::pattern_scan(
                window,
                &pair,
                self.config.monotonic_threshold,
                self.config.volume_spike_multiplier,
            ));
            hits
        };
        self.emit(hits, Some(&pair));
    }

    fn emit(&self, hits: Vec<PatternHit>, pair: Option<&str>) {
        for hit in hits {
            let mut alert = Alert::new(hit.kind, hit.severity, hit.message);
            if let Some(pair) = pair {
                alert = alert.symbol_pair(pair);
            }
            self.monitor.add_alert(alert);
        }
    }

    pub fn tracked_pairs(&self) -> usize {
        self.windows.lock().expect("windows lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TransactionStatus, TransactionType};
    use crate::monitor::types::AlertKind;
    use crate::store::memory::MemoryStore;

    fn engine_with_store() -> (Arc<ManipulationEngine>, Arc<MemoryStore>, Arc<SecurityMonitor>) {
        let store = Arc::new(MemoryStore::new());
        let monitor = Arc::new(SecurityMonitor::new());
        let engine = ManipulationEngine::new(
            monitor.clone(),
            store.clone(),
            ManipulationEngineConfig::default(),
        );
        (engine, store, monitor)
    }

    fn tx(wallet: &str, price: f64, amount: f64, at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            wallet_address: wallet.to_string(),
            tx_type: TransactionType::Swap,
            status: TransactionStatus::Pending,
            from_symbol: "GOLD".to_string(),
            to_symbol: "USD".to_string(),
            from_amount: amount,
            to_amount: amount * price,
            price,
            gas_used: 0.0,
            gas_fee: 0.0,
            client_ip: None,
            user_agent: None,
            signature: None,
            nonce: None,
            security_flags: Vec::new(),
            blocked_at: None,
            blocked_reason: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_monotonic_feed_raises_single_pump_alert() {
        let (engine, _store, monitor) = engine_with_store();
        let now = Utc::now();
        for i in 0..10 {
            engine.observe(&tx("w1", 100.0 + i as f64, 10.0, now + Duration::seconds(i)));
        }

        let pumps = monitor
            .get_alerts(100)
            .iter()
            .filter(|a| a.kind == AlertKind::CoordinatedPump)
            .count();
        // Only the tenth observation completes a full monotonic window.
        assert_eq!(pumps, 1);
        assert_eq!(engine.tracked_pairs(), 1);
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let (engine, _store, _monitor) = engine_with_store();
        let now = Utc::now();
        for i in 0..150 {
            engine.observe(&tx("w1", 100.0, 10.0, now + Duration::seconds(i)));
        }

        let windows = engine.windows.lock().unwrap();
        assert_eq!(windows.get("GOLD/USD").unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_scan_flags_wash_trading() {
        let (engine, store, monitor) = engine_with_store();
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert(&tx("w1", 100.0, 10.0, now - Duration::seconds(10 + i)))
                .await
                .unwrap();
        }

        engine.scan_at(now).await.unwrap();

        assert!(monitor
            .get_alerts(100)
            .iter()
            .any(|a| a.kind == AlertKind::WashTradingDetected));
    }
}
