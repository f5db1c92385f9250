use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::config::FraudEngineConfig;
use crate::engine::EngineRunner;
use crate::model::{Transaction, UserAccount};
use crate::monitor::types::{Alert, AlertKind, Severity};
use crate::monitor::SecurityMonitor;
use crate::store::{TransactionStore, UserStore};

use super::rules::{self, DeviceSighting, LoginAttempt};

const SCAN_WINDOW_MINUTES: i64 = 5;
const RAPID_WINDOW_SECONDS: i64 = 10;
const RECEIVER_WINDOW_MINUTES: i64 = 1;
const RECEIVER_CLUSTER_THRESHOLD: usize = 5;
const ACCOUNT_CHANGE_WINDOW_HOURS: i64 = 24;
const BULK_WINDOW_HOURS: i64 = 1;
const PASSWORD_CHANGE_TX_LIMIT: i64 = 5;
const TWO_FACTOR_TX_LIMIT: i64 = 3;
const WITHDRAWAL_CHANGE_TX_LIMIT: i64 = 2;

#[derive(Debug, Serialize)]
pub struct FraudStats {
    pub users_with_devices: usize,
    pub users_with_logins: usize,
}

/// Fraud detection engine. Tracks devices and logins in process-local maps
/// and correlates recent transactions against account-state changes.
pub struct FraudEngine {
    runner: EngineRunner,
    monitor: Arc<SecurityMonitor>,
    transactions: Arc<dyn TransactionStore>,
    users: Arc<dyn UserStore>,
    config: FraudEngineConfig,
    devices: Mutex<HashMap<String, Vec<DeviceSighting>>>,
    logins: Mutex<HashMap<String, Vec<LoginAttempt>>>,
}

impl FraudEngine {
    pub fn new(
        monitor: Arc<SecurityMonitor>,
        transactions: Arc<dyn TransactionStore>,
        users: Arc<dyn UserStore>,
        config: FraudEngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runner: EngineRunner::new("fraud"),
            monitor,
            transactions,
            users,
            config,
            devices: Mutex::new(HashMap::new()),
            logins: Mutex::new(HashMap::new()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let engine = self.clone();
        self.runner
            .start(std::time::Duration::from_secs(self.config.tick_secs), move || {
                let engine = engine.clone();
                async move {
                    if let Err(err) = engine.scan().await {
                        tracing::warn!(engine = "fraud", ?err, "scan pass failed");
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

    pub fn stats(&self) -> FraudStats {
        FraudStats {
            users_with_devices: self.devices.lock().expect("devices lock poisoned").len(),
            users_with_logins: self.logins.lock().expect("logins lock poisoned").len(),
        }
    }

    async fn scan(&self) -> eyre::Result<()> {
        self.scan_at(Utc::now()).await
    }

    async fn scan_at(&self, now: DateTime<Utc>) -> eyre::Result<()> {
        let since = now - Duration::minutes(SCAN_WINDOW_MINUTES);
        let batch = self.transactions.created_since(since).await?;
        for tx in &batch {
            // One bad transaction must not starve the rest of the batch.
            if let Err(err) = self.analyze_transaction(tx, now).await {
                tracing::warn!(
                    engine = "fraud",
                    transaction = %tx.id,
                    ?err,
                    "analysis failed, skipping transaction"
                );
            }
        }

        for user in self.users.updated_since(since).await? {
            if let Err(err) = self.check_account_changes(&user, now).await {
                tracing::warn!(
                    engine = "fraud",
                    user = %user.id,
                    ?err,
                    "account-change check failed, skipping user"
                );
            }
        }

        self.check_bulk_patterns(now).await?;
        Ok(())
    }

    async fn analyze_transaction(&self, tx: &Transaction, now: DateTime<Utc>) -> eyre::Result<()> {
        self.check_rapid_sequence(tx, now).await?;
        self.check_device(tx, now);
        self.check_wallet_authorization(tx).await?;
        self.check_receiver_clustering(tx, now).await
    }

    async fn check_rapid_sequence(&self, tx: &Transaction, now: DateTime<Utc>) -> eyre::Result<()> {
        let recent = self
            .transactions
            .count_for_user_since(&tx.user_id, now - Duration::seconds(RAPID_WINDOW_SECONDS))
            .await?;
        if recent > self.config.rapid_threshold {
            self.monitor.add_alert(
                Alert::new(
                    AlertKind::RapidTransactionSequence,
                    Severity::Medium,
                    format!("{recent} transactions in {RAPID_WINDOW_SECONDS}s from user {}", tx.user_id),
                )
                .user(&tx.user_id)
                .transaction(&tx.id),
            );
            self.monitor.record_suspicious_activity(
                &tx.user_id,
                "RAPID_TRANSACTIONS",
                json!({ "count": recent, "window_secs": RAPID_WINDOW_SECONDS }),
            );
        }
        Ok(())
    }

    /// Records the (ip, device) pair and flags a user showing several brand
    /// new pairs inside one hour.
    fn check_device(&self, tx: &Transaction, now: DateTime<Utc>) {
        let ip = tx
            .client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let device = tx.user_agent.clone().unwrap_or_else(|| "unknown".to_string());

        let anomalous = {
            let mut devices = self.devices.lock().expect("devices lock poisoned");
            let sightings = devices.entry(tx.user_id.clone()).or_default();
            let anomalous = rules::device_anomaly(sightings, &ip, &device, now);

            match sightings.iter_mut().find(|s| s.ip == ip && s.device == device) {
                Some(existing) => {
                    existing.timestamp = now;
                    existing.is_known = true;
                }
                None => {
                    sightings.push(DeviceSighting {
                        ip: ip.clone(),
                        device: device.clone(),
                        timestamp: now,
                        is_known: false,
                    });
                    if sightings.len() > self.config.device_history_cap {
                        sightings.remove(0);
                    }
                }
            }
            anomalous
        };

        if anomalous {
            self.monitor.add_alert(
                Alert::new(
                    AlertKind::MultipleNewDevices,
                    Severity::High,
                    format!("user {} seen from multiple new devices within an hour", tx.user_id),
                )
                .user(&tx.user_id)
                .transaction(&tx.id)
                .details(json!({ "ip": ip, "device": device })),
            );
        }
    }

    async fn check_wallet_authorization(&self, tx: &Transaction) -> eyre::Result<()> {
        if let Some(user) = self.users.find(&tx.user_id).await? {
            if !user.wallet_addresses.contains(&tx.wallet_address) {
                self.monitor.add_alert(
                    Alert::new(
                        AlertKind::UnauthorizedWalletUsage,
                        Severity::High,
                        format!(
                            "wallet {} is not registered to user {}",
                            tx.wallet_address, tx.user_id
                        ),
                    )
                    .user(&tx.user_id)
                    .transaction(&tx.id)
                    .wallet(&tx.wallet_address),
                );
            }
        }

        let lifetime = self.transactions.count_for_wallet(&tx.wallet_address).await?;
        if lifetime > self.config.high_activity_wallet_threshold {
            self.monitor.add_alert(
                Alert::new(
                    AlertKind::HighActivityWallet,
                    Severity::Low,
                    format!("wallet {} has {lifetime} lifetime transactions", tx.wallet_address),
                )
                .wallet(&tx.wallet_address),
            );
        }
        Ok(())
    }

    async fn check_receiver_clustering(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> eyre::Result<()> {
        let wallet_txs = self
            .transactions
            .for_wallet_since(
                &tx.wallet_address,
                now - Duration::minutes(RECEIVER_WINDOW_MINUTES),
            )
            .await?;
        for (symbol, count) in rules::receiver_clusters(&wallet_txs, RECEIVER_CLUSTER_THRESHOLD) {
            self.monitor.add_alert(
                Alert::new(
                    AlertKind::SuspiciousReceiverPattern,
                    Severity::High,
                    format!(
                        "wallet {} sent to {symbol} {count} times in {RECEIVER_WINDOW_MINUTES}m",
                        tx.wallet_address
                    ),
                )
                .user(&tx.user_id)
                .wallet(&tx.wallet_address),
            );
        }
        Ok(())
    }

    /// Correlates sensitive account changes with transaction activity since
    /// the change.
    async fn check_account_changes(
        &self,
        user: &UserAccount,
        now: DateTime<Utc>,
    ) -> eyre::Result<()> {
        let window_start = now - Duration::hours(ACCOUNT_CHANGE_WINDOW_HOURS);

        if let Some(changed_at) = user.password_changed_at {
            if changed_at > window_start {
                let since_change = self
                    .transactions
                    .count_for_user_since(&user.id, changed_at)
                    .await?;
                if since_change > PASSWORD_CHANGE_TX_LIMIT {
                    self.monitor.add_alert(
                        Alert::new(
                            AlertKind::PasswordChangeBeforeTransactions,
                            Severity::High,
                            format!(
                                "{since_change} transactions since password change for user {}",
                                user.id
                            ),
                        )
                        .user(&user.id),
                    );
                }
            }
        }

        if !user.two_factor_enabled {
            if let Some(changed_at) = user.two_factor_changed_at {
                if changed_at > window_start {
                    let recent = self
                        .transactions
                        .count_for_user_since(&user.id, window_start)
                        .await?;
                    if recent > TWO_FACTOR_TX_LIMIT {
                        self.monitor.add_alert(
                            Alert::new(
                                AlertKind::TwoFactorDisabledSuspicious,
                                Severity::Critical,
                                format!(
                                    "2FA disabled on user {} with {recent} transactions in 24h",
                                    user.id
                                ),
                            )
                            .user(&user.id),
                        );
                    }
                }
            }
        }

        if let Some(changed_at) = user.withdrawal_address_changed_at {
            if changed_at > window_start {
                let since_change = self
                    .transactions
                    .count_for_user_since(&user.id, changed_at)
                    .await?;
                if since_change > WITHDRAWAL_CHANGE_TX_LIMIT {
                    self.monitor.add_alert(
                        Alert::new(
                            AlertKind::WithdrawalAddressChanged,
                            Severity::High,
                            format!(
                                "{since_change} transactions since withdrawal address change for user {}",
                                user.id
                            ),
                        )
                        .user(&user.id),
                    );
                }
            }
        }
        Ok(())
    }

    async fn check_bulk_patterns(&self, now: DateTime<Utc>) -> eyre::Result<()> {
        let hour = self
            .transactions
            .created_since(now - Duration::hours(BULK_WINDOW_HOURS))
            .await?;
        for (bucket, count) in rules::bulk_patterns(&hour, self.config.bulk_pattern_threshold) {
            self.monitor.add_alert(
                Alert::new(
                    AlertKind::BotNetworkDetected,
                    Severity::Critical,
                    format!("{count} near-identical transactions in bucket {bucket} over the last hour"),
                )
                .details(json!({ "bucket": bucket, "count": count })),
            );
        }
        Ok(())
    }

    pub fn record_login_attempt(&self, user_id: &str, success: bool, ip: Option<IpAddr>) {
        self.record_login_attempt_at(user_id, success, ip, Utc::now());
    }

    /// Appends to the 15-minute rolling login window. Alerts exactly when the
    /// failed count reaches the limit, so a sustained attack re-alerts only
    /// after the window slides.
    pub fn record_login_attempt_at(
        &self,
        user_id: &str,
        success: bool,
        ip: Option<IpAddr>,
        now: DateTime<Utc>,
    ) {
        let cutoff = now - Duration::seconds(self.config.login_window_secs);
        let (failed, ips) = {
            let mut logins = self.logins.lock().expect("logins lock poisoned");
            let attempts = logins.entry(user_id.to_string()).or_default();
            attempts.retain(|a| a.timestamp > cutoff);
            attempts.push(LoginAttempt {
                timestamp: now,
                success,
                ip,
            });
            let failed = attempts.iter().filter(|a| !a.success).count();
            (failed, rules::distinct_failed_ips(attempts))
        };

        if success {
            let mut alert = Alert::new(
                AlertKind::LoginSuccessful,
                Severity::Low,
                format!("successful login for user {user_id}"),
            )
            .user(user_id);
            if let Some(ip) = ip {
                alert = alert.ip(ip);
            }
            self.monitor.add_alert(alert);
            return;
        }

        if failed == self.config.max_login_attempts {
            let mut alert = Alert::new(
                AlertKind::MultipleFailedLoginAttempts,
                Severity::High,
                format!("{failed} failed logins for user {user_id} within 15 minutes"),
            )
            .user(user_id)
            .details(json!({ "source_ips": ips }));
            if let Some(ip) = ip {
                alert = alert.ip(ip);
            }
            self.monitor.add_alert(alert);
            self.monitor.record_suspicious_activity(
                user_id,
                "FAILED_LOGINS",
                json!({ "failed": failed }),
            );
        }
    }
}
