use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{GasConfig, ValidationConfig};
use crate::model::{Transaction, TransactionStatus, TransactionType};
use crate::monitor::types::ValidationReport;
use crate::monitor::{SecurityMonitor, TransactionValidator};
use crate::store::TransactionStore;

/// Caller-supplied fields of a transaction request. The pipeline assigns
/// identity, gas and status.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub user_id: String,
    pub wallet_address: String,
    pub tx_type: TransactionType,
    pub from_symbol: String,
    pub to_symbol: String,
    pub from_amount: f64,
    pub to_amount: f64,
    pub price: f64,
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub signature: Option<String>,
    pub nonce: Option<String>,
}

#[derive(Debug)]
pub enum AdmissionOutcome {
    /// Persisted, possibly carrying security flags for later audit.
    Accepted {
        transaction: Transaction,
        report: ValidationReport,
    },
    /// Risk score over the hard limit. Never persisted.
    Rejected { report: ValidationReport },
}

/// Transaction admission path: build, validate, then either reject outright
/// or persist with any issues attached as security flags.
pub struct AdmissionPipeline {
    validator: TransactionValidator,
    monitor: Arc<SecurityMonitor>,
    transactions: Arc<dyn TransactionStore>,
    gas: GasConfig,
    validation: ValidationConfig,
}

impl AdmissionPipeline {
    pub fn new(
        validator: TransactionValidator,
        monitor: Arc<SecurityMonitor>,
        transactions: Arc<dyn TransactionStore>,
        gas: GasConfig,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            validator,
            monitor,
            transactions,
            gas,
            validation,
        }
    }

    pub async fn submit(&self, draft: TransactionDraft) -> eyre::Result<AdmissionOutcome> {
        self.submit_at(draft, Utc::now()).await
    }

    pub async fn submit_at(
        &self,
        draft: TransactionDraft,
        now: DateTime<Utc>,
    ) -> eyre::Result<AdmissionOutcome> {
        let gas_used = self.gas.default_gas * self.gas.gas_adjustment;
        let mut tx = Transaction {
            id: Uuid::new_v4().to_string(),
            user_id: draft.user_id,
            wallet_address: draft.wallet_address,
            tx_type: draft.tx_type,
            status: TransactionStatus::Pending,
            from_symbol: draft.from_symbol,
            to_symbol: draft.to_symbol,
            from_amount: draft.from_amount,
            to_amount: draft.to_amount,
            price: draft.price,
            gas_used,
            gas_fee: gas_used * self.gas.gas_price,
            client_ip: draft.client_ip,
            user_agent: draft.user_agent,
            signature: draft.signature,
            nonce: draft.nonce,
            security_flags: Vec::new(),
            blocked_at: None,
            blocked_reason: None,
            created_at: now,
        };

        let report = self.validator.validate_at(&tx, now).await;

        if report.risk_score > self.validation.hard_reject_score {
            tracing::warn!(
                user_id = %tx.user_id,
                risk_score = report.risk_score,
                issues = report.issues.len(),
                "transaction rejected by admission gate"
            );
            self.monitor
                .update_behavior_profile(&tx.user_id, tx.from_amount, true);
            return Ok(AdmissionOutcome::Rejected { report });
        }

        if !report.is_valid {
            tx.security_flags = report
                .issues
                .iter()
                .cloned()
                .map(|i| i.into_flag(now))
                .collect();
        }
        self.transactions.insert(&tx).await?;
        self.monitor.update_behavior_profile(
            &tx.user_id,
            tx.from_amount,
            report.risk_score > self.validation.suspicious_score,
        );

        tracing::debug!(tx_id = %tx.id, risk_score = report.risk_score, "transaction admitted");
        Ok(AdmissionOutcome::Accepted {
            transaction: tx,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::Severity;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn pipeline_with(
        store: Arc<MemoryStore>,
        validation: ValidationConfig,
    ) -> (AdmissionPipeline, Arc<SecurityMonitor>) {
        let monitor = Arc::new(SecurityMonitor::new());
        let validator =
            TransactionValidator::new(store.clone(), store.clone(), validation.clone());
        let pipeline = AdmissionPipeline::new(
            validator,
            monitor.clone(),
            store,
            GasConfig::default(),
            validation,
        );
        (pipeline, monitor)
    }

    fn draft(wallet: &str, amount: f64) -> TransactionDraft {
        TransactionDraft {
            user_id: "u1".to_string(),
            wallet_address: wallet.to_string(),
            tx_type: TransactionType::Swap,
            from_symbol: "GOLD".to_string(),
            to_symbol: "USD".to_string(),
            from_amount: amount,
            to_amount: amount * 2.0,
            price: 2.0,
            client_ip: None,
            user_agent: None,
            signature: Some(Uuid::new_v4().to_string()),
            nonce: None,
        }
    }

    #[tokio::test]
    async fn test_clean_submission_is_persisted_with_gas() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _monitor) = pipeline_with(store.clone(), ValidationConfig::default());

        let outcome = pipeline.submit(draft("wallet-1", 100.0)).await.unwrap();
        let AdmissionOutcome::Accepted { transaction, report } = outcome else {
            panic!("expected acceptance");
        };

        assert!(report.is_valid);
        assert_eq!(transaction.gas_used, 200_000.0 * 1.3);
        assert_eq!(transaction.gas_fee, transaction.gas_used * 0.025);
        assert!(store.transaction(&transaction.id).is_some());
    }

    #[tokio::test]
    async fn test_hard_reject_is_not_persisted() {
        let store = Arc::new(MemoryStore::new());
        let mut validation = ValidationConfig::default();
        validation.blacklisted_addresses = vec!["wallet-bad".to_string()];
        let (pipeline, monitor) = pipeline_with(store.clone(), validation);

        let outcome = pipeline.submit(draft("wallet-bad", 100.0)).await.unwrap();
        let AdmissionOutcome::Rejected { report } = outcome else {
            panic!("expected rejection");
        };

        assert!(report.risk_score > 80);
        let all = store
            .created_since(Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert!(all.is_empty());
        // The rejection still counts against the behavior profile.
        let profile = monitor.behavior_profile("u1").unwrap();
        assert_eq!(profile.suspicious_count, 1);
    }

    #[tokio::test]
    async fn test_flagged_submission_accepted_with_security_flags() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        // Eleven recent transactions on the wallet trip the rapid-usage check
        // (HIGH, weight 50): flagged yet under the hard-reject limit.
        for i in 0..11 {
            let d = draft("wallet-hot", 100.0);
            let mut tx = Transaction {
                id: format!("h{i}"),
                user_id: d.user_id,
                wallet_address: d.wallet_address,
                tx_type: d.tx_type,
                status: TransactionStatus::Pending,
                from_symbol: d.from_symbol,
                to_symbol: d.to_symbol,
                from_amount: d.from_amount,
                to_amount: d.to_amount,
                price: d.price,
                gas_used: 0.0,
                gas_fee: 0.0,
                client_ip: None,
                user_agent: None,
                signature: Some(format!("sig-{i}")),
                nonce: None,
                security_flags: Vec::new(),
                blocked_at: None,
                blocked_reason: None,
                created_at: now - Duration::seconds(60 + i),
            };
            tx.price = 2.0;
            store.insert(&tx).await.unwrap();
        }
        let (pipeline, monitor) = pipeline_with(store.clone(), ValidationConfig::default());

        let outcome = pipeline
            .submit_at(draft("wallet-hot", 100.0), now)
            .await
            .unwrap();
        let AdmissionOutcome::Accepted { transaction, report } = outcome else {
            panic!("expected acceptance");
        };

        assert!(!report.is_valid);
        assert!(report.risk_score <= 80);
        assert!(!transaction.security_flags.is_empty());
        assert!(transaction
            .security_flags
            .iter()
            .any(|f| f.severity == Severity::High));
        let stored = store.transaction(&transaction.id).unwrap();
        assert!(!stored.security_flags.is_empty());
        assert!(monitor.behavior_profile("u1").unwrap().suspicious_count >= 1);
    }
}
