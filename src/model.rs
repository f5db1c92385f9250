use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::monitor::types::Severity;

/// Kind of exchange operation a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Buy,
    Sell,
    Swap,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Swap => "swap",
            Self::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            "swap" => Some(Self::Swap),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// Lifecycle status of a transaction. The blocked/failed variants are
/// terminal: no detector may revert them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    SecurityCheckFailed,
    BlockedByAnomalyDetection,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::SecurityCheckFailed => "security_check_failed",
            Self::BlockedByAnomalyDetection => "blocked_by_anomaly_detection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "failed" => Some(Self::Failed),
            "security_check_failed" => Some(Self::SecurityCheckFailed),
            "blocked_by_anomaly_detection" => Some(Self::BlockedByAnomalyDetection),
            _ => None,
        }
    }

    /// Terminal statuses cannot be overwritten by a later block.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::SecurityCheckFailed | Self::BlockedByAnomalyDetection
        )
    }
}

/// A validation issue attached to a transaction for later audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityFlag {
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A requested or completed exchange of one asset amount for another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub from_symbol: String,
    pub to_symbol: String,
    pub from_amount: f64,
    pub to_amount: f64,
    pub price: f64,
    pub gas_used: f64,
    pub gas_fee: f64,
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub signature: Option<String>,
    pub nonce: Option<String>,
    pub security_flags: Vec<SecurityFlag>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn symbol_pair(&self) -> String {
        format!("{}/{}", self.from_symbol, self.to_symbol)
    }
}

/// The user fields the fraud detectors correlate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub wallet_addresses: Vec<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub two_factor_enabled: bool,
    pub two_factor_changed_at: Option<DateTime<Utc>>,
    pub withdrawal_address_changed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
