use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::net::IpAddr;
use uuid::Uuid;

use crate::model::SecurityFlag;

/// Severity of a finding. Weights feed the admission risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn risk_weight(&self) -> u32 {
        match self {
            Self::Low => 10,
            Self::Medium => 25,
            Self::High => 50,
            Self::Critical => 100,
        }
    }
}

/// Closed set of detector finding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    // Anomaly engine
    AnomalyDetected,
    // Fraud engine
    RapidTransactionSequence,
    MultipleNewDevices,
    UnauthorizedWalletUsage,
    HighActivityWallet,
    SuspiciousReceiverPattern,
    PasswordChangeBeforeTransactions,
    TwoFactorDisabledSuspicious,
    WithdrawalAddressChanged,
    BotNetworkDetected,
    MultipleFailedLoginAttempts,
    LoginSuccessful,
    // Price manipulation engine
    PriceVolatilitySpike,
    PumpPreparationVPattern,
    CoordinatedPump,
    CoordinatedDump,
    VolumeSpike,
    PumpAndDumpPattern,
    WashTradingDetected,
    SlippageManipulation,
    // DDoS & attack prevention
    BlockedIpAttemptedAccess,
    PossibleDdosAttack,
    EndpointFlood,
    ScannerDetected,
    InjectionAttackDetected,
    IpBlocked,
    IpUnblocked,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnomalyDetected => "ANOMALY_DETECTED",
            Self::RapidTransactionSequence => "RAPID_TRANSACTION_SEQUENCE",
            Self::MultipleNewDevices => "MULTIPLE_NEW_DEVICES",
            Self::UnauthorizedWalletUsage => "UNAUTHORIZED_WALLET_USAGE",
            Self::HighActivityWallet => "HIGH_ACTIVITY_WALLET",
            Self::SuspiciousReceiverPattern => "SUSPICIOUS_RECEIVER_PATTERN",
            Self::PasswordChangeBeforeTransactions => "PASSWORD_CHANGE_BEFORE_TRANSACTIONS",
            Self::TwoFactorDisabledSuspicious => "TWO_FACTOR_DISABLED_SUSPICIOUS",
            Self::WithdrawalAddressChanged => "WITHDRAWAL_ADDRESS_CHANGED",
            Self::BotNetworkDetected => "BOT_NETWORK_DETECTED",
            Self::MultipleFailedLoginAttempts => "MULTIPLE_FAILED_LOGIN_ATTEMPTS",
            Self::LoginSuccessful => "LOGIN_SUCCESSFUL",
            Self::PriceVolatilitySpike => "PRICE_VOLATILITY_SPIKE",
            Self::PumpPreparationVPattern => "PUMP_PREPARATION_V_PATTERN",
            Self::CoordinatedPump => "COORDINATED_PUMP",
            Self::CoordinatedDump => "COORDINATED_DUMP",
            Self::VolumeSpike => "VOLUME_SPIKE",
            Self::PumpAndDumpPattern => "PUMP_AND_DUMP_PATTERN",
            Self::WashTradingDetected => "WASH_TRADING_DETECTED",
            Self::SlippageManipulation => "SLIPPAGE_MANIPULATION",
            Self::BlockedIpAttemptedAccess => "BLOCKED_IP_ATTEMPTED_ACCESS",
            Self::PossibleDdosAttack => "POSSIBLE_DDOS_ATTACK",
            Self::EndpointFlood => "ENDPOINT_FLOOD",
            Self::ScannerDetected => "SCANNER_DETECTED",
            Self::InjectionAttackDetected => "INJECTION_ATTACK_DETECTED",
            Self::IpBlocked => "IP_BLOCKED",
            Self::IpUnblocked => "IP_UNBLOCKED",
        }
    }
}

/// Optional references tying an alert back to the entities it concerns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_pair: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

/// An immutable record of a detector finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub context: AlertContext,
    #[serde(default)]
    pub details: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            severity,
            message: message.into(),
            context: AlertContext::default(),
            details: JsonValue::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.context.user_id = Some(user_id.into());
        self
    }

    pub fn transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.context.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.context.ip = Some(ip);
        self
    }

    pub fn symbol_pair(mut self, pair: impl Into<String>) -> Self {
        self.context.symbol_pair = Some(pair.into());
        self
    }

    pub fn wallet(mut self, wallet: impl Into<String>) -> Self {
        self.context.wallet_address = Some(wallet.into());
        self
    }

    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }
}

/// Kinds of issues the synchronous admission gate can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    AmountAnomaly,
    FrequencyAnomaly,
    BlacklistedAddress,
    RapidAddressUsage,
    PriceManipulation,
    ReplayAttack,
    FrontRunning,
    DoubleSpend,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmountAnomaly => "AMOUNT_ANOMALY",
            Self::FrequencyAnomaly => "FREQUENCY_ANOMALY",
            Self::BlacklistedAddress => "BLACKLISTED_ADDRESS",
            Self::RapidAddressUsage => "RAPID_ADDRESS_USAGE",
            Self::PriceManipulation => "PRICE_MANIPULATION",
            Self::ReplayAttack => "REPLAY_ATTACK",
            Self::FrontRunning => "FRONT_RUNNING",
            Self::DoubleSpend => "DOUBLE_SPEND",
        }
    }
}

/// A single failed admission check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }

    pub fn into_flag(self, timestamp: DateTime<Utc>) -> SecurityFlag {
        SecurityFlag {
            kind: self.kind.as_str().to_string(),
            severity: self.severity,
            message: self.message,
            timestamp,
        }
    }
}

/// Outcome of the synchronous transaction validation gate.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<Issue>,
    pub risk_score: u32,
    pub timestamp: DateTime<Utc>,
}

/// Sum of severity weights across all issues, capped at 100.
pub fn risk_score(issues: &[Issue]) -> u32 {
    issues
        .iter()
        .map(|i| i.severity.risk_weight())
        .sum::<u32>()
        .min(100)
}
