use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::anomaly::AnomalyStats;
use crate::fraud::FraudStats;
use crate::gate::ShieldStats;
use crate::manipulation::ManipulationStats;
use crate::model::{Transaction, TransactionType};
use crate::monitor::types::{Alert, Issue};

// ============================================================
// Query params
// ============================================================

#[derive(Debug, Deserialize)]
pub struct AlertParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionParams {
    pub user_id: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============================================================
// Request bodies
// ============================================================

#[derive(Debug, Deserialize)]
pub struct SubmitTransactionRequest {
    pub user_id: String,
    pub wallet_address: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub from_symbol: String,
    pub to_symbol: String,
    pub from_amount: f64,
    pub to_amount: f64,
    pub price: f64,
    pub signature: Option<String>,
    pub nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginAttemptRequest {
    pub user_id: String,
    pub success: bool,
    pub ip: Option<IpAddr>,
}

// ============================================================
// Response types
// ============================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub alerts: usize,
    pub users_monitored: usize,
    pub blocked_ips: usize,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct EngineStatus<S> {
    pub name: &'static str,
    pub running: bool,
    pub stats: S,
}

#[derive(Debug, Serialize)]
pub struct EnginesResponse {
    pub anomaly: EngineStatus<AnomalyStats>,
    pub fraud: EngineStatus<FraudStats>,
    pub manipulation: EngineStatus<ManipulationStats>,
    pub gate: EngineStatus<ShieldStats>,
}

#[derive(Debug, Serialize)]
pub struct EngineActionResponse {
    pub name: String,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct BlockedIpEntry {
    pub ip: IpAddr,
    pub unblock_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BlockedIpsResponse {
    pub blocked: Vec<BlockedIpEntry>,
}

#[derive(Debug, Serialize)]
pub struct SubmitTransactionResponse {
    pub transaction: Transaction,
    pub risk_score: u32,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Serialize)]
pub struct RejectionResponse {
    pub error: String,
    pub risk_score: u32,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct LoginAttemptResponse {
    pub recorded: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}
