use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::model::Transaction;

const NEW_DEVICE_WINDOW_HOURS: i64 = 1;
const NEW_DEVICE_OTHERS: usize = 2;
const AMOUNT_BUCKET: f64 = 10.0;

/// One observed (ip, device) pair for a user.
#[derive(Debug, Clone)]
pub struct DeviceSighting {
    pub ip: String,
    pub device: String,
    pub timestamp: DateTime<Utc>,
    pub is_known: bool,
}

#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub ip: Option<IpAddr>,
}

/// An unseen (ip, device) pair is suspicious only when at least two other
/// unseen pairs showed up for the same user within the trailing hour.
pub fn device_anomaly(
    sightings: &[DeviceSighting],
    current_ip: &str,
    current_device: &str,
    now: DateTime<Utc>,
) -> bool {
    let current_known = sightings
        .iter()
        .any(|s| s.is_known && s.ip == current_ip && s.device == current_device);
    if current_known {
        return false;
    }

    let cutoff = now - Duration::hours(NEW_DEVICE_WINDOW_HOURS);
    let other_unseen = sightings
        .iter()
        .filter(|s| {
            !s.is_known
                && s.timestamp > cutoff
                && !(s.ip == current_ip && s.device == current_device)
        })
        .count();
    other_unseen >= NEW_DEVICE_OTHERS
}

/// Destination symbols a wallet hammered at least `threshold` times.
pub fn receiver_clusters(wallet_txs: &[Transaction], threshold: usize) -> Vec<(String, usize)> {
    let mut by_receiver: HashMap<&str, usize> = HashMap::new();
    for tx in wallet_txs {
        *by_receiver.entry(tx.to_symbol.as_str()).or_default() += 1;
    }
    by_receiver
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(symbol, count)| (symbol.to_string(), count))
        .collect()
}

/// Buckets transactions by (from, to, amount rounded to the nearest 10) and
/// returns buckets large enough to look scripted.
pub fn bulk_patterns(txs: &[Transaction], threshold: usize) -> Vec<(String, usize)> {
    let mut buckets: HashMap<String, usize> = HashMap::new();
    for tx in txs {
        let rounded = (tx.from_amount / AMOUNT_BUCKET).round() * AMOUNT_BUCKET;
        let key = format!("{}/{}:{rounded:.0}", tx.from_symbol, tx.to_symbol);
        *buckets.entry(key).or_default() += 1;
    }
    buckets
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .collect()
}

pub fn distinct_failed_ips(attempts: &[LoginAttempt]) -> Vec<String> {
    let mut ips: Vec<String> = attempts
        .iter()
        .filter(|a| !a.success)
        .filter_map(|a| a.ip.map(|ip| ip.to_string()))
        .collect();
    ips.sort();
    ips.dedup();
    ips
}
