use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::types::{Alert, Severity};

const MAX_ALERTS: usize = 1000;
const SUSPICIOUS_ACTIVITY_WINDOW_HOURS: i64 = 24;

/// Rolling per-user aggregate, kept in memory only. Lost on restart; a
/// documented limitation of the single-instance design.
#[derive(Debug, Clone, Serialize)]
pub struct UserBehaviorProfile {
    pub total_transactions: u64,
    pub total_volume: f64,
    pub last_activity: Option<DateTime<Utc>>,
    pub suspicious_count: u64,
    pub risk_level: Severity,
}

impl Default for UserBehaviorProfile {
    fn default() -> Self {
        Self {
            total_transactions: 0,
            total_volume: 0.0,
            last_activity: None,
            suspicious_count: 0,
            risk_level: Severity::Low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuspiciousEntry {
    pub timestamp: DateTime<Utc>,
    pub details: JsonValue,
}

#[derive(Default)]
struct MonitorState {
    alerts: VecDeque<Alert>,
    suspicious: HashMap<(String, String), Vec<SuspiciousEntry>>,
    profiles: HashMap<String, UserBehaviorProfile>,
}

/// Shared alert log, suspicious-activity history and behavior profiles.
/// All detector engines and the admission path write here; a single mutex
/// suffices since every mutation is an append, evict or increment.
pub struct SecurityMonitor {
    max_alerts: usize,
    state: Mutex<MonitorState>,
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityMonitor {
    pub fn new() -> Self {
        Self {
            max_alerts: MAX_ALERTS,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Append an alert, evicting from the oldest end past capacity.
    pub fn add_alert(&self, alert: Alert) {
        tracing::warn!(
            kind = alert.kind.as_str(),
            severity = alert.severity.as_str(),
            user_id = alert.context.user_id.as_deref(),
            ip = ?alert.context.ip,
            "{}",
            alert.message
        );

        let mut state = self.state.lock().expect("monitor lock poisoned");
        state.alerts.push_back(alert);
        while state.alerts.len() > self.max_alerts {
            state.alerts.pop_front();
        }
    }

    /// The most recent `limit` alerts, oldest first.
    pub fn get_alerts(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.lock().expect("monitor lock poisoned");
        let skip = state.alerts.len().saturating_sub(limit);
        state.alerts.iter().skip(skip).cloned().collect()
    }

    pub fn alert_count(&self) -> usize {
        self.state.lock().expect("monitor lock poisoned").alerts.len()
    }

    pub fn clear_alerts(&self) {
        self.state
            .lock()
            .expect("monitor lock poisoned")
            .alerts
            .clear();
    }

    pub fn record_suspicious_activity(&self, user_id: &str, kind: &str, details: JsonValue) {
        self.record_suspicious_activity_at(user_id, kind, details, Utc::now());
    }

    /// Entries older than the 24 h window are pruned lazily on each write.
    pub fn record_suspicious_activity_at(
        &self,
        user_id: &str,
        kind: &str,
        details: JsonValue,
        now: DateTime<Utc>,
    ) {
        let cutoff = now - Duration::hours(SUSPICIOUS_ACTIVITY_WINDOW_HOURS);
        let mut state = self.state.lock().expect("monitor lock poisoned");
        let entries = state
            .suspicious
            .entry((user_id.to_string(), kind.to_string()))
            .or_default();
        entries.push(SuspiciousEntry {
            timestamp: now,
            details,
        });
        entries.retain(|e| e.timestamp > cutoff);
    }

    pub fn suspicious_count(&self, user_id: &str, kind: &str) -> usize {
        self.state
            .lock()
            .expect("monitor lock poisoned")
            .suspicious
            .get(&(user_id.to_string(), kind.to_string()))
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Created lazily on first update; the risk level is only recomputed when
    /// the transaction was suspicious.
    pub fn update_behavior_profile(&self, user_id: &str, amount: f64, is_suspicious: bool) {
        let mut state = self.state.lock().expect("monitor lock poisoned");
        let profile = state.profiles.entry(user_id.to_string()).or_default();
        profile.total_transactions += 1;
        profile.total_volume += amount;
        profile.last_activity = Some(Utc::now());

        if is_suspicious {
            profile.suspicious_count += 1;
            profile.risk_level =
                risk_level(profile.suspicious_count, profile.total_transactions);
        }
    }

    pub fn behavior_profile(&self, user_id: &str) -> Option<UserBehaviorProfile> {
        self.state
            .lock()
            .expect("monitor lock poisoned")
            .profiles
            .get(user_id)
            .cloned()
    }

    pub fn users_monitored(&self) -> usize {
        self.state.lock().expect("monitor lock poisoned").profiles.len()
    }
}

fn risk_level(suspicious_count: u64, total_transactions: u64) -> Severity {
    if total_transactions == 0 {
        return Severity::Low;
    }
    let ratio = suspicious_count as f64 / total_transactions as f64;
    if ratio > 0.5 {
        Severity::Critical
    } else if ratio > 0.3 {
        Severity::High
    } else if ratio > 0.1 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::AlertKind;
    use serde_json::json;

    #[test]
    fn test_alert_log_bounded_at_capacity() {
        let monitor = SecurityMonitor::new();
        for i in 0..(MAX_ALERTS + 1) {
            monitor.add_alert(Alert::new(
                AlertKind::AnomalyDetected,
                Severity::Low,
                format!("alert {i}"),
            ));
        }

        assert_eq!(monitor.alert_count(), MAX_ALERTS);
        let alerts = monitor.get_alerts(MAX_ALERTS);
        // The first append was evicted; order is preserved for the rest.
        assert_eq!(alerts[0].message, "alert 1");
        assert_eq!(alerts[MAX_ALERTS - 1].message, format!("alert {MAX_ALERTS}"));
    }

    #[test]
    fn test_get_alerts_returns_most_recent_in_order() {
        let monitor = SecurityMonitor::new();
        for i in 0..5 {
            monitor.add_alert(Alert::new(
                AlertKind::VolumeSpike,
                Severity::Medium,
                format!("alert {i}"),
            ));
        }

        let last_two = monitor.get_alerts(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].message, "alert 3");
        assert_eq!(last_two[1].message, "alert 4");
    }

    #[test]
    fn test_clear_alerts() {
        let monitor = SecurityMonitor::new();
        monitor.add_alert(Alert::new(AlertKind::IpBlocked, Severity::High, "x"));
        monitor.clear_alerts();
        assert_eq!(monitor.alert_count(), 0);
    }

    #[test]
    fn test_suspicious_activity_pruned_past_window() {
        let monitor = SecurityMonitor::new();
        let now = Utc::now();
        monitor.record_suspicious_activity_at(
            "u1",
            "RAPID_TRANSACTIONS",
            json!({}),
            now - Duration::hours(25),
        );
        monitor.record_suspicious_activity_at("u1", "RAPID_TRANSACTIONS", json!({}), now);

        // The 25 h old entry fell out of the window on the second write.
        assert_eq!(monitor.suspicious_count("u1", "RAPID_TRANSACTIONS"), 1);
    }

    #[test]
    fn test_behavior_profile_risk_levels() {
        let monitor = SecurityMonitor::new();
        monitor.update_behavior_profile("u1", 10.0, true);
        let profile = monitor.behavior_profile("u1").unwrap();
        assert_eq!(profile.risk_level, Severity::Critical); // 1/1 > 0.5

        for _ in 0..8 {
            monitor.update_behavior_profile("u1", 10.0, false);
        }
        monitor.update_behavior_profile("u1", 10.0, true);
        let profile = monitor.behavior_profile("u1").unwrap();
        // 2 suspicious out of 10 -> ratio 0.2
        assert_eq!(profile.risk_level, Severity::Medium);
        assert_eq!(profile.total_transactions, 10);
    }
}
