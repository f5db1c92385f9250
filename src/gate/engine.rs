use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::config::GateConfig;
use crate::engine::EngineRunner;
use crate::monitor::types::{Alert, AlertKind, Severity};
use crate::monitor::SecurityMonitor;

use super::patterns;

const REQUEST_LOG_WINDOW_HOURS: i64 = 1;
const QUOTA_WINDOW_SECONDS: i64 = 60;
const SWEEP_WINDOW_SECONDS: i64 = 60;

/// Verdict of the synchronous request gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Source IP is currently blocked.
    Blocked,
    /// Per-IP quota exceeded; rejected without blocking.
    RateLimited,
    /// Payload carried an injection pattern; IP gets blocked.
    Rejected { fields: Vec<String> },
}

#[derive(Debug, Clone)]
struct RequestRecord {
    timestamp: DateTime<Utc>,
    endpoint: String,
    method: String,
}

#[derive(Debug, Clone)]
struct Quota {
    count: usize,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ShieldStats {
    pub tracked_ips: usize,
    pub blocked_ips: usize,
    pub active_quotas: usize,
}

#[derive(Default)]
struct ShieldState {
    request_log: HashMap<IpAddr, Vec<RequestRecord>>,
    blocked: HashMap<IpAddr, DateTime<Utc>>,
    quotas: HashMap<IpAddr, Quota>,
}

/// Request gate and background attack sweep. The gate runs inline on every
/// inbound request; the sweep runs on the engine timer.
pub struct AttackShield {
    runner: EngineRunner,
    monitor: Arc<SecurityMonitor>,
    config: GateConfig,
    state: Mutex<ShieldState>,
}

impl AttackShield {
    pub fn new(monitor: Arc<SecurityMonitor>, config: GateConfig) -> Arc<Self> {
        Arc::new(Self {
            runner: EngineRunner::new("gate"),
            monitor,
            config,
            state: Mutex::new(ShieldState::default()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let shield = self.clone();
        self.runner
            .start(std::time::Duration::from_secs(self.config.tick_secs), move || {
                let shield = shield.clone();
                async move {
                    shield.sweep_at(Utc::now());
                }
            });
    }

    pub fn stop(&self) {
        self.runner.stop();
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    pub fn check_request(
        &self,
        ip: IpAddr,
        endpoint: &str,
        method: &str,
        body: Option<&JsonValue>,
    ) -> GateDecision {
        self.check_request_at(ip, endpoint, method, body, Utc::now())
    }

    pub fn check_request_at(
        &self,
        ip: IpAddr,
        endpoint: &str,
        method: &str,
        body: Option<&JsonValue>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        {
            let mut state = self.state.lock().expect("shield lock poisoned");

            match state.blocked.get(&ip).copied() {
                Some(deadline) if now < deadline => {
                    drop(state);
                    return self.on_blocked_retry(ip, endpoint);
                }
                Some(_) => {
                    // Block expired between sweeps.
                    state.blocked.remove(&ip);
                    self.monitor.add_alert(
                        Alert::new(
                            AlertKind::IpUnblocked,
                            Severity::Low,
                            format!("block on {ip} expired"),
                        )
                        .ip(ip),
                    );
                }
                None => {}
            }

            let cutoff = now - Duration::hours(REQUEST_LOG_WINDOW_HOURS);
            let log = state.request_log.entry(ip).or_default();
            log.retain(|r| r.timestamp > cutoff);
            log.push(RequestRecord {
                timestamp: now,
                endpoint: endpoint.to_string(),
                method: method.to_string(),
            });

            let quota = state.quotas.entry(ip).or_insert(Quota {
                count: 0,
                reset_at: now + Duration::seconds(QUOTA_WINDOW_SECONDS),
            });
            if now >= quota.reset_at {
                quota.count = 0;
                quota.reset_at = now + Duration::seconds(QUOTA_WINDOW_SECONDS);
            }
            quota.count += 1;
            if quota.count > self.config.max_requests_per_minute {
                return GateDecision::RateLimited;
            }
        }

        if let Some(body) = body {
            let hits = patterns::scan_payload(body, self.config.special_char_ratio);
            if !hits.is_empty() {
                self.monitor.add_alert(
                    Alert::new(
                        AlertKind::InjectionAttackDetected,
                        Severity::Critical,
                        format!("injection pattern in request to {endpoint} from {ip}"),
                    )
                    .ip(ip)
                    .details(json!({ "endpoint": endpoint, "fields": hits })),
                );
                self.block_ip_at(ip, "injection attempt", now);
                return GateDecision::Rejected { fields: hits };
            }
        }

        GateDecision::Allow
    }

    fn on_blocked_retry(&self, ip: IpAddr, endpoint: &str) -> GateDecision {
        self.monitor.add_alert(
            Alert::new(
                AlertKind::BlockedIpAttemptedAccess,
                Severity::High,
                format!("blocked IP {ip} attempted {endpoint}"),
            )
            .ip(ip),
        );
        GateDecision::Blocked
    }

    pub fn block_ip(&self, ip: IpAddr, reason: &str) {
        self.block_ip_at(ip, reason, Utc::now());
    }

    /// Idempotent. A fresh block gets a one-hour expiry deadline.
    pub fn block_ip_at(&self, ip: IpAddr, reason: &str, now: DateTime<Utc>) {
        {
            let mut state = self.state.lock().expect("shield lock poisoned");
            if state.blocked.contains_key(&ip) {
                return;
            }
            state
                .blocked
                .insert(ip, now + Duration::seconds(self.config.block_duration_secs));
        }
        self.monitor.add_alert(
            Alert::new(
                AlertKind::IpBlocked,
                Severity::High,
                format!("blocked {ip}: {reason}"),
            )
            .ip(ip)
            .details(json!({ "reason": reason })),
        );
    }

    pub fn unblock(&self, ip: IpAddr) -> bool {
        let removed = {
            let mut state = self.state.lock().expect("shield lock poisoned");
            state.blocked.remove(&ip).is_some()
        };
        if removed {
            self.monitor.add_alert(
                Alert::new(
                    AlertKind::IpUnblocked,
                    Severity::Low,
                    format!("{ip} unblocked by operator"),
                )
                .ip(ip),
            );
        }
        removed
    }

    pub fn blocked_ips(&self) -> Vec<(IpAddr, DateTime<Utc>)> {
        let state = self.state.lock().expect("shield lock poisoned");
        let mut out: Vec<_> = state.blocked.iter().map(|(ip, d)| (*ip, *d)).collect();
        out.sort_by_key(|(_, deadline)| *deadline);
        out
    }

    /// Background pass: expire blocks, then hunt floods and scanners in the
    /// trailing minute of each IP's request log.
    pub fn sweep_at(&self, now: DateTime<Utc>) {
        let mut expired = Vec::new();
        let mut to_block: Vec<(IpAddr, AlertKind, Severity, String)> = Vec::new();
        {
            let mut state = self.state.lock().expect("shield lock poisoned");
            let state = &mut *state;

            state.blocked.retain(|ip, deadline| {
                if *deadline <= now {
                    expired.push(*ip);
                    false
                } else {
                    true
                }
            });
            state.quotas.retain(|_, q| q.reset_at > now);

            let minute_ago = now - Duration::seconds(SWEEP_WINDOW_SECONDS);
            let log_cutoff = now - Duration::hours(REQUEST_LOG_WINDOW_HOURS);
            for (ip, log) in state.request_log.iter_mut() {
                log.retain(|r| r.timestamp > log_cutoff);
                if state.blocked.contains_key(ip) {
                    continue;
                }

                let recent: Vec<&RequestRecord> =
                    log.iter().filter(|r| r.timestamp > minute_ago).collect();
                if recent.len() > self.config.max_requests_per_minute {
                    to_block.push((
                        *ip,
                        AlertKind::PossibleDdosAttack,
                        Severity::Critical,
                        format!("{} requests in 60s from {ip}", recent.len()),
                    ));
                    continue;
                }

                let mut per_endpoint: HashMap<&str, usize> = HashMap::new();
                for r in &recent {
                    *per_endpoint.entry(r.endpoint.as_str()).or_default() += 1;
                }
                if let Some((endpoint, count)) = per_endpoint
                    .iter()
                    .find(|(_, c)| **c > self.config.max_requests_per_endpoint)
                {
                    to_block.push((
                        *ip,
                        AlertKind::EndpointFlood,
                        Severity::High,
                        format!("{count} requests to {endpoint} in 60s from {ip}"),
                    ));
                    continue;
                }

                let distinct: HashSet<&str> =
                    recent.iter().map(|r| r.endpoint.as_str()).collect();
                if distinct.len() > self.config.scanner_endpoint_threshold {
                    to_block.push((
                        *ip,
                        AlertKind::ScannerDetected,
                        Severity::High,
                        format!("{} distinct endpoints probed in 60s from {ip}", distinct.len()),
                    ));
                }
            }
        }

        for ip in expired {
            self.monitor.add_alert(
                Alert::new(
                    AlertKind::IpUnblocked,
                    Severity::Low,
                    format!("block on {ip} expired"),
                )
                .ip(ip),
            );
        }
        for (ip, kind, severity, message) in to_block {
            self.monitor
                .add_alert(Alert::new(kind, severity, &message).ip(ip));
            self.block_ip_at(ip, &message, now);
        }
    }

    /// Drops every per-IP quota counter. Blocked IPs are untouched.
    pub fn reset_rate_limits(&self) -> usize {
        let mut state = self.state.lock().expect("shield lock poisoned");
        let cleared = state.quotas.len();
        state.quotas.clear();
        cleared
    }

    pub fn stats(&self) -> ShieldStats {
        let state = self.state.lock().expect("shield lock poisoned");
        ShieldStats {
            tracked_ips: state.request_log.len(),
            blocked_ips: state.blocked.len(),
            active_quotas: state.quotas.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shield() -> (Arc<AttackShield>, Arc<SecurityMonitor>) {
        let monitor = Arc::new(SecurityMonitor::new());
        let shield = AttackShield::new(monitor.clone(), GateConfig::default());
        (shield, monitor)
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([192, 168, 0, last])
    }

    #[test]
    fn test_quota_rate_limits_without_blocking() {
        let (shield, _monitor) = shield();
        let now = Utc::now();
        for i in 0..100 {
            let d = shield.check_request_at(
                ip(1),
                "/api/v1/trade",
                "POST",
                None,
                now + Duration::milliseconds(i),
            );
            assert_eq!(d, GateDecision::Allow);
        }

        let d = shield.check_request_at(
            ip(1),
            "/api/v1/trade",
            "POST",
            None,
            now + Duration::milliseconds(100),
        );
        assert_eq!(d, GateDecision::RateLimited);
        assert!(shield.blocked_ips().is_empty());
    }

    #[test]
    fn test_sweep_blocks_flood_with_one_hour_deadline() {
        let (shield, monitor) = shield();
        let now = Utc::now();
        // 101 requests inside the trailing minute.
        for i in 0..101 {
            shield.check_request_at(
                ip(2),
                &format!("/api/v1/e{}", i % 3),
                "GET",
                None,
                now - Duration::seconds(30) + Duration::milliseconds(i),
            );
        }

        shield.sweep_at(now);

        let blocked = shield.blocked_ips();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].0, ip(2));
        assert_eq!(blocked[0].1, now + Duration::seconds(3600));
        assert!(monitor
            .get_alerts(200)
            .iter()
            .any(|a| a.kind == AlertKind::PossibleDdosAttack && a.severity == Severity::Critical));
    }

    #[test]
    fn test_sweep_flags_endpoint_flood() {
        let (shield, monitor) = shield();
        let now = Utc::now();
        for i in 0..31 {
            shield.check_request_at(
                ip(3),
                "/api/v1/orders",
                "GET",
                None,
                now - Duration::seconds(10) + Duration::milliseconds(i),
            );
        }

        shield.sweep_at(now);

        assert!(monitor
            .get_alerts(100)
            .iter()
            .any(|a| a.kind == AlertKind::EndpointFlood));
        assert_eq!(shield.blocked_ips().len(), 1);
    }

    #[test]
    fn test_sweep_flags_scanner() {
        let (shield, monitor) = shield();
        let now = Utc::now();
        for i in 0..21 {
            shield.check_request_at(
                ip(4),
                &format!("/probe/{i}"),
                "GET",
                None,
                now - Duration::seconds(5),
            );
        }

        shield.sweep_at(now);

        assert!(monitor
            .get_alerts(100)
            .iter()
            .any(|a| a.kind == AlertKind::ScannerDetected));
    }

    #[test]
    fn test_injection_rejects_and_blocks() {
        let (shield, monitor) = shield();
        let now = Utc::now();
        let body = json!({ "note": "1 UNION SELECT password FROM users" });

        let d = shield.check_request_at(ip(5), "/api/v1/trade", "POST", Some(&body), now);
        assert!(matches!(d, GateDecision::Rejected { .. }));
        assert_eq!(shield.blocked_ips().len(), 1);
        assert!(monitor
            .get_alerts(100)
            .iter()
            .any(|a| a.kind == AlertKind::InjectionAttackDetected));

        // The very next request from that IP bounces with an alert.
        let d = shield.check_request_at(ip(5), "/api/v1/trade", "GET", None, now);
        assert_eq!(d, GateDecision::Blocked);
        assert!(monitor
            .get_alerts(100)
            .iter()
            .any(|a| a.kind == AlertKind::BlockedIpAttemptedAccess));
    }

    #[test]
    fn test_block_is_idempotent_and_expires() {
        let (shield, monitor) = shield();
        let now = Utc::now();
        shield.block_ip_at(ip(6), "manual", now);
        shield.block_ip_at(ip(6), "manual again", now + Duration::minutes(30));
        assert_eq!(shield.blocked_ips().len(), 1);
        // The second call did not refresh the deadline.
        assert_eq!(shield.blocked_ips()[0].1, now + Duration::seconds(3600));

        shield.sweep_at(now + Duration::seconds(3601));
        assert!(shield.blocked_ips().is_empty());
        assert!(monitor
            .get_alerts(100)
            .iter()
            .any(|a| a.kind == AlertKind::IpUnblocked));
    }

    #[test]
    fn test_reset_rate_limits_clears_quotas_only() {
        let (shield, _monitor) = shield();
        let now = Utc::now();
        for i in 0..101 {
            shield.check_request_at(ip(8), "/api/v1/trade", "POST", None, now + Duration::milliseconds(i));
        }
        assert_eq!(
            shield.check_request_at(ip(8), "/api/v1/trade", "POST", None, now + Duration::seconds(1)),
            GateDecision::RateLimited
        );
        shield.block_ip_at(ip(9), "manual", now);

        assert_eq!(shield.reset_rate_limits(), 1);
        assert_eq!(
            shield.check_request_at(ip(8), "/api/v1/trade", "POST", None, now + Duration::seconds(2)),
            GateDecision::Allow
        );
        assert_eq!(shield.blocked_ips().len(), 1);
    }

    #[test]
    fn test_unblock_reports_whether_ip_was_blocked() {
        let (shield, _monitor) = shield();
        shield.block_ip(ip(7), "manual");
        assert!(shield.unblock(ip(7)));
        assert!(!shield.unblock(ip(7)));
    }
}
