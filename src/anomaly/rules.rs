use chrono::{Local, Timelike};

use crate::model::Transaction;
use crate::monitor::types::Severity;

/// Minimum prior history before the statistical rules apply.
pub const MIN_HISTORY: usize = 5;

const NIGHT_WINDOW: usize = 20;
const NIGHT_HIT_THRESHOLD: usize = 15;
const INTERVAL_SIGMA: f64 = 3.0;
const NEAR_MATCH_TOLERANCE: f64 = 0.01;

/// One analyzer hit. The rule tag doubles as the suspicious-activity kind.
#[derive(Debug, Clone)]
pub struct Finding {
    pub rule: &'static str,
    pub severity: Severity,
    pub message: String,
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

/// Z-score of the current amount against the user's prior amounts.
/// `prior` excludes the transaction under test.
pub fn amount_z_score(tx: &Transaction, prior: &[Transaction], threshold: f64) -> Option<Finding> {
    if prior.len() < MIN_HISTORY {
        return None;
    }
    let amounts: Vec<f64> = prior.iter().map(|t| t.from_amount).collect();
    let (mean, std_dev) = mean_std(&amounts);
    let std_dev = if std_dev == 0.0 { 1.0 } else { std_dev };
    let z = (tx.from_amount - mean) / std_dev;
    if z.abs() > threshold {
        return Some(Finding {
            rule: "AMOUNT_Z_SCORE",
            severity: Severity::Medium,
            message: format!(
                "amount {:.2} has z-score {z:.2} against user mean {mean:.2}",
                tx.from_amount
            ),
        });
    }
    None
}

/// Transactions arriving abnormally fast: the latest inter-arrival gap is
/// more than three standard deviations below the user's mean gap.
/// `history` is newest first and includes the transaction under test.
pub fn rapid_interval(history: &[Transaction]) -> Option<Finding> {
    if history.len() < MIN_HISTORY + 1 {
        return None;
    }
    let gaps: Vec<f64> = history
        .windows(2)
        .map(|w| (w[0].created_at - w[1].created_at).num_milliseconds() as f64 / 1000.0)
        .collect();
    let (mean, std_dev) = mean_std(&gaps);
    if std_dev == 0.0 {
        return None;
    }
    let latest = gaps[0];
    if latest < mean - INTERVAL_SIGMA * std_dev {
        return Some(Finding {
            rule: "RAPID_INTERVAL",
            severity: Severity::Low,
            message: format!(
                "latest gap {latest:.1}s is over {INTERVAL_SIGMA} sigma below mean {mean:.1}s"
            ),
        });
    }
    None
}

/// Flags once a user has touched more distinct symbols than the limit.
pub fn symbol_diversity(user_id: &str, distinct_symbols: usize, limit: usize) -> Option<Finding> {
    if distinct_symbols > limit {
        return Some(Finding {
            rule: "SYMBOL_DIVERSITY",
            severity: Severity::Low,
            message: format!("user {user_id} has traded {distinct_symbols} distinct symbols"),
        });
    }
    None
}

/// More than 15 of the user's last 20 transactions landed outside 06:00-22:00
/// local time.
pub fn night_activity(recent: &[Transaction]) -> Option<Finding> {
    let window = &recent[..recent.len().min(NIGHT_WINDOW)];
    let off_hours = window
        .iter()
        .filter(|t| {
            let hour = t.created_at.with_timezone(&Local).hour();
            !(6..22).contains(&hour)
        })
        .count();
    if off_hours > NIGHT_HIT_THRESHOLD {
        return Some(Finding {
            rule: "NIGHT_ACTIVITY",
            severity: Severity::Low,
            message: format!("{off_hours} of the last {} transactions fall outside 06:00-22:00", window.len()),
        });
    }
    None
}

/// Bot signatures on one wallet and pair: exactly repeated amounts, or a
/// cluster of amounts within 1% of the current one. `pair_window` includes
/// the transaction under test and it counts toward both thresholds.
pub fn amount_clustering(
    tx: &Transaction,
    pair_window: &[Transaction],
    exact_threshold: usize,
    cluster_threshold: usize,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    let exact = pair_window
        .iter()
        .filter(|t| t.from_amount == tx.from_amount)
        .count();
    if exact > exact_threshold {
        findings.push(Finding {
            rule: "EXACT_AMOUNT_REPEAT",
            severity: Severity::High,
            message: format!(
                "{exact} transactions with exactly {:.4} on {} in the last hour",
                tx.from_amount,
                tx.symbol_pair()
            ),
        });
    }

    let near = pair_window
        .iter()
        .filter(|t| {
            tx.from_amount > 0.0
                && ((t.from_amount - tx.from_amount) / tx.from_amount).abs() <= NEAR_MATCH_TOLERANCE
        })
        .count();
    if near > cluster_threshold {
        findings.push(Finding {
            rule: "AMOUNT_CLUSTERING",
            severity: Severity::Medium,
            message: format!(
                "{near} transactions within 1% of {:.4} on {}",
                tx.from_amount,
                tx.symbol_pair()
            ),
        });
    }

    findings
}

/// One wallet accounting for more than `threshold` of the pair's last 100
/// transactions.
pub fn wallet_dominance(
    tx: &Transaction,
    recent_pair: &[Transaction],
    threshold: usize,
) -> Option<Finding> {
    let owned = recent_pair
        .iter()
        .filter(|t| t.wallet_address == tx.wallet_address)
        .count();
    if owned > threshold {
        return Some(Finding {
            rule: "WALLET_DOMINANCE",
            severity: Severity::High,
            message: format!(
                "wallet {} accounts for {owned} of the last {} trades on {}",
                tx.wallet_address,
                recent_pair.len(),
                tx.symbol_pair()
            ),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TransactionStatus, TransactionType};
    use chrono::{DateTime, Duration, Utc};

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

    #[test]
    fn test_z_score_needs_history() {
        let now = Utc::now();
        let prior: Vec<_> = (0..4).map(|i| tx_at(&format!("h{i}"), 10.0, now)).collect();
        assert!(amount_z_score(&tx_at("cur", 1_000_000.0, now), &prior, 2.5).is_none());
    }

    #[test]
    fn test_z_score_flags_outlier() {
        let now = Utc::now();
        let prior: Vec<_> = (0..10)
            .map(|i| tx_at(&format!("h{i}"), 100.0 + i as f64, now))
            .collect();
        let finding = amount_z_score(&tx_at("cur", 10_000.0, now), &prior, 2.5);
        assert_eq!(finding.unwrap().severity, Severity::Medium);
    }

    #[test]
    fn test_z_score_passes_typical_amount() {
        let now = Utc::now();
        let prior: Vec<_> = (0..10)
            .map(|i| tx_at(&format!("h{i}"), 100.0 + i as f64, now))
            .collect();
        assert!(amount_z_score(&tx_at("cur", 105.0, now), &prior, 2.5).is_none());
    }

    #[test]
    fn test_rapid_interval_flags_burst() {
        let now = Utc::now();
        // Fifty transactions a minute apart, then one a millisecond later.
        // The long uniform history keeps sigma small enough for the
        // millisecond gap to land below mean - 3 sigma.
        let mut history = vec![tx_at("cur", 10.0, now)];
        history.push(tx_at("h0", 10.0, now - Duration::milliseconds(1)));
        for i in 1..51 {
            history.push(tx_at(
                &format!("h{i}"),
                10.0,
                now - Duration::minutes(i as i64),
            ));
        }
        assert!(rapid_interval(&history).is_some());
    }

    #[test]
    fn test_rapid_interval_tolerates_short_noisy_history() {
        let now = Utc::now();
        // With only nine prior gaps the millisecond outlier inflates sigma
        // past the point where the rule can fire.
        let mut history = vec![tx_at("cur", 10.0, now)];
        history.push(tx_at("h0", 10.0, now - Duration::milliseconds(1)));
        for i in 1..9 {
            history.push(tx_at(
                &format!("h{i}"),
                10.0,
                now - Duration::minutes(i as i64),
            ));
        }
        assert!(rapid_interval(&history).is_none());
    }

    #[test]
    fn test_exact_amount_repeat() {
        let now = Utc::now();
        let cur = tx_at("cur", 100.0, now);
        let window: Vec<_> = (0..4).map(|i| tx_at(&format!("h{i}"), 100.0, now)).collect();
        let findings = amount_clustering(&cur, &window, 3, 5);
        assert!(findings.iter().any(|f| f.rule == "EXACT_AMOUNT_REPEAT"));
        assert!(findings
            .iter()
            .all(|f| f.rule != "EXACT_AMOUNT_REPEAT" || f.severity == Severity::High));
    }

    #[test]
    fn test_exact_amount_repeat_counts_current_transaction() {
        let now = Utc::now();
        let cur = tx_at("cur", 100.0, now);
        // Window as returned by a wallet+pair query: the current transaction
        // plus three earlier identical ones. Four total must trip > 3.
        let mut window: Vec<_> = (0..3).map(|i| tx_at(&format!("h{i}"), 100.0, now)).collect();
        window.push(cur.clone());
        let findings = amount_clustering(&cur, &window, 3, 5);
        assert!(findings.iter().any(|f| f.rule == "EXACT_AMOUNT_REPEAT"));
    }

    #[test]
    fn test_amount_cluster_counts_current_transaction() {
        let now = Utc::now();
        let cur = tx_at("cur", 100.0, now);
        // Five near matches plus the current transaction: six total trips > 5.
        let mut window: Vec<_> = (0..5)
            .map(|i| tx_at(&format!("h{i}"), 100.0 + 0.1 * i as f64, now))
            .collect();
        window.push(cur.clone());
        let findings = amount_clustering(&cur, &window, 30, 5);
        assert!(findings.iter().any(|f| f.rule == "AMOUNT_CLUSTERING"));
    }

    #[test]
    fn test_wallet_dominance() {
        let now = Utc::now();
        let cur = tx_at("cur", 100.0, now);
        let recent: Vec<_> = (0..40).map(|i| tx_at(&format!("h{i}"), 50.0, now)).collect();
        let finding = wallet_dominance(&cur, &recent, 30);
        assert_eq!(finding.unwrap().severity, Severity::High);
    }

    #[test]
    fn test_symbol_diversity_at_limit_passes() {
        assert!(symbol_diversity("u1", 20, 20).is_none());
        assert!(symbol_diversity("u1", 21, 20).is_some());
    }
}
