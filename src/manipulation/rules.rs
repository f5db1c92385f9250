use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::model::Transaction;
use crate::monitor::types::{AlertKind, Severity};

/// Minimum window depth before the volatility detector runs.
pub const VOLATILITY_MIN_HISTORY: usize = 10;
/// Minimum window depth before the pattern detectors run.
pub const PATTERN_MIN_HISTORY: usize = 5;

const MONOTONIC_WINDOW: usize = 10;
const V_PATTERN_UP_RATIO: f64 = 1.5;
const PUMP_MIN_TRADES: usize = 5;
const SLIPPAGE_VOLUME_RATIO: f64 = 2.0;
const SLIPPAGE_PRICE_RATIO: f64 = 1.05;

/// One entry of a per-pair price window.
#[derive(Debug, Clone)]
pub struct PricePoint {
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: String,
    pub wallet_address: String,
}

#[derive(Debug, Clone)]
pub struct PatternHit {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
}

fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        return 0.0;
    }
    (to - from) / from * 100.0
}

/// A >10% move completing in under 30 seconds among the last three entries.
pub fn volatility_spike(
    window: &[PricePoint],
    pair: &str,
    volatility_pct: f64,
    max_secs: i64,
) -> Option<PatternHit> {
    if window.len() < VOLATILITY_MIN_HISTORY {
        return None;
    }
    let tail = &window[window.len() - 3..];
    for pair_points in tail.windows(2) {
        let change = pct_change(pair_points[0].price, pair_points[1].price);
        let elapsed = (pair_points[1].timestamp - pair_points[0].timestamp).num_seconds();
        if change.abs() > volatility_pct && elapsed < max_secs {
            return Some(PatternHit {
                kind: AlertKind::PriceVolatilitySpike,
                severity: Severity::High,
                message: format!("{pair} moved {change:.1}% in {elapsed}s"),
            });
        }
    }
    None
}

/// Pattern detectors over one pair's window: V-shape reversal, monotonic
/// runs and volume spikes.
pub fn pattern_scan(
    window: &[PricePoint],
    pair: &str,
    monotonic_threshold: usize,
    volume_spike_multiplier: f64,
) -> Vec<PatternHit> {
    let mut hits = Vec::new();
    if window.len() < PATTERN_MIN_HISTORY {
        return hits;
    }

    let [a, b, c] = &window[window.len() - 3..] else {
        return hits;
    };
    let down = a.price - b.price;
    let up = c.price - b.price;
    if down > 0.0 && up > 0.0 && up >= V_PATTERN_UP_RATIO * down {
        hits.push(PatternHit {
            kind: AlertKind::PumpPreparationVPattern,
            severity: Severity::Medium,
            message: format!(
                "{pair} V-shape reversal, recovery {up:.4} against dip {down:.4}"
            ),
        });
    }

    let tail = &window[window.len().saturating_sub(MONOTONIC_WINDOW)..];
    if tail.len() == MONOTONIC_WINDOW {
        let ups = tail.windows(2).filter(|w| w[1].price > w[0].price).count();
        let downs = tail.windows(2).filter(|w| w[1].price < w[0].price).count();
        if ups >= monotonic_threshold {
            hits.push(PatternHit {
                kind: AlertKind::CoordinatedPump,
                severity: Severity::High,
                message: format!("{pair} rose on {ups} of the last {MONOTONIC_WINDOW} trades"),
            });
        } else if downs >= monotonic_threshold {
            hits.push(PatternHit {
                kind: AlertKind::CoordinatedDump,
                severity: Severity::High,
                message: format!("{pair} fell on {downs} of the last {MONOTONIC_WINDOW} trades"),
            });
        }
    }

    let avg_volume = window.iter().map(|p| p.volume).sum::<f64>() / window.len() as f64;
    let last = &window[window.len() - 1];
    if avg_volume > 0.0 && last.volume > volume_spike_multiplier * avg_volume {
        hits.push(PatternHit {
            kind: AlertKind::VolumeSpike,
            severity: Severity::Medium,
            message: format!(
                "{pair} volume {:.2} is {:.1}x the window average",
                last.volume,
                last.volume / avg_volume
            ),
        });
    }

    hits
}

/// Trailing-24h scan across all pairs: wide price range driven by few
/// wallets trading many times.
pub fn pump_and_dump(
    txs: &[Transaction],
    range_pct: f64,
    wallet_ratio: f64,
) -> Vec<PatternHit> {
    let mut by_pair: HashMap<String, Vec<&Transaction>> = HashMap::new();
    for tx in txs {
        by_pair.entry(tx.symbol_pair()).or_default().push(tx);
    }

    let mut hits = Vec::new();
    for (pair, trades) in by_pair {
        if trades.len() < PUMP_MIN_TRADES {
            continue;
        }
        let min = trades.iter().map(|t| t.price).fold(f64::INFINITY, f64::min);
        let max = trades.iter().map(|t| t.price).fold(f64::NEG_INFINITY, f64::max);
        if min <= 0.0 {
            continue;
        }
        let range = (max - min) / min * 100.0;
        let wallets: HashSet<&str> = trades.iter().map(|t| t.wallet_address.as_str()).collect();
        let ratio = trades.len() as f64 / wallets.len() as f64;
        if range > range_pct && ratio > wallet_ratio {
            hits.push(PatternHit {
                kind: AlertKind::PumpAndDumpPattern,
                severity: Severity::High,
                message: format!(
                    "{pair} swung {range:.1}% across {} trades from {} wallets",
                    trades.len(),
                    wallets.len()
                ),
            });
        }
    }
    hits
}

/// Trailing-5m scan: one wallet churning the same pair.
pub fn wash_trades(txs: &[Transaction], threshold: usize) -> Vec<PatternHit> {
    let mut groups: HashMap<(String, String), usize> = HashMap::new();
    for tx in txs {
        *groups
            .entry((tx.wallet_address.clone(), tx.symbol_pair()))
            .or_default() += 1;
    }
    groups
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|((wallet, pair), count)| PatternHit {
            kind: AlertKind::WashTradingDetected,
            severity: Severity::High,
            message: format!("wallet {wallet} traded {pair} {count} times in 5 minutes"),
        })
        .collect()
}

/// Trailing-1m scan per pair: a different wallet immediately paying over 5%
/// more with over twice the volume.
pub fn slippage_manipulation(txs: &[Transaction]) -> Vec<PatternHit> {
    let mut by_pair: HashMap<String, Vec<&Transaction>> = HashMap::new();
    for tx in txs {
        by_pair.entry(tx.symbol_pair()).or_default().push(tx);
    }

    let mut hits = Vec::new();
    for (pair, mut trades) in by_pair {
        trades.sort_by_key(|t| t.created_at);
        for w in trades.windows(2) {
            let (prev, next) = (w[0], w[1]);
            if next.wallet_address != prev.wallet_address
                && next.from_amount > SLIPPAGE_VOLUME_RATIO * prev.from_amount
                && next.price > SLIPPAGE_PRICE_RATIO * prev.price
            {
                hits.push(PatternHit {
                    kind: AlertKind::SlippageManipulation,
                    severity: Severity::Medium,
                    message: format!(
                        "{pair} trade {} outsized and overpriced right after {}",
                        next.id, prev.id
                    ),
                });
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TransactionStatus, TransactionType};
    use chrono::Duration;

    fn point(price: f64, volume: f64, at: DateTime<Utc>) -> PricePoint {
        PricePoint {
            price,
            volume,
            timestamp: at,
            transaction_id: uuid::Uuid::new_v4().to_string(),
            wallet_address: "wallet-1".to_string(),
        }
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

    #[test]
    fn test_volatility_spike_needs_ten_points() {
        let now = Utc::now();
        let window: Vec<_> = (0..9)
            .map(|i| point(100.0 + i as f64 * 20.0, 10.0, now + Duration::seconds(i)))
            .collect();
        assert!(volatility_spike(&window, "GOLD/USD", 10.0, 30).is_none());
    }

    #[test]
    fn test_volatility_spike_on_fast_move() {
        let now = Utc::now();
        let mut window: Vec<_> = (0..9)
            .map(|i| point(100.0, 10.0, now + Duration::seconds(i)))
            .collect();
        // 20% jump two seconds after the previous point.
        window.push(point(120.0, 10.0, now + Duration::seconds(11)));
        let hit = volatility_spike(&window, "GOLD/USD", 10.0, 30).unwrap();
        assert_eq!(hit.kind, AlertKind::PriceVolatilitySpike);
        assert_eq!(hit.severity, Severity::High);
    }

    #[test]
    fn test_monotonic_rise_is_coordinated_pump() {
        let now = Utc::now();
        let window: Vec<_> = (0..10)
            .map(|i| point(100.0 + i as f64, 10.0, now + Duration::seconds(i)))
            .collect();
        let hits = pattern_scan(&window, "GOLD/USD", 8, 5.0);
        let pumps: Vec<_> = hits
            .iter()
            .filter(|h| h.kind == AlertKind::CoordinatedPump)
            .collect();
        assert_eq!(pumps.len(), 1);
        assert!(hits.iter().all(|h| h.kind != AlertKind::CoordinatedDump));
    }

    #[test]
    fn test_v_pattern_reversal() {
        let now = Utc::now();
        let mut window: Vec<_> = (0..5)
            .map(|i| point(100.0, 10.0, now + Duration::seconds(i)))
            .collect();
        window.push(point(90.0, 10.0, now + Duration::seconds(6)));
        window.push(point(110.0, 10.0, now + Duration::seconds(7)));
        let hits = pattern_scan(&window, "GOLD/USD", 8, 5.0);
        assert!(hits
            .iter()
            .any(|h| h.kind == AlertKind::PumpPreparationVPattern));
    }

    #[test]
    fn test_volume_spike() {
        let now = Utc::now();
        let mut window: Vec<_> = (0..9)
            .map(|i| point(100.0, 10.0, now + Duration::seconds(i)))
            .collect();
        window.push(point(100.0, 200.0, now + Duration::seconds(9)));
        let hits = pattern_scan(&window, "GOLD/USD", 8, 5.0);
        assert!(hits.iter().any(|h| h.kind == AlertKind::VolumeSpike));
    }

    #[test]
    fn test_pump_and_dump_scan() {
        let now = Utc::now();
        // Six trades, two wallets, 25% range.
        let txs = vec![
            tx("w1", 100.0, 10.0, now),
            tx("w1", 110.0, 10.0, now),
            tx("w2", 115.0, 10.0, now),
            tx("w1", 120.0, 10.0, now),
            tx("w2", 125.0, 10.0, now),
            tx("w1", 118.0, 10.0, now),
        ];
        let hits = pump_and_dump(&txs, 15.0, 2.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, AlertKind::PumpAndDumpPattern);
    }

    #[test]
    fn test_wash_trading_groups_by_wallet_and_pair() {
        let now = Utc::now();
        let mut txs: Vec<_> = (0..5).map(|_| tx("w1", 100.0, 10.0, now)).collect();
        txs.extend((0..4).map(|_| tx("w2", 100.0, 10.0, now)));
        let hits = wash_trades(&txs, 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].message.contains("w1"));
    }

    #[test]
    fn test_slippage_needs_different_wallet() {
        let now = Utc::now();
        let same_wallet = vec![
            tx("w1", 100.0, 10.0, now),
            tx("w1", 110.0, 25.0, now + Duration::seconds(5)),
        ];
        assert!(slippage_manipulation(&same_wallet).is_empty());

        let different = vec![
            tx("w1", 100.0, 10.0, now),
            tx("w2", 110.0, 25.0, now + Duration::seconds(5)),
        ];
        assert_eq!(slippage_manipulation(&different).len(), 1);
    }
}
