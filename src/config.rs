use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub anomaly: AnomalyEngineConfig,
    #[serde(default)]
    pub fraud: FraudEngineConfig,
    #[serde(default)]
    pub manipulation: ManipulationEngineConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================
// Admission Gate (validation) Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    /// Wallet addresses that are always rejected.
    #[serde(default = "default_blacklist")]
    pub blacklisted_addresses: Vec<String>,
    /// Sigma multiplier for the amount-anomaly check.
    #[serde(default = "default_amount_sigma")]
    pub amount_sigma: f64,
    /// Ratio of 30-minute count to hourly average that trips the frequency check.
    #[serde(default = "default_frequency_multiplier")]
    pub frequency_multiplier: f64,
    /// Transactions from one wallet within 5 minutes before it is flagged.
    #[serde(default = "default_rapid_wallet_threshold")]
    pub rapid_wallet_threshold: i64,
    /// Percent deviation from the pair's recent mean price.
    #[serde(default = "default_price_deviation_pct")]
    pub price_deviation_pct: f64,
    /// Risk score above which the transaction is rejected outright.
    #[serde(default = "default_hard_reject_score")]
    pub hard_reject_score: u32,
    /// Risk score above which the behavior profile is marked suspicious.
    #[serde(default = "default_suspicious_score")]
    pub suspicious_score: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            blacklisted_addresses: default_blacklist(),
            amount_sigma: 3.0,
            frequency_multiplier: 5.0,
            rapid_wallet_threshold: 10,
            price_deviation_pct: 20.0,
            hard_reject_score: 80,
            suspicious_score: 30,
        }
    }
}

fn default_blacklist() -> Vec<String> {
    vec!["0x0000000000000000000000000000000000000000".to_string()]
}

fn default_amount_sigma() -> f64 {
    3.0
}

fn default_frequency_multiplier() -> f64 {
    5.0
}

fn default_rapid_wallet_threshold() -> i64 {
    10
}

fn default_price_deviation_pct() -> f64 {
    20.0
}

fn default_hard_reject_score() -> u32 {
    80
}

fn default_suspicious_score() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GasConfig {
    #[serde(default = "default_gas_price")]
    pub gas_price: f64,
    #[serde(default = "default_gas_adjustment")]
    pub gas_adjustment: f64,
    #[serde(default = "default_gas_limit")]
    pub default_gas: f64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            gas_price: 0.025,
            gas_adjustment: 1.3,
            default_gas: 200_000.0,
        }
    }
}

fn default_gas_price() -> f64 {
    0.025
}

fn default_gas_adjustment() -> f64 {
    1.3
}

fn default_gas_limit() -> f64 {
    200_000.0
}

// ============================================================
// Anomaly Engine Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct AnomalyEngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_anomaly_tick")]
    pub tick_secs: u64,
    #[serde(default = "default_z_score_threshold")]
    pub z_score_threshold: f64,
    /// Distinct symbols a user can touch before diversity is flagged.
    #[serde(default = "default_symbol_diversity_limit")]
    pub symbol_diversity_limit: usize,
    /// Probability that a night-hours transaction triggers the night scan.
    #[serde(default = "default_night_sample_probability")]
    pub night_sample_probability: f64,
    #[serde(default = "default_exact_match_threshold")]
    pub exact_match_threshold: usize,
    #[serde(default = "default_cluster_threshold")]
    pub cluster_threshold: usize,
    #[serde(default = "default_dominance_threshold")]
    pub dominance_threshold: usize,
}

impl Default for AnomalyEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 5,
            z_score_threshold: 2.5,
            symbol_diversity_limit: 20,
            night_sample_probability: 0.3,
            exact_match_threshold: 3,
            cluster_threshold: 5,
            dominance_threshold: 30,
        }
    }
}

fn default_anomaly_tick() -> u64 {
    5
}

fn default_z_score_threshold() -> f64 {
    2.5
}

fn default_symbol_diversity_limit() -> usize {
    20
}

fn default_night_sample_probability() -> f64 {
    0.3
}

fn default_exact_match_threshold() -> usize {
    3
}

fn default_cluster_threshold() -> usize {
    5
}

fn default_dominance_threshold() -> usize {
    30
}

// ============================================================
// Fraud Engine Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct FraudEngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_fraud_tick")]
    pub tick_secs: u64,
    #[serde(default = "default_rapid_threshold")]
    pub rapid_threshold: i64,
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: usize,
    #[serde(default = "default_login_window_secs")]
    pub login_window_secs: i64,
    #[serde(default = "default_device_history_cap")]
    pub device_history_cap: usize,
    #[serde(default = "default_bulk_pattern_threshold")]
    pub bulk_pattern_threshold: usize,
    #[serde(default = "default_high_activity_wallet")]
    pub high_activity_wallet_threshold: i64,
}

impl Default for FraudEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 15,
            rapid_threshold: 3,
            max_login_attempts: 5,
            login_window_secs: 15 * 60,
            device_history_cap: 50,
            bulk_pattern_threshold: 20,
            high_activity_wallet_threshold: 1000,
        }
    }
}

fn default_fraud_tick() -> u64 {
    15
}

fn default_rapid_threshold() -> i64 {
    3
}

fn default_max_login_attempts() -> usize {
    5
}

fn default_login_window_secs() -> i64 {
    15 * 60
}

fn default_device_history_cap() -> usize {
    50
}

fn default_bulk_pattern_threshold() -> usize {
    20
}

fn default_high_activity_wallet() -> i64 {
    1000
}

// ============================================================
// Price Manipulation Engine Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ManipulationEngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_manipulation_tick")]
    pub tick_secs: u64,
    /// Price points kept per symbol pair.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_volatility_pct")]
    pub volatility_pct: f64,
    #[serde(default = "default_volatility_window_secs")]
    pub volatility_window_secs: i64,
    /// Monotonic moves among the last 10 entries that count as a pump/dump.
    #[serde(default = "default_monotonic_threshold")]
    pub monotonic_threshold: usize,
    #[serde(default = "default_volume_spike_multiplier")]
    pub volume_spike_multiplier: f64,
    #[serde(default = "default_pump_range_pct")]
    pub pump_range_pct: f64,
    #[serde(default = "default_pump_wallet_ratio")]
    pub pump_wallet_ratio: f64,
    #[serde(default = "default_wash_trade_threshold")]
    pub wash_trade_threshold: usize,
}

impl Default for ManipulationEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 10,
            window_size: 100,
            volatility_pct: 10.0,
            volatility_window_secs: 30,
            monotonic_threshold: 8,
            volume_spike_multiplier: 5.0,
            pump_range_pct: 15.0,
            pump_wallet_ratio: 2.0,
            wash_trade_threshold: 5,
        }
    }
}

fn default_manipulation_tick() -> u64 {
    10
}

fn default_window_size() -> usize {
    100
}

fn default_volatility_pct() -> f64 {
    10.0
}

fn default_volatility_window_secs() -> i64 {
    30
}

fn default_monotonic_threshold() -> usize {
    8
}

fn default_volume_spike_multiplier() -> f64 {
    5.0
}

fn default_pump_range_pct() -> f64 {
    15.0
}

fn default_pump_wallet_ratio() -> f64 {
    2.0
}

fn default_wash_trade_threshold() -> usize {
    5
}

// ============================================================
// DDoS Gate Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gate_tick")]
    pub tick_secs: u64,
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: usize,
    #[serde(default = "default_max_requests_per_endpoint")]
    pub max_requests_per_endpoint: usize,
    #[serde(default = "default_scanner_endpoint_threshold")]
    pub scanner_endpoint_threshold: usize,
    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: i64,
    /// Fraction of special characters in a field before it is flagged.
    #[serde(default = "default_special_char_ratio")]
    pub special_char_ratio: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 10,
            max_requests_per_minute: 100,
            max_requests_per_endpoint: 30,
            scanner_endpoint_threshold: 20,
            block_duration_secs: 60 * 60,
            special_char_ratio: 0.2,
        }
    }
}

fn default_gate_tick() -> u64 {
    10
}

fn default_max_requests_per_minute() -> usize {
    100
}

fn default_max_requests_per_endpoint() -> usize {
    30
}

fn default_scanner_endpoint_threshold() -> usize {
    20
}

fn default_block_duration_secs() -> i64 {
    60 * 60
}

fn default_special_char_ratio() -> f64 {
    0.2
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre::eyre!("database.url must be set"));
        }
        if !(0.0..=1.0).contains(&self.anomaly.night_sample_probability) {
            return Err(eyre::eyre!(
                "anomaly.night_sample_probability must be between 0 and 1, got {}",
                self.anomaly.night_sample_probability
            ));
        }
        if self.validation.hard_reject_score > 100 {
            return Err(eyre::eyre!(
                "validation.hard_reject_score cannot exceed 100, got {}",
                self.validation.hard_reject_score
            ));
        }
        if self.gate.block_duration_secs <= 0 {
            return Err(eyre::eyre!("gate.block_duration_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[database]
url = "postgres://localhost/tradewatch"
max_connections = 5

[anomaly]
tick_secs = 2
z_score_threshold = 3.0

[gate]
max_requests_per_minute = 50
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.anomaly.tick_secs, 2);
        assert_eq!(config.anomaly.z_score_threshold, 3.0);
        assert_eq!(config.anomaly.symbol_diversity_limit, 20); // default
        assert_eq!(config.gate.max_requests_per_minute, 50);
        assert_eq!(config.gate.block_duration_secs, 3600); // default
        assert_eq!(config.fraud.tick_secs, 15); // default
        assert_eq!(config.validation.hard_reject_score, 80); // default
    }

    #[test]
    fn test_validate_empty_database_url() {
        let mut config: Config = toml::from_str("[database]\nurl = \"x\"").unwrap();
        config.database.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_sample_probability_range() {
        let mut config: Config =
            toml::from_str("[database]\nurl = \"postgres://localhost/t\"").unwrap();
        config.anomaly.night_sample_probability = 1.5;
        assert!(config.validate().is_err());
    }
}
