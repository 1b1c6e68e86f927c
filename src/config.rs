use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub session: SessionConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub rolling: RollingConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Backtest,
    Paper,
    Rolling,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub mode: Mode,
    pub strategy: String,
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default = "default_num_markets")]
    pub num_markets: usize,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: i64,
}

impl SessionConfig {
    /// Instance name used in the snapshot filename. Falls back to the
    /// strategy name when not configured.
    pub fn instance(&self) -> String {
        self.instance_name
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.strategy.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,
    #[serde(default = "default_max_exposure_fraction")]
    pub max_exposure_fraction: f64,
    #[serde(default = "default_min_trade_size")]
    pub min_trade_size: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_fraction: default_max_position_fraction(),
            max_exposure_fraction: default_max_exposure_fraction(),
            min_trade_size: default_min_trade_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
    /// CLOB history window ("max" = everything available).
    #[serde(default = "default_history_interval")]
    pub history_interval: String,
    /// Bar size in minutes. 720 = 12-hour bars.
    #[serde(default = "default_history_fidelity")]
    pub history_fidelity_minutes: u32,
    /// Gamma listing sort order; most-traded markets have the most history.
    #[serde(default = "default_sort_field")]
    pub sort_field: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            history_interval: default_history_interval(),
            history_fidelity_minutes: default_history_fidelity(),
            sort_field: default_sort_field(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BacktestConfig {
    /// Skip the API fetch and load markets/prices from the data dir cache.
    #[serde(default)]
    pub use_cache: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Ticks between watch-list refreshes (12 ticks x 5 min = hourly).
    #[serde(default = "default_refresh_interval_ticks")]
    pub refresh_interval_ticks: u64,
    #[serde(default = "default_max_watched_markets")]
    pub max_watched_markets: usize,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            refresh_interval_ticks: default_refresh_interval_ticks(),
            max_watched_markets: default_max_watched_markets(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollingConfig {
    #[serde(default = "default_rolling_poll_secs")]
    pub poll_interval_secs: u64,
    /// Length of one market interval in seconds (5-minute markets = 300).
    #[serde(default = "default_rolling_interval_secs")]
    pub interval_secs: i64,
    /// Force-exit any open position this many seconds before market close.
    #[serde(default = "default_exit_buffer_secs")]
    pub exit_buffer_secs: i64,
    #[serde(default = "default_slug_prefix")]
    pub slug_prefix: String,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_rolling_poll_secs(),
            interval_secs: default_rolling_interval_secs(),
            exit_buffer_secs: default_exit_buffer_secs(),
            slug_prefix: default_slug_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StrategiesConfig {
    #[serde(default)]
    pub momentum: MomentumConfig,
    #[serde(default)]
    pub mean_reversion: MeanReversionConfig,
    #[serde(default)]
    pub rsi: RsiConfig,
    #[serde(default)]
    pub random_baseline: RandomBaselineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MomentumConfig {
    #[serde(default = "default_momentum_lookback")]
    pub lookback: usize,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback: default_momentum_lookback(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeanReversionConfig {
    #[serde(default = "default_mr_window")]
    pub window: usize,
    #[serde(default = "default_mr_z_threshold")]
    pub z_threshold: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            window: default_mr_window(),
            z_threshold: default_mr_z_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RsiConfig {
    #[serde(default = "default_rsi_period")]
    pub period: usize,
    #[serde(default = "default_rsi_oversold")]
    pub oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub overbought: f64,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            period: default_rsi_period(),
            oversold: default_rsi_oversold(),
            overbought: default_rsi_overbought(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomBaselineConfig {
    #[serde(default = "default_buy_prob")]
    pub buy_prob: f64,
    #[serde(default = "default_sell_prob")]
    pub sell_prob: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for RandomBaselineConfig {
    fn default() -> Self {
        Self {
            buy_prob: default_buy_prob(),
            sell_prob: default_sell_prob(),
            seed: default_seed(),
        }
    }
}

fn default_starting_cash() -> f64 {
    1000.0
}
fn default_fee_rate() -> f64 {
    0.002
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_num_markets() -> usize {
    5
}
fn default_duration_minutes() -> i64 {
    60
}
fn default_max_position_fraction() -> f64 {
    0.20
}
fn default_max_exposure_fraction() -> f64 {
    0.80
}
fn default_min_trade_size() -> f64 {
    1.0
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_delay_secs() -> f64 {
    2.0
}
fn default_history_interval() -> String {
    "max".to_string()
}
fn default_history_fidelity() -> u32 {
    720
}
fn default_sort_field() -> String {
    "volume24hr".to_string()
}
fn default_poll_interval_secs() -> u64 {
    300
}
fn default_refresh_interval_ticks() -> u64 {
    12
}
fn default_max_watched_markets() -> usize {
    50
}
fn default_rolling_poll_secs() -> u64 {
    30
}
fn default_rolling_interval_secs() -> i64 {
    300
}
fn default_exit_buffer_secs() -> i64 {
    30
}
fn default_slug_prefix() -> String {
    "btc-updown-5m".to_string()
}
fn default_momentum_lookback() -> usize {
    5
}
fn default_mr_window() -> usize {
    20
}
fn default_mr_z_threshold() -> f64 {
    1.5
}
fn default_rsi_period() -> usize {
    14
}
fn default_rsi_oversold() -> f64 {
    30.0
}
fn default_rsi_overbought() -> f64 {
    70.0
}
fn default_buy_prob() -> f64 {
    0.10
}
fn default_sell_prob() -> f64 {
    0.10
}
fn default_seed() -> u64 {
    42
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }
}

/// API endpoints, overridable via environment (.env supported).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub gamma_url: String,
    pub clob_url: String,
}

impl EnvConfig {
    pub fn load() -> Self {
        dotenv::dotenv().ok();

        Self {
            gamma_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| "https://gamma-api.polymarket.com".to_string()),
            clob_url: std::env::var("CLOB_API_URL")
                .unwrap_or_else(|_| "https://clob.polymarket.com".to_string()),
        }
    }
}
