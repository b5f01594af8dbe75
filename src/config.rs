use crate::error::EngineError;
use crate::exchange::paper::PaperConfig;
use crate::models::TradeType;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/spotbot.toml";
const ENV_PREFIX: &str = "SPOTBOT";

/// Everything loaded from the config file and environment
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Symbol used by the prediction feed (e.g. "btc")
    pub symbol: String,
    /// Exchange pair (e.g. "BTCUSDT")
    pub trading_pair: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default = "default_trade_type")]
    pub trade_type: TradeType,
    /// Order amount; zero means "use the signal's suggested amount"
    #[serde(default)]
    pub amount: Decimal,
    /// Minutes a call must age before the bot enters
    #[serde(default)]
    pub buy_delay: i64,
    #[serde(default = "default_bid_retry")]
    pub bid_retry: u32,
    #[serde(default = "default_sell_retry")]
    pub sell_retry: u32,
    #[serde(default = "default_sell_index")]
    pub sell_index: usize,
    /// Minutes after which an open position is force-sold
    #[serde(default = "default_elapsed_time_exp")]
    pub elapsed_time_exp: i64,
    #[serde(default = "default_book_depth")]
    pub book_depth: usize,
    #[serde(default = "default_max_sell_attempts")]
    pub max_sell_attempts: u32,
    #[serde(default = "default_max_sell_adjustments")]
    pub max_sell_adjustments: u32,
    #[serde(default)]
    pub strict_step_size: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsConfig {
    #[serde(default = "default_true")]
    pub run_forever: bool,
    #[serde(default = "default_sleep_buffer_min")]
    pub sleep_buffer_min: f64,
    #[serde(default = "default_sleep_buffer_max")]
    pub sleep_buffer_max: f64,
    #[serde(default = "default_back_off_start")]
    pub back_off_start: f64,
    #[serde(default = "default_back_off_limit")]
    pub back_off_limit: f64,
    #[serde(default)]
    pub debug: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            run_forever: true,
            sleep_buffer_min: default_sleep_buffer_min(),
            sleep_buffer_max: default_sleep_buffer_max(),
            back_off_start: default_back_off_start(),
            back_off_limit: default_back_off_limit(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    /// Snapshots kept per symbol
    #[serde(default = "default_redis_history")]
    pub history: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            history: default_redis_history(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_feed_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_feed_interval")]
    pub interval_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            requests_per_minute: default_feed_rpm(),
            interval_secs: default_feed_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Paper,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_exchange_kind")]
    pub kind: ExchangeKind,
    #[serde(default)]
    pub paper: PaperConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            kind: ExchangeKind::Paper,
            paper: PaperConfig::default(),
        }
    }
}

fn default_trade_type() -> TradeType {
    TradeType::Spot
}
fn default_bid_retry() -> u32 {
    5
}
fn default_sell_retry() -> u32 {
    20
}
fn default_sell_index() -> usize {
    9
}
fn default_elapsed_time_exp() -> i64 {
    60
}
fn default_book_depth() -> usize {
    10
}
fn default_max_sell_attempts() -> u32 {
    50
}
fn default_max_sell_adjustments() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_sleep_buffer_min() -> f64 {
    0.01
}
fn default_sleep_buffer_max() -> f64 {
    5.0
}
fn default_back_off_start() -> f64 {
    1.0
}
fn default_back_off_limit() -> f64 {
    100.0
}
fn default_redis_history() -> usize {
    500
}
fn default_feed_url() -> String {
    "https://crypto-price-prediction.com/prediction_data/pred_table.csv".to_string()
}
fn default_feed_rpm() -> u32 {
    6
}
fn default_feed_interval() -> u64 {
    300
}
fn default_exchange_kind() -> ExchangeKind {
    ExchangeKind::Paper
}

impl AppConfig {
    /// Load from an optional TOML file, then `SPOTBOT__SECTION__KEY` env overrides
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Read-only engine view of this config
    pub fn engine(&self) -> Result<EngineConfig, EngineError> {
        let engine = EngineConfig {
            symbol: self.trading.symbol.clone(),
            trading_pair: self.trading.trading_pair.clone(),
            base_asset: self.trading.base_asset.clone(),
            quote_asset: self.trading.quote_asset.clone(),
            trade_type: self.trading.trade_type,
            amount: self.trading.amount,
            buy_delay: self.trading.buy_delay,
            bid_retry: self.trading.bid_retry,
            sell_retry: self.trading.sell_retry,
            sell_index: self.trading.sell_index,
            elapsed_time_exp: self.trading.elapsed_time_exp,
            book_depth: self.trading.book_depth,
            max_sell_attempts: self.trading.max_sell_attempts,
            max_sell_adjustments: self.trading.max_sell_adjustments,
            strict_step_size: self.trading.strict_step_size,
            run_forever: self.settings.run_forever,
            sleep_buffer_min: Duration::from_secs_f64(self.settings.sleep_buffer_min.max(0.0)),
            sleep_buffer_max: Duration::from_secs_f64(self.settings.sleep_buffer_max.max(0.0)),
            back_off_start: Duration::from_secs_f64(self.settings.back_off_start.max(0.0)),
            back_off_limit: Duration::from_secs_f64(self.settings.back_off_limit.max(0.0)),
        };
        engine.validate()?;
        Ok(engine)
    }
}

/// Connection URL with any password masked, for log lines
pub fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}

/// Immutable settings handed to every engine component at construction
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: String,
    pub trading_pair: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub trade_type: TradeType,
    pub amount: Decimal,
    pub buy_delay: i64,
    pub bid_retry: u32,
    pub sell_retry: u32,
    pub sell_index: usize,
    pub elapsed_time_exp: i64,
    pub book_depth: usize,
    pub max_sell_attempts: u32,
    pub max_sell_adjustments: u32,
    pub strict_step_size: bool,
    pub run_forever: bool,
    pub sleep_buffer_min: Duration,
    pub sleep_buffer_max: Duration,
    pub back_off_start: Duration,
    pub back_off_limit: Duration,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.trade_type != TradeType::Spot {
            return Err(EngineError::Config(format!(
                "trade type '{}' has no lifecycle engine, only 'spot' is supported",
                self.trade_type
            )));
        }
        if self.bid_retry == 0 || self.sell_retry == 0 {
            return Err(EngineError::Config(
                "bid_retry and sell_retry must be at least 1".to_string(),
            ));
        }
        if self.max_sell_attempts == 0 {
            return Err(EngineError::Config(
                "max_sell_attempts must be at least 1".to_string(),
            ));
        }
        if self.sleep_buffer_min > self.sleep_buffer_max {
            return Err(EngineError::Config(format!(
                "sleep_buffer_min ({:?}) exceeds sleep_buffer_max ({:?})",
                self.sleep_buffer_min, self.sleep_buffer_max
            )));
        }
        if self.amount.is_sign_negative() {
            return Err(EngineError::Config("amount must not be negative".to_string()));
        }
        Ok(())
    }
}
