//! Environment-driven configuration.
//!
//! Every knob comes from environment variables (loaded from `.env` by the
//! binary before parsing); `Default` is the configuration of an empty
//! environment. Numeric values are validated on load so the workers never
//! see a malformed tolerance or interval.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::params::{MarketRegime, RegimeParams};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("{key} must be {constraint}, got {value}")]
    OutOfRange {
        key: String,
        constraint: &'static str,
        value: String,
    },
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Venue symbol for the traded market (e.g. "BTC/USDC")
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,

    /// Ledger snapshot file
    pub ledger_file: String,

    /// Orders below this quote value are not placed
    pub min_order_value: Decimal,
    /// Decimal places the venue accepts for base quantities
    pub quantity_scale: u32,
    /// Fraction of `quantity_actual` the base balance may fall short by
    pub balance_tolerance: Decimal,
    /// Fraction of the requested quantity that counts as a full fill
    pub fill_tolerance: Decimal,

    /// Disposal scan interval
    pub sell_check_interval: Duration,
    /// Reconciliation scan interval
    pub sync_interval: Duration,
    /// Fill-history lookback window
    pub fill_lookback: Duration,
    /// Cool-down before a failed pair is retried
    pub sell_retry_cooldown: Duration,
    /// Consecutive disposal failures before a pair is written off as Failed
    pub max_sell_attempts: u32,

    /// Regime whose parameter table is active at startup
    pub market_regime: MarketRegime,
    pub regimes: HashMap<MarketRegime, RegimeParams>,

    /// Paper venue seeds
    pub paper_quote_balance: Decimal,
    pub paper_initial_price: Decimal,
    /// Maker fee fraction applied by the paper venue
    pub maker_fee: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        let mut regimes = HashMap::new();
        regimes.insert(
            MarketRegime::Bull,
            RegimeParams {
                buy_offset: dec!(0),
                sell_offset: dec!(1000),
                capital_fraction: dec!(0.03),
                pacing: Duration::from_secs(600),
                enabled: true,
            },
        );
        regimes.insert(
            MarketRegime::Bear,
            RegimeParams {
                buy_offset: dec!(-1000),
                sell_offset: dec!(0),
                capital_fraction: dec!(0.03),
                pacing: Duration::from_secs(600),
                enabled: false,
            },
        );
        regimes.insert(
            MarketRegime::Range,
            RegimeParams {
                buy_offset: dec!(-400),
                sell_offset: dec!(400),
                capital_fraction: dec!(0.05),
                pacing: Duration::from_secs(600),
                enabled: true,
            },
        );

        Self {
            symbol: "BTC/USDC".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDC".to_string(),
            ledger_file: "pair_ledger.json".to_string(),
            min_order_value: dec!(10),
            quantity_scale: 8,
            balance_tolerance: dec!(0.001),
            fill_tolerance: dec!(0.99),
            sell_check_interval: Duration::from_secs(30),
            sync_interval: Duration::from_secs(300),
            fill_lookback: Duration::from_secs(24 * 3600),
            sell_retry_cooldown: Duration::from_secs(300),
            max_sell_attempts: 12,
            market_regime: MarketRegime::Range,
            regimes,
            paper_quote_balance: dec!(10000),
            paper_initial_price: dec!(100000),
            maker_fee: dec!(0.0004),
        }
    }
}

impl TradingConfig {
    /// Load from the process environment. Missing variables fall back to the
    /// `Default` values; present-but-malformed ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();

        let regime_table = |prefix: &str, d: &RegimeParams| -> Result<RegimeParams, ConfigError> {
            Ok(RegimeParams {
                buy_offset: parse_env(&format!("{}_BUY_OFFSET", prefix), d.buy_offset)?,
                sell_offset: parse_env(&format!("{}_SELL_OFFSET", prefix), d.sell_offset)?,
                capital_fraction: percent_env(
                    &format!("{}_PERCENT", prefix),
                    d.capital_fraction * Decimal::ONE_HUNDRED,
                )?,
                pacing: minutes_env(
                    &format!("{}_TIME_PAUSE", prefix),
                    d.pacing.as_secs() / 60,
                )?,
                enabled: bool_env(&format!("{}_BUY_ENABLED", prefix), d.enabled)?,
            })
        };

        let mut regimes = HashMap::new();
        regimes.insert(
            MarketRegime::Bull,
            regime_table("BULL", &d.regimes[&MarketRegime::Bull])?,
        );
        regimes.insert(
            MarketRegime::Bear,
            regime_table("BEAR", &d.regimes[&MarketRegime::Bear])?,
        );
        regimes.insert(
            MarketRegime::Range,
            regime_table("RANGE", &d.regimes[&MarketRegime::Range])?,
        );

        let config = Self {
            symbol: string_env("SYMBOL", &d.symbol),
            base_asset: string_env("BASE_ASSET", &d.base_asset),
            quote_asset: string_env("QUOTE_ASSET", &d.quote_asset),
            ledger_file: string_env("LEDGER_FILE", &d.ledger_file),
            min_order_value: parse_env("MIN_ORDER_VALUE_USDC", d.min_order_value)?,
            quantity_scale: parse_env("QUANTITY_SCALE", d.quantity_scale)?,
            balance_tolerance: parse_env("BALANCE_TOLERANCE", d.balance_tolerance)?,
            fill_tolerance: parse_env("FILL_TOLERANCE", d.fill_tolerance)?,
            sell_check_interval: seconds_env(
                "SELL_CHECK_INTERVAL_SECONDS",
                d.sell_check_interval.as_secs(),
            )?,
            sync_interval: seconds_env("SYNC_INTERVAL_SECONDS", d.sync_interval.as_secs())?,
            fill_lookback: hours_env("FILL_LOOKBACK_HOURS", d.fill_lookback.as_secs() / 3600)?,
            sell_retry_cooldown: seconds_env(
                "SELL_RETRY_COOLDOWN_SECONDS",
                d.sell_retry_cooldown.as_secs(),
            )?,
            max_sell_attempts: parse_env("MAX_SELL_ATTEMPTS", d.max_sell_attempts)?,
            market_regime: parse_env("MARKET_REGIME", d.market_regime)?,
            regimes,
            paper_quote_balance: parse_env("PAPER_QUOTE_BALANCE", d.paper_quote_balance)?,
            paper_initial_price: parse_env("PAPER_INITIAL_PRICE", d.paper_initial_price)?,
            maker_fee: percent_env("MAKER_FEE", d.maker_fee * Decimal::ONE_HUNDRED)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.balance_tolerance < Decimal::ZERO || self.balance_tolerance >= Decimal::ONE {
            return Err(ConfigError::OutOfRange {
                key: "BALANCE_TOLERANCE".to_string(),
                constraint: "in [0, 1)",
                value: self.balance_tolerance.to_string(),
            });
        }
        if self.fill_tolerance <= Decimal::ZERO || self.fill_tolerance > Decimal::ONE {
            return Err(ConfigError::OutOfRange {
                key: "FILL_TOLERANCE".to_string(),
                constraint: "in (0, 1]",
                value: self.fill_tolerance.to_string(),
            });
        }
        if self.min_order_value <= Decimal::ZERO {
            return Err(ConfigError::OutOfRange {
                key: "MIN_ORDER_VALUE_USDC".to_string(),
                constraint: "positive",
                value: self.min_order_value.to_string(),
            });
        }
        for (regime, params) in &self.regimes {
            if params.capital_fraction <= Decimal::ZERO
                || params.capital_fraction >= Decimal::ONE
            {
                return Err(ConfigError::OutOfRange {
                    key: format!("{}_PERCENT", regime),
                    constraint: "in (0, 100) percent",
                    value: (params.capital_fraction * Decimal::ONE_HUNDRED).to_string(),
                });
            }
        }
        Ok(())
    }
}

fn string_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Accepts true/false, 1/0, yes/no.
fn bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
                reason: "expected true/false".to_string(),
            }),
        },
        Err(_) => Ok(default),
    }
}

/// Percent figure in the environment, fraction in the config (3 -> 0.03).
fn percent_env(key: &str, default_percent: Decimal) -> Result<Decimal, ConfigError> {
    let percent: Decimal = parse_env(key, default_percent)?;
    Ok(percent / Decimal::ONE_HUNDRED)
}

fn seconds_env(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_env(key, default)?;
    Ok(Duration::from_secs(secs))
}

fn minutes_env(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let minutes: u64 = parse_env(key, default)?;
    Ok(Duration::from_secs(minutes * 60))
}

fn hours_env(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let hours: u64 = parse_env(key, default)?;
    Ok(Duration::from_secs(hours * 3600))
}
