//! Per-cycle trading parameters keyed by market regime.
//!
//! Regime classification itself is an external collaborator; the core only
//! consumes the resulting parameter bundle, re-read every cycle so a source
//! may hot-reload or switch regimes underneath the workers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Externally supplied market classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    Bull,
    Bear,
    Range,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketRegime::Bull => write!(f, "BULL"),
            MarketRegime::Bear => write!(f, "BEAR"),
            MarketRegime::Range => write!(f, "RANGE"),
        }
    }
}

impl std::str::FromStr for MarketRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bull" => Ok(MarketRegime::Bull),
            "bear" => Ok(MarketRegime::Bear),
            "range" => Ok(MarketRegime::Range),
            _ => Err(format!(
                "Unknown market regime: {}. Valid options: bull, bear, range",
                s
            )),
        }
    }
}

/// One regime's acquisition parameters.
#[derive(Debug, Clone)]
pub struct RegimeParams {
    /// Added to the reference price for the buy leg (usually <= 0)
    pub buy_offset: Decimal,
    /// Added to the reference price for the sell target (usually >= 0)
    pub sell_offset: Decimal,
    /// Fraction of the available quote balance committed per pair
    pub capital_fraction: Decimal,
    /// Delay between acquisition cycles
    pub pacing: Duration,
    /// Whether new pairs may be opened in this regime
    pub enabled: bool,
}

/// The bundle the workers consume each cycle.
#[derive(Debug, Clone)]
pub struct CycleParams {
    pub regime: MarketRegime,
    pub params: RegimeParams,
}

#[derive(Error, Debug)]
pub enum ParamError {
    #[error("no parameters configured for regime {0}")]
    MissingRegime(MarketRegime),
}

/// Source of per-cycle parameters. Implementations may reclassify the market
/// or reload configuration between calls; callers re-read every cycle.
#[async_trait]
pub trait ParamSource: Send + Sync {
    async fn current(&self) -> Result<CycleParams, ParamError>;
}

/// Parameter source backed by a static per-regime table.
///
/// The active regime can be switched at runtime (`set_regime`), which is how
/// an external classifier plugs in without the workers noticing.
pub struct ConfigParamSource {
    table: HashMap<MarketRegime, RegimeParams>,
    active: RwLock<MarketRegime>,
}

impl ConfigParamSource {
    pub fn new(table: HashMap<MarketRegime, RegimeParams>, active: MarketRegime) -> Self {
        Self {
            table,
            active: RwLock::new(active),
        }
    }

    /// Switch the active regime for subsequent cycles.
    pub fn set_regime(&self, regime: MarketRegime) {
        let mut active = self.active.write().expect("param source poisoned");
        *active = regime;
    }

    pub fn regime(&self) -> MarketRegime {
        *self.active.read().expect("param source poisoned")
    }
}

#[async_trait]
impl ParamSource for ConfigParamSource {
    async fn current(&self) -> Result<CycleParams, ParamError> {
        let regime = self.regime();
        let params = self
            .table
            .get(&regime)
            .cloned()
            .ok_or(ParamError::MissingRegime(regime))?;
        Ok(CycleParams { regime, params })
    }
}
