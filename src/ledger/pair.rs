//! Core types for the order-pair ledger.
//!
//! One `OrderPair` tracks a single buy-low/sell-high cycle attempt from
//! placement through fill to completion.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::params::MarketRegime;
use crate::types::OrderRef;

/// Stable pair identifier, assigned by the ledger at creation, never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PairId(u64);

impl PairId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order-pair lifecycle states.
///
/// Strictly forward in the listed order; `Failed` is terminal and reachable
/// from any non-terminal state (observed cancellation or retry exhaustion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PairStatus {
    /// Buy order submitted, awaiting fill confirmation
    Opening,
    /// Buy leg confirmed filled, sell order not yet placed
    AwaitingSell,
    /// Sell order resting on the book
    Closing,
    /// Sell leg filled, realized gain recorded
    Complete,
    /// Cancelled, under-filled, or retries exhausted
    Failed,
}

impl PairStatus {
    /// Position in the forward progression. `Failed` sits outside it.
    fn rank(&self) -> u8 {
        match self {
            Self::Opening => 0,
            Self::AwaitingSell => 1,
            Self::Closing => 2,
            Self::Complete => 3,
            Self::Failed => 4,
        }
    }

    /// Returns true if no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Returns true if `next` is a legal move from this state.
    pub fn allows(&self, next: PairStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            PairStatus::Failed => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl std::fmt::Display for PairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "Opening"),
            Self::AwaitingSell => write!(f, "AwaitingSell"),
            Self::Closing => write!(f, "Closing"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl std::str::FromStr for PairStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opening" => Ok(Self::Opening),
            "awaitingsell" | "awaiting-sell" => Ok(Self::AwaitingSell),
            "closing" => Ok(Self::Closing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!(
                "Unknown status: {}. Valid: opening, awaiting-sell, closing, complete, failed",
                s
            )),
        }
    }
}

/// One buy leg and its associated sell leg, tracked as a single record.
///
/// `quantity_requested` is what the acquisition side asked for;
/// `quantity_actual` is the exchange-confirmed, fee-adjusted quantity and is
/// authoritative for every operation after the buy fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPair {
    pub id: PairId,
    pub status: PairStatus,
    pub symbol: String,
    /// Regime classification active at creation. Informational, immutable.
    pub market_regime: MarketRegime,
    pub buy_price: Decimal,
    /// Target at creation; overwritten once with the submitted price when the
    /// sell leg is placed.
    pub sell_price: Decimal,
    pub quantity_requested: Decimal,
    pub quantity_actual: Option<Decimal>,
    pub buy_order_ref: Option<OrderRef>,
    pub sell_order_ref: Option<OrderRef>,
    pub created_at: DateTime<Utc>,
    pub buy_filled_at: Option<DateTime<Utc>>,
    pub sell_placed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub realized_gain_quote: Option<Decimal>,
    pub realized_gain_percent: Option<Decimal>,
}

impl OrderPair {
    /// Check if the pair is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Quote cost of the buy leg, from the authoritative quantity.
    ///
    /// `None` until the buy fill has been reconciled.
    pub fn buy_cost(&self) -> Option<Decimal> {
        self.quantity_actual.map(|q| q * self.buy_price)
    }
}

/// Field values for a new pair, supplied by the acquisition side.
///
/// The ledger assigns the id, stamps `created_at`, and sets the status to
/// `Opening`.
#[derive(Debug, Clone)]
pub struct PairDraft {
    pub symbol: String,
    pub market_regime: MarketRegime,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub quantity_requested: Decimal,
    pub buy_order_ref: OrderRef,
}

/// Pure description of a status transition's new field values.
///
/// Applied atomically by `Ledger::transition` after the compare-and-set
/// check. Constructors cover the legal transitions; fields left `None` are
/// untouched.
#[derive(Debug, Clone)]
pub struct PairUpdate {
    pub status: PairStatus,
    pub quantity_actual: Option<Decimal>,
    pub sell_order_ref: Option<OrderRef>,
    pub sell_price: Option<Decimal>,
    pub buy_filled_at: Option<DateTime<Utc>>,
    pub sell_placed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub realized_gain_quote: Option<Decimal>,
    pub realized_gain_percent: Option<Decimal>,
}

impl PairUpdate {
    fn bare(status: PairStatus) -> Self {
        Self {
            status,
            quantity_actual: None,
            sell_order_ref: None,
            sell_price: None,
            buy_filled_at: None,
            sell_placed_at: None,
            completed_at: None,
            realized_gain_quote: None,
            realized_gain_percent: None,
        }
    }

    /// Opening -> AwaitingSell: record the exchange-confirmed quantity.
    #[must_use]
    pub fn buy_filled(quantity_actual: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            quantity_actual: Some(quantity_actual),
            buy_filled_at: Some(now),
            ..Self::bare(PairStatus::AwaitingSell)
        }
    }

    /// AwaitingSell -> Closing: record the resting sell order.
    #[must_use]
    pub fn sell_placed(order_ref: OrderRef, sell_price: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            sell_order_ref: Some(order_ref),
            sell_price: Some(sell_price),
            sell_placed_at: Some(now),
            ..Self::bare(PairStatus::Closing)
        }
    }

    /// Closing -> Complete: record the realized gain.
    #[must_use]
    pub fn completed(
        gain_quote: Decimal,
        gain_percent: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            realized_gain_quote: Some(gain_quote),
            realized_gain_percent: Some(gain_percent),
            completed_at: Some(now),
            ..Self::bare(PairStatus::Complete)
        }
    }

    /// Any non-terminal state -> Failed.
    #[must_use]
    pub fn failed() -> Self {
        Self::bare(PairStatus::Failed)
    }
}
