//! Exchange Abstraction Layer
//!
//! The narrow contract the order-pair engine needs from a venue. A live
//! venue wrapper implements `ExchangeApi` out of tree; the built-in paper
//! venue (`paper`) implements it in-process for operation and tests.

pub mod paper;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

pub use crate::types::{OrderRef, OrderSide};
pub use paper::PaperExchange;

/// An exchange-confirmed execution of part or all of an order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    /// Executed price per unit, in quote currency
    pub price: Decimal,
    /// Executed quantity, net of any base-denominated fee
    pub quantity: Decimal,
    pub fee_amount: Decimal,
    pub fee_asset: String,
    pub timestamp: DateTime<Utc>,
}

/// Errors surfaced by venue calls.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// Network failure, timeout, or rate limit. Retried next cycle; no state
    /// is mutated on this path.
    #[error("transient exchange error: {0}")]
    Transient(String),

    /// Not enough balance to place the order. Expected while the other leg
    /// settles; deferred, not escalated.
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    /// The venue refused the order outright (invalid parameters, halted
    /// market).
    #[error("order rejected: {0}")]
    Rejected(String),
}

impl ExchangeError {
    /// True for failures that the next cycle may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Venue contract consumed by the workers.
///
/// `available_balance` reports available = total - held by open orders.
/// Fill history is authoritative: reconciliation trusts it over the open
/// order set whenever the two disagree.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<OrderRef, ExchangeError>;

    async fn open_orders(&self) -> Result<HashSet<OrderRef>, ExchangeError>;

    async fn fills(
        &self,
        order_ref: &OrderRef,
        since: DateTime<Utc>,
    ) -> Result<Vec<Fill>, ExchangeError>;

    async fn reference_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;
}
