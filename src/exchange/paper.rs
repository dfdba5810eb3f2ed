//! Simulated in-process venue.
//!
//! Resting limit orders fill when the reference price crosses them. Maker
//! fees follow spot-venue convention: buy fills are reported net of a
//! base-denominated fee, sell fills carry a quote-denominated fee deducted
//! from proceeds. Deterministic and fully controllable, which is what the
//! run command and the integration tests need.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ExchangeApi, ExchangeError, Fill};
use crate::types::{OrderRef, OrderSide};

#[derive(Debug, Clone)]
struct RestingOrder {
    side: OrderSide,
    price: Decimal,
    quantity: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    reference_price: Decimal,
    /// Available balances (held amounts are tracked separately)
    balances: HashMap<String, Decimal>,
    held: HashMap<String, Decimal>,
    resting: HashMap<OrderRef, RestingOrder>,
    fills: HashMap<OrderRef, Vec<Fill>>,
    next_ref: u64,
}

/// In-process limit-order venue for one symbol.
pub struct PaperExchange {
    base_asset: String,
    quote_asset: String,
    /// Maker fee as a fraction (0.0004 = 0.04%)
    maker_fee: Decimal,
    state: RwLock<PaperState>,
}

impl PaperExchange {
    pub fn new(
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        initial_price: Decimal,
        maker_fee: Decimal,
    ) -> Self {
        let state = PaperState {
            reference_price: initial_price,
            ..PaperState::default()
        };
        Self {
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            maker_fee,
            state: RwLock::new(state),
        }
    }

    /// Credit an asset's available balance.
    pub async fn deposit(&self, asset: &str, amount: Decimal) {
        let mut state = self.state.write().await;
        *state.balances.entry(asset.to_string()).or_default() += amount;
    }

    /// Move the reference price and fill every resting order it crosses.
    pub async fn tick(&self, price: Decimal) {
        let mut state = self.state.write().await;
        state.reference_price = price;

        let crossed: Vec<OrderRef> = state
            .resting
            .iter()
            .filter(|(_, order)| match order.side {
                OrderSide::Buy => price <= order.price,
                OrderSide::Sell => price >= order.price,
            })
            .map(|(r, _)| r.clone())
            .collect();

        for order_ref in crossed {
            self.execute(&mut state, &order_ref, Decimal::ONE);
        }
    }

    /// Execute `fraction` of a resting order and remove it from the book,
    /// releasing whatever was not executed. Simulates partial fills followed
    /// by cancellation.
    pub async fn fill_fraction(&self, order_ref: &OrderRef, fraction: Decimal) {
        let mut state = self.state.write().await;
        self.execute(&mut state, order_ref, fraction);
    }

    /// Cancel a resting order, releasing its held balance. No fill records.
    pub async fn cancel(&self, order_ref: &OrderRef) {
        let mut state = self.state.write().await;
        if let Some(order) = state.resting.remove(order_ref) {
            match order.side {
                OrderSide::Buy => {
                    let cost = order.price * order.quantity;
                    *state.held.entry(self.quote_asset.clone()).or_default() -= cost;
                    *state.balances.entry(self.quote_asset.clone()).or_default() += cost;
                }
                OrderSide::Sell => {
                    *state.held.entry(self.base_asset.clone()).or_default() -= order.quantity;
                    *state.balances.entry(self.base_asset.clone()).or_default() +=
                        order.quantity;
                }
            }
            debug!(order_ref = %order_ref, "Paper order cancelled");
        }
    }

    /// Fills `fraction` of the order's quantity, removes the order, and
    /// releases the unexecuted remainder. Caller holds the write lock.
    fn execute(&self, state: &mut PaperState, order_ref: &OrderRef, fraction: Decimal) {
        let Some(order) = state.resting.remove(order_ref) else {
            return;
        };

        let executed = order.quantity * fraction;
        let remainder = order.quantity - executed;
        let now = Utc::now();

        match order.side {
            OrderSide::Buy => {
                let full_cost = order.price * order.quantity;
                let spent = order.price * executed;
                *state.held.entry(self.quote_asset.clone()).or_default() -= full_cost;
                *state.balances.entry(self.quote_asset.clone()).or_default() +=
                    full_cost - spent;

                let fee = executed * self.maker_fee;
                let net = executed - fee;
                *state.balances.entry(self.base_asset.clone()).or_default() += net;

                if net > Decimal::ZERO {
                    state.fills.entry(order_ref.clone()).or_default().push(Fill {
                        price: order.price,
                        quantity: net,
                        fee_amount: fee,
                        fee_asset: self.base_asset.clone(),
                        timestamp: now,
                    });
                }
            }
            OrderSide::Sell => {
                *state.held.entry(self.base_asset.clone()).or_default() -= order.quantity;
                *state.balances.entry(self.base_asset.clone()).or_default() += remainder;

                let gross = order.price * executed;
                let fee = gross * self.maker_fee;
                *state.balances.entry(self.quote_asset.clone()).or_default() += gross - fee;

                if executed > Decimal::ZERO {
                    state.fills.entry(order_ref.clone()).or_default().push(Fill {
                        price: order.price,
                        quantity: executed,
                        fee_amount: fee,
                        fee_asset: self.quote_asset.clone(),
                        timestamp: now,
                    });
                }
            }
        }

        debug!(
            order_ref = %order_ref,
            side = %order.side,
            executed = %executed,
            "Paper order executed"
        );
    }
}

#[async_trait]
impl ExchangeApi for PaperExchange {
    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let state = self.state.read().await;
        Ok(state.balances.get(asset).copied().unwrap_or(Decimal::ZERO))
    }

    async fn submit_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<OrderRef, ExchangeError> {
        if price <= Decimal::ZERO || quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "non-positive price or quantity: {} @ {}",
                quantity, price
            )));
        }

        let mut state = self.state.write().await;

        let (asset, needed) = match side {
            OrderSide::Buy => (self.quote_asset.clone(), price * quantity),
            OrderSide::Sell => (self.base_asset.clone(), quantity),
        };
        let available = state.balances.get(&asset).copied().unwrap_or(Decimal::ZERO);
        if available < needed {
            return Err(ExchangeError::InsufficientBalance { needed, available });
        }
        *state.balances.entry(asset.clone()).or_default() -= needed;
        *state.held.entry(asset).or_default() += needed;

        state.next_ref += 1;
        let order_ref = OrderRef::new(format!("paper-{}", state.next_ref));
        state.resting.insert(
            order_ref.clone(),
            RestingOrder {
                side,
                price,
                quantity,
            },
        );
        Ok(order_ref)
    }

    async fn open_orders(&self) -> Result<HashSet<OrderRef>, ExchangeError> {
        let state = self.state.read().await;
        Ok(state.resting.keys().cloned().collect())
    }

    async fn fills(
        &self,
        order_ref: &OrderRef,
        since: DateTime<Utc>,
    ) -> Result<Vec<Fill>, ExchangeError> {
        let state = self.state.read().await;
        Ok(state
            .fills
            .get(order_ref)
            .map(|fills| {
                fills
                    .iter()
                    .filter(|f| f.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn reference_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        let state = self.state.read().await;
        Ok(state.reference_price)
    }
}
