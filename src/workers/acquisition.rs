//! Acquisition worker: opens new order pairs.
//!
//! One cycle per pacing interval: read the regime parameters, price the buy
//! leg off the reference price, size it from the available quote balance,
//! submit, and record the pair. A failed submission leaves no record; the
//! pacing clock always advances so a persistent failure cannot hot-loop.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::{math, WorkerError};
use crate::config::TradingConfig;
use crate::exchange::ExchangeApi;
use crate::ledger::{Ledger, PairDraft, PairId};
use crate::params::{CycleParams, ParamSource};
use crate::types::OrderSide;

/// Fallback pacing while the parameter source is unavailable.
const PARAM_RETRY_PACING: Duration = Duration::from_secs(60);

pub struct AcquisitionWorker {
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<Ledger>,
    params: Arc<dyn ParamSource>,
    config: Arc<TradingConfig>,
}

impl AcquisitionWorker {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        ledger: Arc<Ledger>,
        params: Arc<dyn ParamSource>,
        config: Arc<TradingConfig>,
    ) -> Self {
        Self {
            exchange,
            ledger,
            params,
            config,
        }
    }

    /// Spawn the worker loop as a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run until a fatal ledger error. Parameters are re-read every cycle,
    /// so regime switches and hot reloads take effect at the next iteration.
    pub async fn run(&self) {
        info!(symbol = %self.config.symbol, "Acquisition worker started");
        loop {
            let pacing = match self.params.current().await {
                Ok(cycle) => {
                    let pacing = cycle.params.pacing;
                    match self.cycle(&cycle).await {
                        Ok(Some(id)) => {
                            debug!(pair_id = %id, "Acquisition cycle opened a pair")
                        }
                        Ok(None) => {}
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "Acquisition worker halting on invariant violation");
                            return;
                        }
                        Err(e) => warn!(error = %e, "Acquisition cycle failed; will retry"),
                    }
                    pacing
                }
                Err(e) => {
                    warn!(error = %e, "Parameter source unavailable");
                    PARAM_RETRY_PACING
                }
            };
            tokio::time::sleep(pacing).await;
        }
    }

    /// One acquisition attempt. Returns the new pair id, or `None` when the
    /// cycle was skipped (regime disabled, sizing below limits).
    pub async fn cycle(&self, cycle: &CycleParams) -> Result<Option<PairId>, WorkerError> {
        if !cycle.params.enabled {
            debug!(regime = %cycle.regime, "Buying disabled for current regime");
            return Ok(None);
        }

        let reference = self.exchange.reference_price(&self.config.symbol).await?;
        let buy_price = reference + cycle.params.buy_offset;
        if buy_price <= Decimal::ZERO {
            warn!(
                reference = %reference,
                buy_offset = %cycle.params.buy_offset,
                "Skipping cycle: non-positive buy price"
            );
            return Ok(None);
        }

        let available = self
            .exchange
            .available_balance(&self.config.quote_asset)
            .await?;
        let quantity = match math::quantity_for_capital(
            available,
            cycle.params.capital_fraction,
            buy_price,
            self.config.quantity_scale,
        ) {
            Some(q) if q > Decimal::ZERO => q,
            _ => {
                info!(
                    available = %available,
                    capital_fraction = %cycle.params.capital_fraction,
                    buy_price = %buy_price,
                    "Skipping cycle: computed quantity is not positive"
                );
                return Ok(None);
            }
        };

        let value = math::order_value(buy_price, quantity);
        if value < self.config.min_order_value {
            info!(
                order_value = %value,
                min_order_value = %self.config.min_order_value,
                "Skipping cycle: order value below venue minimum"
            );
            return Ok(None);
        }

        info!(
            regime = %cycle.regime,
            reference = %reference,
            buy_price = %buy_price,
            quantity = %quantity,
            order_value = %value,
            "Placing buy order"
        );

        // Submission failure leaves no partial record; the next cycle
        // recomputes from fresh balances.
        let buy_order_ref = self
            .exchange
            .submit_order(&self.config.symbol, OrderSide::Buy, buy_price, quantity)
            .await?;

        let sell_price = reference + cycle.params.sell_offset;
        let id = self
            .ledger
            .create_pair(PairDraft {
                symbol: self.config.symbol.clone(),
                market_regime: cycle.regime,
                buy_price,
                sell_price,
                quantity_requested: quantity,
                buy_order_ref: buy_order_ref.clone(),
            })
            .await?;

        info!(
            pair_id = %id,
            buy_order_ref = %buy_order_ref,
            "Pair opened"
        );
        Ok(Some(id))
    }
}
