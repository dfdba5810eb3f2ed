//! Disposal worker: places sell legs for confirmed buys.
//!
//! Scans `AwaitingSell` pairs on a short interval. The quantity sold is
//! always `quantity_actual` — the exchange-confirmed amount — never the
//! requested quantity. Balance shortfalls are expected while the buy leg
//! settles and are deferred through the retry cache rather than escalated;
//! a pair that keeps failing past the attempt budget is written off as
//! `Failed`.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::{math, WorkerError};
use crate::config::TradingConfig;
use crate::exchange::{ExchangeApi, ExchangeError};
use crate::ledger::{Ledger, LedgerError, OrderPair, PairStatus, PairUpdate};
use crate::params::ParamSource;
use crate::retry::RetryCache;
use crate::types::OrderSide;

/// Outcome counts for one disposal scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposalReport {
    pub placed: usize,
    pub deferred: usize,
    pub written_off: usize,
}

pub struct DisposalWorker {
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<Ledger>,
    retry: Arc<RetryCache>,
    params: Arc<dyn ParamSource>,
    config: Arc<TradingConfig>,
}

impl DisposalWorker {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        ledger: Arc<Ledger>,
        retry: Arc<RetryCache>,
        params: Arc<dyn ParamSource>,
        config: Arc<TradingConfig>,
    ) -> Self {
        Self {
            exchange,
            ledger,
            retry,
            params,
            config,
        }
    }

    /// Spawn the worker loop as a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        info!(
            interval_secs = self.config.sell_check_interval.as_secs(),
            "Disposal worker started"
        );
        let mut ticker = tokio::time::interval(self.config.sell_check_interval);
        loop {
            ticker.tick().await;
            match self.scan().await {
                Ok(report) if report != DisposalReport::default() => {
                    info!(
                        placed = report.placed,
                        deferred = report.deferred,
                        written_off = report.written_off,
                        "Disposal scan completed"
                    );
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Disposal worker halting on invariant violation");
                    return;
                }
                Err(e) => warn!(error = %e, "Disposal scan failed; will retry"),
            }
        }
    }

    /// One pass over the `AwaitingSell` pairs. Per-pair failures never stop
    /// the scan; only invariant violations do.
    pub async fn scan(&self) -> Result<DisposalReport, WorkerError> {
        let mut report = DisposalReport::default();

        for pair in self.ledger.list_by_status(PairStatus::AwaitingSell).await {
            if pair.sell_order_ref.is_some() {
                // Sell leg already resting; reconciliation owns it from here
                continue;
            }
            if !self
                .retry
                .is_eligible(pair.id, Utc::now(), self.config.sell_retry_cooldown)
            {
                debug!(pair_id = %pair.id, "Pair in retry cool-down, skipping");
                report.deferred += 1;
                continue;
            }

            match self.place_sell(&pair).await {
                Ok(true) => report.placed += 1,
                Ok(false) => self.note_failure(&pair, &mut report).await?,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(pair_id = %pair.id, error = %e, "Sell placement errored");
                    self.note_failure(&pair, &mut report).await?;
                }
            }
        }

        Ok(report)
    }

    /// Attempt the sell leg for one pair. `Ok(false)` means deferred
    /// (insufficient balance, value below minimum, venue refusal).
    async fn place_sell(&self, pair: &OrderPair) -> Result<bool, WorkerError> {
        // The required quantity is the exchange-confirmed one. Selling the
        // requested quantity instead would oversell by the buy-side fee.
        let quantity = pair.quantity_actual.ok_or(LedgerError::InvariantViolation {
            id: pair.id,
            reason: "pair is AwaitingSell without quantity_actual".to_string(),
        })?;

        let available = self
            .exchange
            .available_balance(&self.config.base_asset)
            .await?;
        if !math::balance_covers(available, quantity, self.config.balance_tolerance) {
            // Expected while the buy-side balance settles; quiet deferral
            info!(
                pair_id = %pair.id,
                required = %quantity,
                available = %available,
                tolerance = %self.config.balance_tolerance,
                "Base balance below required quantity, deferring sell"
            );
            return Ok(false);
        }

        let cycle = self.params.current().await?;
        let reference = self.exchange.reference_price(&self.config.symbol).await?;
        let sell_price = reference + cycle.params.sell_offset;
        if sell_price <= Decimal::ZERO {
            warn!(
                pair_id = %pair.id,
                reference = %reference,
                sell_offset = %cycle.params.sell_offset,
                "Deferring sell: non-positive sell price"
            );
            return Ok(false);
        }

        let value = math::order_value(sell_price, quantity);
        if value < self.config.min_order_value {
            warn!(
                pair_id = %pair.id,
                order_value = %value,
                min_order_value = %self.config.min_order_value,
                "Deferring sell: order value below venue minimum"
            );
            return Ok(false);
        }

        let order_ref = match self
            .exchange
            .submit_order(&self.config.symbol, OrderSide::Sell, sell_price, quantity)
            .await
        {
            Ok(r) => r,
            Err(ExchangeError::InsufficientBalance { needed, available }) => {
                info!(
                    pair_id = %pair.id,
                    needed = %needed,
                    available = %available,
                    "Venue reports insufficient balance, deferring sell"
                );
                return Ok(false);
            }
            Err(e) => {
                warn!(pair_id = %pair.id, error = %e, "Sell submission failed");
                return Ok(false);
            }
        };

        match self
            .ledger
            .transition(
                pair.id,
                PairStatus::AwaitingSell,
                PairUpdate::sell_placed(order_ref.clone(), sell_price, Utc::now()),
            )
            .await?
        {
            Some(_) => {
                self.retry.clear(pair.id);
                info!(
                    pair_id = %pair.id,
                    sell_order_ref = %order_ref,
                    sell_price = %sell_price,
                    quantity = %quantity,
                    "Sell order placed"
                );
                Ok(true)
            }
            None => {
                // Another transition won the race after we submitted; the
                // resting order is now unrecorded and needs the operator.
                error!(
                    pair_id = %pair.id,
                    sell_order_ref = %order_ref,
                    "Pair transitioned concurrently after sell submission; order is untracked"
                );
                Ok(false)
            }
        }
    }

    /// Record a failure and write the pair off once the attempt budget is
    /// exhausted.
    async fn note_failure(
        &self,
        pair: &OrderPair,
        report: &mut DisposalReport,
    ) -> Result<(), WorkerError> {
        let attempts = self.retry.mark_failed(pair.id, Utc::now());
        if attempts < self.config.max_sell_attempts {
            report.deferred += 1;
            return Ok(());
        }

        warn!(
            pair_id = %pair.id,
            attempts,
            max_attempts = self.config.max_sell_attempts,
            "Sell retries exhausted, marking pair Failed"
        );
        if self
            .ledger
            .transition(pair.id, PairStatus::AwaitingSell, PairUpdate::failed())
            .await?
            .is_some()
        {
            self.retry.clear(pair.id);
            report.written_off += 1;
        } else {
            report.deferred += 1;
        }
        Ok(())
    }
}
