//! Reconciliation worker: the core state machine.
//!
//! Periodically reads the venue's authoritative order/fill state and drives
//! pair status forward: buy fills produce the fee-adjusted `quantity_actual`
//! and move pairs to `AwaitingSell`; sell fills produce realized gains and
//! move pairs to `Complete`; vanished orders without sufficient fill become
//! `Failed`. Fill history always outranks the open-order set when the two
//! disagree (a partially filled order can legitimately appear in both).
//!
//! Scans are idempotent: with no new exchange activity a rescan performs no
//! transitions. A CAS loss just skips the pair; next cycle re-derives
//! everything from fresh exchange state.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::{math, WorkerError};
use crate::config::TradingConfig;
use crate::exchange::{ExchangeApi, Fill};
use crate::ledger::{Ledger, LedgerError, OrderPair, PairStatus, PairUpdate};
use crate::retry::RetryCache;
use crate::types::OrderRef;

/// Outcome counts for one reconciliation scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub buys_confirmed: usize,
    pub buys_failed: usize,
    pub sells_completed: usize,
    pub sells_failed: usize,
    /// Pairs left untouched: still resting, or lost a CAS race
    pub unchanged: usize,
}

impl ScanReport {
    /// True if the scan performed at least one transition.
    pub fn changed(&self) -> bool {
        self.buys_confirmed + self.buys_failed + self.sells_completed + self.sells_failed > 0
    }
}

enum Outcome {
    Transitioned,
    Unchanged,
}

pub struct ReconciliationWorker {
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<Ledger>,
    retry: Arc<RetryCache>,
    config: Arc<TradingConfig>,
}

impl ReconciliationWorker {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        ledger: Arc<Ledger>,
        retry: Arc<RetryCache>,
        config: Arc<TradingConfig>,
    ) -> Self {
        Self {
            exchange,
            ledger,
            retry,
            config,
        }
    }

    /// Spawn the worker loop as a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        info!(
            interval_secs = self.config.sync_interval.as_secs(),
            "Reconciliation worker started"
        );
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        loop {
            ticker.tick().await;
            match self.scan().await {
                Ok(report) if report.changed() => {
                    info!(
                        buys_confirmed = report.buys_confirmed,
                        buys_failed = report.buys_failed,
                        sells_completed = report.sells_completed,
                        sells_failed = report.sells_failed,
                        "Reconciliation scan completed"
                    );
                }
                Ok(_) => debug!("Reconciliation scan: no changes"),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Reconciliation worker halting on invariant violation");
                    return;
                }
                Err(e) => warn!(error = %e, "Reconciliation scan failed; will retry"),
            }
        }
    }

    /// One full pass over `Opening` and `Closing` pairs against fresh
    /// exchange state. Per-pair exchange errors are isolated; invariant
    /// violations abort the scan.
    pub async fn scan(&self) -> Result<ScanReport, WorkerError> {
        let open = self.exchange.open_orders().await?;
        let since = Utc::now()
            - chrono::Duration::from_std(self.config.fill_lookback)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut report = ScanReport::default();

        for pair in self.ledger.list_by_status(PairStatus::Opening).await {
            match self.reconcile_buy(&pair, &open, since).await {
                Ok(Outcome::Transitioned) => {
                    // Counted by status below; re-read for the exact move
                    match self.ledger.get(pair.id).await.map(|p| p.status) {
                        Some(PairStatus::AwaitingSell) => report.buys_confirmed += 1,
                        Some(PairStatus::Failed) => report.buys_failed += 1,
                        _ => report.unchanged += 1,
                    }
                }
                Ok(Outcome::Unchanged) => report.unchanged += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(pair_id = %pair.id, error = %e, "Buy reconciliation failed for pair");
                    report.unchanged += 1;
                }
            }
        }

        for pair in self.ledger.list_by_status(PairStatus::Closing).await {
            match self.reconcile_sell(&pair, &open, since).await {
                Ok(Outcome::Transitioned) => {
                    match self.ledger.get(pair.id).await.map(|p| p.status) {
                        Some(PairStatus::Complete) => report.sells_completed += 1,
                        Some(PairStatus::Failed) => report.sells_failed += 1,
                        _ => report.unchanged += 1,
                    }
                }
                Ok(Outcome::Unchanged) => report.unchanged += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(pair_id = %pair.id, error = %e, "Sell reconciliation failed for pair");
                    report.unchanged += 1;
                }
            }
        }

        Ok(report)
    }

    async fn reconcile_buy(
        &self,
        pair: &OrderPair,
        open: &HashSet<OrderRef>,
        since: DateTime<Utc>,
    ) -> Result<Outcome, WorkerError> {
        let Some(buy_ref) = pair.buy_order_ref.clone() else {
            // Pairs are only created after a successful submission
            return Err(LedgerError::InvariantViolation {
                id: pair.id,
                reason: "pair is Opening without buy_order_ref".to_string(),
            }
            .into());
        };

        let fills = self.exchange.fills(&buy_ref, since).await?;
        let total_filled: Decimal = fills.iter().map(|f| f.quantity).sum();

        // Fills outrank the open set: a crossed order may linger there
        if math::fill_meets_tolerance(
            total_filled,
            pair.quantity_requested,
            self.config.fill_tolerance,
        ) {
            let updated = self
                .ledger
                .transition(
                    pair.id,
                    PairStatus::Opening,
                    PairUpdate::buy_filled(total_filled, Utc::now()),
                )
                .await?;
            return Ok(match updated {
                Some(_) => {
                    self.retry.clear(pair.id);
                    info!(
                        pair_id = %pair.id,
                        buy_order_ref = %buy_ref,
                        quantity_requested = %pair.quantity_requested,
                        quantity_actual = %total_filled,
                        fills = fills.len(),
                        "Buy leg filled"
                    );
                    Outcome::Transitioned
                }
                None => Outcome::Unchanged,
            });
        }

        if open.contains(&buy_ref) {
            // Still resting below tolerance; nothing to conclude yet
            return Ok(Outcome::Unchanged);
        }

        // Gone from the book without a sufficient fill: cancelled outright,
        // or a partial fill we must not keep as a phantom position
        warn!(
            pair_id = %pair.id,
            buy_order_ref = %buy_ref,
            total_filled = %total_filled,
            quantity_requested = %pair.quantity_requested,
            fill_tolerance = %self.config.fill_tolerance,
            "Buy order absent without sufficient fill, failing pair"
        );
        let updated = self
            .ledger
            .transition(pair.id, PairStatus::Opening, PairUpdate::failed())
            .await?;
        Ok(match updated {
            Some(_) => Outcome::Transitioned,
            None => Outcome::Unchanged,
        })
    }

    async fn reconcile_sell(
        &self,
        pair: &OrderPair,
        open: &HashSet<OrderRef>,
        since: DateTime<Utc>,
    ) -> Result<Outcome, WorkerError> {
        let Some(sell_ref) = pair.sell_order_ref.clone() else {
            return Err(LedgerError::InvariantViolation {
                id: pair.id,
                reason: "pair is Closing without sell_order_ref".to_string(),
            }
            .into());
        };
        let Some(quantity_actual) = pair.quantity_actual else {
            return Err(LedgerError::InvariantViolation {
                id: pair.id,
                reason: "pair is Closing without quantity_actual".to_string(),
            }
            .into());
        };

        let fills = self.exchange.fills(&sell_ref, since).await?;
        let total_filled: Decimal = fills.iter().map(|f| f.quantity).sum();

        if math::fill_meets_tolerance(total_filled, quantity_actual, self.config.fill_tolerance)
        {
            let (gain, percent) = self.realized_gain(pair, quantity_actual, &fills);
            let updated = self
                .ledger
                .transition(
                    pair.id,
                    PairStatus::Closing,
                    PairUpdate::completed(gain, percent, Utc::now()),
                )
                .await?;
            return Ok(match updated {
                Some(_) => {
                    self.retry.clear(pair.id);
                    info!(
                        pair_id = %pair.id,
                        sell_order_ref = %sell_ref,
                        quantity = %total_filled,
                        realized_gain_quote = %gain,
                        realized_gain_percent = %percent,
                        "Pair completed"
                    );
                    Outcome::Transitioned
                }
                None => Outcome::Unchanged,
            });
        }

        if open.contains(&sell_ref) {
            return Ok(Outcome::Unchanged);
        }

        warn!(
            pair_id = %pair.id,
            sell_order_ref = %sell_ref,
            total_filled = %total_filled,
            quantity_actual = %quantity_actual,
            "Sell order absent without sufficient fill, failing pair"
        );
        let updated = self
            .ledger
            .transition(pair.id, PairStatus::Closing, PairUpdate::failed())
            .await?;
        Ok(match updated {
            Some(_) => Outcome::Transitioned,
            None => Outcome::Unchanged,
        })
    }

    /// Realized gain from recorded sell fills. Fees are the venue-reported
    /// quote-denominated amounts; proceeds come from the fills themselves,
    /// never from an assumed fee rate.
    fn realized_gain(
        &self,
        pair: &OrderPair,
        quantity_actual: Decimal,
        fills: &[Fill],
    ) -> (Decimal, Decimal) {
        let gross_quote: Decimal = fills.iter().map(|f| f.price * f.quantity).sum();
        let mut fees_quote = Decimal::ZERO;
        for fill in fills {
            if fill.fee_asset == self.config.quote_asset {
                fees_quote += fill.fee_amount;
            } else if fill.fee_amount > Decimal::ZERO {
                warn!(
                    pair_id = %pair.id,
                    fee_asset = %fill.fee_asset,
                    fee_amount = %fill.fee_amount,
                    "Sell fill carries a non-quote fee; excluded from gain"
                );
            }
        }

        let buy_cost = quantity_actual * pair.buy_price;
        let gain = math::realized_gain(gross_quote, buy_cost, fees_quote);
        let percent = math::gain_percent(gain, buy_cost).unwrap_or(Decimal::ZERO);
        (gain, percent)
    }
}
