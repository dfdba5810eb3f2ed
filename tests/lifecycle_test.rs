//! Full lifecycle integration tests: the three workers against the paper
//! venue, from pair creation through reconciled completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use paircycler::config::TradingConfig;
use paircycler::exchange::{ExchangeApi, PaperExchange};
use paircycler::ledger::{Ledger, PairStatus};
use paircycler::params::{CycleParams, MarketRegime, ParamError, ParamSource, RegimeParams};
use paircycler::retry::RetryCache;
use paircycler::workers::{AcquisitionWorker, DisposalWorker, ReconciliationWorker};

/// Range-regime parameters with fixed offsets, enabled.
struct RangeParams;

#[async_trait]
impl ParamSource for RangeParams {
    async fn current(&self) -> Result<CycleParams, ParamError> {
        Ok(CycleParams {
            regime: MarketRegime::Range,
            params: RegimeParams {
                buy_offset: dec!(-400),
                sell_offset: dec!(400),
                capital_fraction: dec!(0.05),
                pacing: Duration::from_secs(600),
                enabled: true,
            },
        })
    }
}

struct Harness {
    exchange: Arc<PaperExchange>,
    ledger: Arc<Ledger>,
    retry: Arc<RetryCache>,
    acquisition: AcquisitionWorker,
    disposal: DisposalWorker,
    reconciler: ReconciliationWorker,
}

fn harness(config: TradingConfig) -> Harness {
    let config = Arc::new(config);
    let exchange = Arc::new(PaperExchange::new(
        config.base_asset.clone(),
        config.quote_asset.clone(),
        dec!(100000),
        config.maker_fee,
    ));
    let ledger = Arc::new(Ledger::in_memory());
    let retry = Arc::new(RetryCache::new());
    let params: Arc<dyn ParamSource> = Arc::new(RangeParams);

    let acquisition = AcquisitionWorker::new(
        Arc::clone(&exchange) as Arc<dyn ExchangeApi>,
        Arc::clone(&ledger),
        Arc::clone(&params),
        Arc::clone(&config),
    );
    let disposal = DisposalWorker::new(
        Arc::clone(&exchange) as Arc<dyn ExchangeApi>,
        Arc::clone(&ledger),
        Arc::clone(&retry),
        Arc::clone(&params),
        Arc::clone(&config),
    );
    let reconciler = ReconciliationWorker::new(
        Arc::clone(&exchange) as Arc<dyn ExchangeApi>,
        Arc::clone(&ledger),
        Arc::clone(&retry),
        Arc::clone(&config),
    );

    Harness {
        exchange,
        ledger,
        retry,
        acquisition,
        disposal,
        reconciler,
    }
}

async fn cycle_params(source: &dyn ParamSource) -> CycleParams {
    source.current().await.unwrap()
}

#[tokio::test]
async fn test_full_cycle_to_complete() {
    let h = harness(TradingConfig::default());
    h.exchange.deposit("USDC", dec!(10000)).await;

    // 1. Acquisition opens a pair: buy at 99600 for 5% of the balance
    let cycle = cycle_params(&RangeParams).await;
    let id = h.acquisition.cycle(&cycle).await.unwrap().unwrap();
    let pair = h.ledger.get(id).await.unwrap();
    assert_eq!(pair.status, PairStatus::Opening);
    assert_eq!(pair.buy_price, dec!(99600));
    // 10000 * 0.05 / 99600 truncated to 8 dp
    assert_eq!(pair.quantity_requested, dec!(0.00502008));

    // Reconciling while the order rests changes nothing
    let report = h.reconciler.scan().await.unwrap();
    assert!(!report.changed());

    // 2. Price crosses the buy limit; the venue fills net of the base fee
    h.exchange.tick(dec!(99500)).await;
    let report = h.reconciler.scan().await.unwrap();
    assert_eq!(report.buys_confirmed, 1);

    let pair = h.ledger.get(id).await.unwrap();
    assert_eq!(pair.status, PairStatus::AwaitingSell);
    let quantity_actual = pair.quantity_actual.unwrap();
    assert_eq!(
        quantity_actual,
        dec!(0.00502008) * (Decimal::ONE - dec!(0.0004))
    );
    assert!(quantity_actual < pair.quantity_requested);

    // 3. Disposal places the sell leg for the actual quantity
    let report = h.disposal.scan().await.unwrap();
    assert_eq!(report.placed, 1);
    let pair = h.ledger.get(id).await.unwrap();
    assert_eq!(pair.status, PairStatus::Closing);
    assert!(pair.sell_order_ref.is_some());
    // Sell priced off the post-fill reference (99500) plus the 400 offset
    assert_eq!(pair.sell_price, dec!(99900));

    // 4. Price crosses the sell limit; reconciliation completes the pair
    h.exchange.tick(dec!(100500)).await;
    let report = h.reconciler.scan().await.unwrap();
    assert_eq!(report.sells_completed, 1);

    let pair = h.ledger.get(id).await.unwrap();
    assert_eq!(pair.status, PairStatus::Complete);
    assert!(pair.completed_at.is_some());

    // Gain matches manual computation from the venue's fee model:
    // gross = sell_price * qty, quote fee = gross * 0.0004
    let gross = dec!(99900) * quantity_actual;
    let fee = gross * dec!(0.0004);
    let cost = dec!(99600) * quantity_actual;
    assert_eq!(pair.realized_gain_quote, Some(gross - cost - fee));

    // 5. Nothing left to reconcile
    let report = h.reconciler.scan().await.unwrap();
    assert!(!report.changed());
    let stats = h.ledger.stats().await;
    assert_eq!(stats.complete, 1);
    assert_eq!(stats.total_pairs, 1);
}

#[tokio::test]
async fn test_disposal_defers_until_buy_balance_settles() {
    let h = harness(TradingConfig {
        sell_retry_cooldown: Duration::from_secs(0),
        ..TradingConfig::default()
    });
    h.exchange.deposit("USDC", dec!(10000)).await;

    let cycle = cycle_params(&RangeParams).await;
    let id = h.acquisition.cycle(&cycle).await.unwrap().unwrap();

    // Buy confirmed by fills while the base credit is still missing: force
    // the fill record, then drain the base balance to simulate settling
    h.exchange.tick(dec!(99500)).await;
    h.reconciler.scan().await.unwrap();
    let pair = h.ledger.get(id).await.unwrap();
    assert_eq!(pair.status, PairStatus::AwaitingSell);

    // Withdraw the credited base so the disposal check comes up short
    let base = h.exchange.available_balance("BTC").await.unwrap();
    h.exchange.deposit("BTC", -base).await;

    let report = h.disposal.scan().await.unwrap();
    assert_eq!(report.placed, 0);
    assert_eq!(report.deferred, 1);
    assert_eq!(h.ledger.get(id).await.unwrap().status, PairStatus::AwaitingSell);

    // Balance arrives; the next scan places the sell
    h.exchange.deposit("BTC", base).await;
    let report = h.disposal.scan().await.unwrap();
    assert_eq!(report.placed, 1);
    assert_eq!(h.ledger.get(id).await.unwrap().status, PairStatus::Closing);
    assert!(h.retry.is_empty());
}

#[tokio::test]
async fn test_cancelled_buy_ends_failed() {
    let h = harness(TradingConfig::default());
    h.exchange.deposit("USDC", dec!(10000)).await;

    let cycle = cycle_params(&RangeParams).await;
    let id = h.acquisition.cycle(&cycle).await.unwrap().unwrap();
    let buy_ref = h.ledger.get(id).await.unwrap().buy_order_ref.unwrap();

    // Operator cancels the resting buy; the next scan observes the absence
    h.exchange.cancel(&buy_ref).await;
    let report = h.reconciler.scan().await.unwrap();
    assert_eq!(report.buys_failed, 1);
    assert_eq!(h.ledger.get(id).await.unwrap().status, PairStatus::Failed);

    // Terminal: further scans leave it alone
    let report = h.reconciler.scan().await.unwrap();
    assert!(!report.changed());
}

#[tokio::test]
async fn test_under_tolerance_partial_fill_fails_pair() {
    let h = harness(TradingConfig::default());
    h.exchange.deposit("USDC", dec!(10000)).await;

    let cycle = cycle_params(&RangeParams).await;
    let id = h.acquisition.cycle(&cycle).await.unwrap().unwrap();
    let buy_ref = h.ledger.get(id).await.unwrap().buy_order_ref.unwrap();

    // Half the order executes, the rest is cancelled
    h.exchange.fill_fraction(&buy_ref, dec!(0.5)).await;
    let report = h.reconciler.scan().await.unwrap();
    assert_eq!(report.buys_failed, 1);

    let pair = h.ledger.get(id).await.unwrap();
    assert_eq!(pair.status, PairStatus::Failed);
    // No phantom position: the actual quantity was never set
    assert!(pair.quantity_actual.is_none());
}

#[tokio::test]
async fn test_many_concurrent_pairs_reconcile_independently() {
    let h = harness(TradingConfig::default());
    h.exchange.deposit("USDC", dec!(100000)).await;

    let cycle = cycle_params(&RangeParams).await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(h.acquisition.cycle(&cycle).await.unwrap().unwrap());
    }
    assert_eq!(h.ledger.list_by_status(PairStatus::Opening).await.len(), 5);

    // Cancel one, fill the rest
    let victim_ref = h
        .ledger
        .get(ids[0])
        .await
        .unwrap()
        .buy_order_ref
        .unwrap();
    h.exchange.cancel(&victim_ref).await;
    h.exchange.tick(dec!(99000)).await;

    let report = h.reconciler.scan().await.unwrap();
    assert_eq!(report.buys_confirmed, 4);
    assert_eq!(report.buys_failed, 1);
    assert_eq!(h.ledger.get(ids[0]).await.unwrap().status, PairStatus::Failed);
    assert_eq!(
        h.ledger.list_by_status(PairStatus::AwaitingSell).await.len(),
        4
    );
}
