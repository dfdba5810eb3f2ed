//! Run command: the engine against the built-in paper venue.
//!
//! Wires the ledger, retry cache, parameter source, and the three workers
//! together, drives the venue with a slow random-walk price feed, and shuts
//! down on ctrl-c. A live venue would replace the `PaperExchange` with its
//! own `ExchangeApi` implementation; everything else is unchanged.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::TradingConfig;
use crate::exchange::PaperExchange;
use crate::ledger::Ledger;
use crate::params::ConfigParamSource;
use crate::retry::RetryCache;
use crate::workers::{AcquisitionWorker, DisposalWorker, ReconciliationWorker};

/// Paper price feed cadence.
const FEED_INTERVAL: Duration = Duration::from_secs(2);
/// Maximum per-tick drift of the random walk (fraction).
const FEED_MAX_DRIFT: f64 = 0.001;

pub async fn run_engine() -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(TradingConfig::from_env()?);

    info!(
        symbol = %config.symbol,
        regime = %config.market_regime,
        ledger_file = %config.ledger_file,
        "Starting paircycler"
    );

    let ledger = Arc::new(Ledger::open(&config.ledger_file)?);
    let retry = Arc::new(RetryCache::new());
    let params = Arc::new(ConfigParamSource::new(
        config.regimes.clone(),
        config.market_regime,
    ));

    let exchange = Arc::new(PaperExchange::new(
        config.base_asset.clone(),
        config.quote_asset.clone(),
        config.paper_initial_price,
        config.maker_fee,
    ));
    exchange
        .deposit(&config.quote_asset, config.paper_quote_balance)
        .await;
    info!(
        quote_balance = %config.paper_quote_balance,
        initial_price = %config.paper_initial_price,
        "Paper venue seeded"
    );

    let feeder = {
        let exchange = Arc::clone(&exchange);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            let mut price = config.paper_initial_price;
            let mut ticker = tokio::time::interval(FEED_INTERVAL);
            loop {
                ticker.tick().await;
                let drift: f64 = rand::rng().random_range(-FEED_MAX_DRIFT..FEED_MAX_DRIFT);
                match Decimal::from_f64(1.0 + drift) {
                    Some(factor) => price *= factor,
                    None => warn!(drift, "Skipping unrepresentable price drift"),
                }
                exchange.tick(price).await;
            }
        })
    };

    let acquisition = Arc::new(AcquisitionWorker::new(
        Arc::clone(&exchange) as Arc<dyn crate::exchange::ExchangeApi>,
        Arc::clone(&ledger),
        Arc::clone(&params) as Arc<dyn crate::params::ParamSource>,
        Arc::clone(&config),
    ))
    .spawn();
    let disposal = Arc::new(DisposalWorker::new(
        Arc::clone(&exchange) as Arc<dyn crate::exchange::ExchangeApi>,
        Arc::clone(&ledger),
        Arc::clone(&retry),
        Arc::clone(&params) as Arc<dyn crate::params::ParamSource>,
        Arc::clone(&config),
    ))
    .spawn();
    let reconciler = Arc::new(ReconciliationWorker::new(
        Arc::clone(&exchange) as Arc<dyn crate::exchange::ExchangeApi>,
        Arc::clone(&ledger),
        Arc::clone(&retry),
        Arc::clone(&config),
    ))
    .spawn();

    info!("Workers running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    // The ledger persists on every mutation, so aborting mid-cycle is safe;
    // a restart resumes by status scan.
    feeder.abort();
    acquisition.abort();
    disposal.abort();
    reconciler.abort();

    let stats = ledger.stats().await;
    info!(
        total_pairs = stats.total_pairs,
        complete = stats.complete,
        failed = stats.failed,
        total_gain_quote = %stats.total_gain_quote,
        "Final ledger statistics"
    );

    Ok(())
}
