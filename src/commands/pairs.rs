//! Pairs command: print the ledger's trade history.

use crate::config::TradingConfig;
use crate::ledger::{Ledger, PairStatus};

pub async fn run_pairs(
    limit: usize,
    status: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = TradingConfig::from_env()?;
    let ledger = Ledger::open(&config.ledger_file)?;

    let filter: Option<PairStatus> = match status {
        Some(s) => Some(s.parse()?),
        None => None,
    };

    let mut pairs = ledger.all_pairs().await;
    pairs.reverse(); // most recent first
    let selected: Vec<_> = pairs
        .into_iter()
        .filter(|p| filter.map_or(true, |s| p.status == s))
        .take(limit)
        .collect();

    if selected.is_empty() {
        println!("No pairs recorded.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<13} {:<6} {:>12} {:>12} {:>14} {:>14} {:>12}",
        "id", "status", "regime", "buy", "sell", "qty req", "qty actual", "gain"
    );
    for pair in selected {
        println!(
            "{:>5}  {:<13} {:<6} {:>12} {:>12} {:>14} {:>14} {:>12}",
            pair.id.to_string(),
            pair.status.to_string(),
            pair.market_regime.to_string(),
            pair.buy_price.round_dp(2).to_string(),
            pair.sell_price.round_dp(2).to_string(),
            pair.quantity_requested.to_string(),
            pair.quantity_actual
                .map(|q| q.to_string())
                .unwrap_or_else(|| "-".to_string()),
            pair.realized_gain_quote
                .map(|g| g.round_dp(4).to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    Ok(())
}
