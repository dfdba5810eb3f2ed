//! Stats command: aggregate statistics over the trade history.

use crate::config::TradingConfig;
use crate::ledger::Ledger;

pub async fn run_stats() -> Result<(), Box<dyn std::error::Error>> {
    let config = TradingConfig::from_env()?;
    let ledger = Ledger::open(&config.ledger_file)?;
    let stats = ledger.stats().await;

    println!("--- Pair Statistics ---");
    println!("Total pairs:      {}", stats.total_pairs);
    println!("Opening:          {}", stats.opening);
    println!("Awaiting sell:    {}", stats.awaiting_sell);
    println!("Closing:          {}", stats.closing);
    println!("Complete:         {}", stats.complete);
    println!("Failed:           {}", stats.failed);
    println!("-----------------------");
    println!(
        "Total gain:       {} {}",
        stats.total_gain_quote.round_dp(4),
        config.quote_asset
    );
    println!("Profitable:       {}", stats.profitable_trades);
    println!("Losing:           {}", stats.losing_trades);
    println!("Win rate:         {}%", stats.win_rate_percent.round_dp(2));
    println!(
        "Average gain:     {} {}",
        stats.average_gain_quote.round_dp(4),
        config.quote_asset
    );

    Ok(())
}
