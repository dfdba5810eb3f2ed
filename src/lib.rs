pub mod cli;
pub mod commands;
pub mod config;
pub mod exchange;
pub mod ledger;
pub mod params;
pub mod retry;
pub mod types;
pub mod workers;
