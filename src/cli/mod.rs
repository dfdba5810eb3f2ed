//! CLI argument parsing using clap.

use clap::{Parser, Subcommand};

/// paircycler - order-pair lifecycle engine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the engine against the built-in paper venue
    Run,

    /// List ledger pairs
    Pairs {
        /// Maximum number of pairs to print (most recent first)
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Only show pairs in this status
        /// (opening, awaiting-sell, closing, complete, failed)
        #[arg(long)]
        status: Option<String>,
    },

    /// Print aggregate trade statistics
    Stats,
}
