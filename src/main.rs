//! Fuel card ledger sync CLI
//!
//! Runs sync cycles over a fixture directory and prints final account
//! balances as CSV.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- fixtures/ > balances.csv
//! cargo run -- --cycles 3 --interval-secs 5 fixtures/ > balances.csv
//! cargo run -- --as-of 2023-05-17T12:00:00Z --log-format json fixtures/ > balances.csv
//! ```
//!
//! Logs go to stderr; `RUST_LOG` controls the level.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (fixture directory missing or malformed, output not writable, etc.)

use fuelcard_ledger_sync::{cli, runner};
use std::process;
use tracing::error;

fn main() {
    let args = cli::parse_args();
    cli::init_tracing(args.log_format);

    let config = args.to_sync_config();
    let mut output = std::io::stdout();
    if let Err(e) = runner::run(&args.fixtures, config, &mut output) {
        error!(error = %e, "Sync run failed");
        process::exit(1);
    }
}
