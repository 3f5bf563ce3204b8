//! allium-harness - conformance test runner
//!
//! Command-line usage:
//!   allium-harness lsp <server> [-- args..]       - JSON-RPC scenarios over stdio
//!   allium-harness check <subject> <verifier>     - Output checked by a pattern verifier
//!   allium-harness legacy <subject>               - Subject exit code only

use allium_harness::cli::run_cli;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    match run_cli().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}
