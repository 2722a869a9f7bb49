//! `agora` binary entry point.

use std::process::ExitCode;

use agora_cli::{AgoraCli, CliArgs};
use clap::Parser;

/// Exit status for a degraded dependency (store or embeddings down).
const EXIT_DEGRADED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let result = match AgoraCli::from_args("agora", &args) {
        Ok(cli) => cli.run(args).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if e.is_degraded() {
                ExitCode::from(EXIT_DEGRADED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
