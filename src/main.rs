//! refactor-infra CLI: typed CloudFormation stack for the code-refactor service.

use clap::Parser;
use refactor_infra::cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = refactor_infra::cli::dispatch(cli.command, &cli.global) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
