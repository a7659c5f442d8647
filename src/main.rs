mod cli;
mod devicegraph;
mod entity;
mod errors;
mod proposal;
mod run;
mod scenario;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli_args = cli::Cli::parse();
    if let Err(err) = run::run(cli_args) {
        eprintln!("{} {err:?}", "error:".red());
        std::process::exit(1);
    }
}
