pub mod plan;
pub mod validate;

use crate::cli;
use crate::errors::PlanError;

pub fn run(cli_args: cli::Cli) -> Result<(), PlanError> {
    match cli_args.commands {
        // Default is to plan
        None => plan::run(&cli_args.scenario, cli::ArgsPlan { json: false }),
        Some(cli::Commands::Plan(args_plan)) => {
            plan::run(&cli_args.scenario, args_plan)
        }
        Some(cli::Commands::Validate) => validate::run(&cli_args.scenario),
    }
}
