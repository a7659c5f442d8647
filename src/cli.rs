use clap::{
    Args,
    Parser,
    Subcommand,
};

use crate::errors::PlanError;

#[derive(Debug, Parser)]
#[clap(
    version,
    about = "Storage proposal planner - makes room for new volumes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub commands: Option<Commands>,

    /// Scenario file describing disks, policies, and requested volumes
    #[arg(
        global = true,
        short = 'f',
        long = "file",
        value_parser = validate_filename,
        default_value_t = String::from("./scenario.yaml")
    )]
    pub scenario: String,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Plan(ArgsPlan),
    Validate,
}

#[derive(Debug, Args)]
pub struct ArgsPlan {
    /// Print the full JSON report instead of the human summary
    #[arg(long = "json")]
    pub json: bool,
}

fn validate_filename(name: &str) -> Result<String, PlanError> {
    if name.is_empty() {
        return Err(PlanError::BadArgs(String::from("empty filename")));
    }

    Ok(name.to_string())
}
