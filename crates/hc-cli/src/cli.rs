use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "hcsim",
    about = "Honeycomb reference model: regression scenarios",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List registered scenarios
    List,
    /// Run all or selected scenarios
    Run(RunArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct RunArgs {
    /// Scenario names; all scenarios when empty
    pub names: Vec<String>,
    /// Stop at the first failure
    #[arg(long)]
    pub fail_fast: bool,
}
