//! CLI command definitions

use clap::Args;

/// Run a recipe against its declared inputs
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the recipe JSON file
    #[arg(short, long)]
    pub recipe: String,

    /// Path to a calibration database seed file (JSON array)
    #[arg(short, long)]
    pub caldb: Option<String>,

    /// Write the structured run report to this file
    #[arg(long)]
    pub report: Option<String>,
}

/// Validate a recipe document without executing it
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the recipe JSON file
    #[arg(short, long)]
    pub recipe: String,
}

/// List the registered step operations
#[derive(Debug, Args, Clone)]
pub struct StepsCommand {}
