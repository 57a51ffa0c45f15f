mod caldb;
mod cli;
mod core;
mod execution;
mod steps;

use anyhow::{Context, Result};
use crate::caldb::{CalIdAllocator, CalibrationResolver, CalibrationStore, InMemoryCalDb};
use crate::cli::commands::{RunCommand, StepsCommand, ValidateCommand};
use crate::cli::output::*;
use crate::cli::{Cli, Command};
use crate::core::{DatasetState, Recipe};
use crate::execution::{DirectorySink, PipelineRunner};
use crate::steps::StepRegistry;
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_recipe(cmd).await?,
        Command::Validate(cmd) => validate_recipe(cmd)?,
        Command::Steps(cmd) => list_steps(cmd)?,
    }

    Ok(())
}

async fn run_recipe(cmd: &RunCommand) -> Result<()> {
    let recipe = Recipe::from_file(&cmd.recipe).context("Failed to load recipe")?;

    println!("{} Loaded recipe: {}", INFO, style(&recipe.name).bold());

    // Set up the calibration store
    let store: Arc<dyn CalibrationStore> = match &cmd.caldb {
        Some(path) => Arc::new(
            InMemoryCalDb::from_file(path).context("Failed to load calibration database")?,
        ),
        None => Arc::new(InMemoryCalDb::new()),
    };

    let resolver = Arc::new(CalibrationResolver::new(
        store,
        Arc::new(CalIdAllocator::new()),
        recipe.drpconfig.jit_calib_id,
    ));
    let runner = PipelineRunner::new(
        Arc::new(StepRegistry::with_builtins()),
        resolver,
        Arc::new(DirectorySink),
    );

    // Set up event handler for console output
    runner.add_event_handler(|event| {
        println!("{}", format_run_event(&event));
    });

    let dataset = DatasetState::from_inputs(&recipe.inputs);

    println!();
    let outcome = runner.run(&recipe, dataset).await;

    if let Some(path) = &cmd.report {
        let json = serde_json::to_string_pretty(&outcome.report)?;
        std::fs::write(path, json).context("Failed to write run report")?;
        println!("\n{} Run report written to {}", INFO, style(path).dim());
    }

    // Print final status
    if outcome.is_completed() {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&recipe.name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&recipe.name).bold(),
            style("aborted").red()
        );
        if let Some(abort) = &outcome.report.abort {
            error!("aborted at '{}': {}", abort.step, abort.message);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn validate_recipe(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating recipe...", INFO);

    let result = Recipe::from_file(&cmd.recipe)
        .and_then(|recipe| {
            recipe.validate_steps(&StepRegistry::with_builtins())?;
            Ok(recipe)
        });

    match result {
        Ok(recipe) => {
            println!("{} Recipe is valid!", CHECK);
            println!("  Name: {}", style(&recipe.name).bold());
            println!("  Steps: {}", style(recipe.steps.len()).cyan());
            println!("  Inputs: {}", style(recipe.inputs.len()).cyan());
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

fn list_steps(_cmd: &StepsCommand) -> Result<()> {
    let registry = StepRegistry::with_builtins();
    println!("{} Registered step operations:", INFO);
    for name in registry.names() {
        println!("  {}", style(name).bold());
    }
    println!(
        "{} Engine steps: {}, {}, {}, {}",
        INFO,
        style("save").cyan(),
        style("update_to_l2a").cyan(),
        style("update_to_l2b").cyan(),
        style("combine_subexposures").cyan()
    );
    Ok(())
}
