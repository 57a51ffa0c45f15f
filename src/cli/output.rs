//! CLI output formatting

use crate::core::RunStatus;
use crate::execution::RunEvent;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Idle => style("IDLE").dim().to_string(),
        RunStatus::Loaded => style("LOADED").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Aborted => style("ABORTED").red().to_string(),
    }
}

/// Format a run event for display
pub fn format_run_event(event: &RunEvent) -> String {
    match event {
        RunEvent::RunStarted { run_id, recipe } => format!(
            "{} Starting recipe {} ({})",
            ROCKET,
            style(recipe).bold(),
            style(&run_id.to_string()[..8]).dim()
        ),
        RunEvent::StepStarted { index, name } => {
            format!("{} [{}] {}", SPINNER, index, style(name).cyan())
        }
        RunEvent::StepCompleted { index, name, frames } => format!(
            "{} [{}] {} ({} frames)",
            CHECK,
            index,
            style(name).green(),
            frames
        ),
        RunEvent::StepFailed { index, name, error } => format!(
            "{} [{}] {}: {}",
            CROSS,
            index,
            style(name).red(),
            style(error).dim()
        ),
        RunEvent::FrameExcluded {
            frame_id,
            step,
            error,
        } => format!(
            "{} excluded frame {} in {}: {}",
            WARN,
            style(frame_id).yellow(),
            style(step).dim(),
            style(error).dim()
        ),
        RunEvent::CheckpointWritten { location, sequence } => format!(
            "{} checkpoint #{} -> {}",
            INFO,
            sequence,
            style(location).dim()
        ),
        RunEvent::RunFinished { run_id, status } => format!(
            "{} Run ({}) {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    }
}
