//! Terminal output for the optimizer binary.

use colored::Colorize;
use edgealloc_optimizer::check::CheckResult;
use edgealloc_optimizer::cycle::CycleError;
use edgealloc_optimizer::db::StoreError;
use edgealloc_optimizer::platform::PlatformError;
use edgealloc_optimizer::report::{CycleReport, CycleStatus};
use tabled::Table;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables.
    #[default]
    Table,
    /// JSON.
    Json,
}

pub fn print_report(report: &CycleReport, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let status = match report.status {
                CycleStatus::Success => report.status.to_string().green().bold(),
                CycleStatus::Partial => report.status.to_string().yellow().bold(),
                CycleStatus::Aborted => report.status.to_string().red().bold(),
            };
            println!("{} {} ({:?})", "Cycle".bold(), report.cycle_id, report.mode);
            println!("{} {}", "Status:".bold(), status);
            if let (Some(solve), Some(objective)) = (report.solve_status, report.objective) {
                let relaxed = if report.relaxed { ", relaxed capacities" } else { "" };
                println!("{} {solve}, objective {objective:.3}{relaxed}", "Solve:".bold());
            }
            println!("{}", report.render());
        }
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{} failed to serialize report: {e}", "Error:".red().bold()),
        },
    }
}

pub fn print_checks(results: &[CheckResult], format: OutputFormat) {
    match format {
        OutputFormat::Table => println!("{}", Table::new(results)),
        OutputFormat::Json => match serde_json::to_string_pretty(results) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{} failed to serialize checks: {e}", "Error:".red().bold()),
        },
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let hint = if let Some(e) = err.downcast_ref::<CycleError>() {
        match e {
            CycleError::Store(_) => Some("Check DATABASE_URL and that Postgres is reachable."),
            CycleError::Platform(_) => Some("Check EDGEALLOC_PLATFORM_URL."),
            CycleError::Infeasible(_) => {
                Some("Set EDGEALLOC_INFEASIBLE_RELAXATION to retry with relaxed capacities.")
            }
            CycleError::SolveTimeout(_) => Some("Raise EDGEALLOC_SOLVE_TIME_LIMIT_SECS."),
            CycleError::Solver(_) => None,
        }
    } else if err.downcast_ref::<StoreError>().is_some() {
        Some("Check DATABASE_URL and that Postgres is reachable.")
    } else if err.downcast_ref::<PlatformError>().is_some() {
        Some("Check EDGEALLOC_PLATFORM_URL.")
    } else {
        None
    };

    if let Some(hint) = hint {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}
