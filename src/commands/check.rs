//! Prerequisite check

use crate::engine::ContainerRuntime;
use crate::utils::errors::CliError;
use crate::utils::prereqs;
use anyhow::Result;
use colored::Colorize;

/// Report which container engines are installed and which one will be used
pub fn check(preferred_runtime: Option<&str>) -> Result<()> {
    crate::log_info!("Checking prerequisites...");

    let report = prereqs::check_container_engines();
    for name in &report.found {
        println!("{} {}", "✓".green(), name);
    }
    for (name, hint) in &report.missing {
        println!("{} {} ({})", "✗".red(), name, hint);
    }

    if !report.any_found() {
        return Err(CliError::engine_not_found().into());
    }

    let runtime = ContainerRuntime::detect_with(preferred_runtime)?;
    println!("Container runtime: {}", runtime.to_string().bold());
    Ok(())
}
