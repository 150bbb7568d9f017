//! Credentials command implementation

use anyhow::Result;
use sasmap::graph::credential_report;
use sasmap::output::{generate_execution_id, output_json, JsonResponse, OutputFormat};
use std::path::Path;

use crate::cli::{load_config, open_existing_store};

/// List programs with literal credentials
///
/// Matched values are printed as stored; the report exists so they can be
/// found and removed.
pub fn run_credentials(config_path: &Path, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_existing_store(&config)?;
    let report = credential_report(&store)?;

    if format.is_json() {
        let exec_id = generate_execution_id();
        return output_json(&JsonResponse::new(&report, &exec_id), format);
    }

    if report.is_empty() {
        println!("No literal credentials found");
        return Ok(());
    }
    for program in &report {
        println!("{}", program.path);
        for finding in &program.findings {
            println!(
                "  line {}: {} {}",
                finding.source_line, finding.keyword, finding.matched
            );
        }
    }
    Ok(())
}
