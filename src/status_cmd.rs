//! Status command implementation
//!
//! Row counts of the fact relations plus every flagged program.

use anyhow::Result;
use sasmap::output::{generate_execution_id, output_json, JsonResponse, OutputFormat, StatusResponse};
use sasmap::store::FactStore;
use sasmap::version::BuildInfo;
use std::path::Path;

use crate::cli::{load_config, open_existing_store};

pub fn run_status(config_path: &Path, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_existing_store(&config)?;

    let response = StatusResponse {
        database: config.database.display().to_string(),
        counts: store.counts()?,
        flags: store.flags()?,
        build: BuildInfo::current(),
    };

    if format.is_json() {
        let exec_id = generate_execution_id();
        return output_json(&JsonResponse::new(&response, &exec_id), format);
    }

    let counts = &response.counts;
    println!("database: {}", response.database);
    println!("programs: {}", counts.programs);
    println!(
        "table_operations: {} ({} out-of-scope writes)",
        counts.table_operations, counts.out_of_scope_writes
    );
    println!(
        "dependencies: {} ({} unknown)",
        counts.dependencies, counts.unknown_dependencies
    );
    println!("libname_mappings: {}", counts.libname_mappings);
    println!("programs_with_credentials: {}", counts.programs_with_credentials);
    println!("missing: {}", counts.missing);
    println!("read_failed: {}", counts.read_failed);
    for flag in &response.flags {
        match &flag.detail {
            Some(detail) => println!("  {} {} ({})", flag.flag.as_str(), flag.path, detail),
            None => println!("  {} {}", flag.flag.as_str(), flag.path),
        }
    }
    Ok(())
}
