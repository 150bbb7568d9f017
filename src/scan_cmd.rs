//! Scan command implementation
//!
//! Runs one pass against a local mirror of the remote tree and prints the
//! pass summary.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use sasmap::output::{generate_execution_id, output_json, JsonResponse, OutputFormat};
use sasmap::scan::{run_scan, ScanReport};
use sasmap::source::{FileSource, LocalSource};
use sasmap::store::SqliteStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::load_config;

fn create_progress_bar(format: OutputFormat) -> ProgressBar {
    if format.is_json() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} programs")
            .map_err(|e| warn!("Failed to set progress bar style: {}", e))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb
}

/// Run one scan pass
///
/// # Arguments
/// * `config_path` - YAML configuration file
/// * `full` - force a full rescan regardless of the configuration
/// * `format` - summary output format
pub fn run_scan_cmd(config_path: &Path, full: bool, format: OutputFormat) -> Result<()> {
    let mut config = load_config(config_path)?;
    if full {
        config.full_rescan = true;
    }

    let exec_id = generate_execution_id();
    info!(
        execution_id = %exec_id,
        database = %config.database.display(),
        full_rescan = config.full_rescan,
        workers = config.workers,
        "Starting scan"
    );

    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let source: Arc<dyn FileSource> = Arc::new(LocalSource::new(config.remote.base_dir.clone()));

    let bar = create_progress_bar(format);
    let progress = |done: usize, total: usize| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    };
    let result = run_scan(&config, source, &store, Some(&progress));
    bar.finish_and_clear();
    let report = result?;

    match format {
        OutputFormat::Human => print_summary(&report),
        _ => {
            let response =
                JsonResponse::new(&report, &exec_id).with_partial(!report.failed.is_empty());
            output_json(&response, format)?;
        }
    }
    Ok(())
}

fn print_summary(report: &ScanReport) {
    println!("Scan complete in {} ms", report.duration_ms);
    println!("  listed:     {}", report.listed);
    println!("  scanned:    {}", report.scanned.len());
    println!("  unchanged:  {}", report.unchanged);
    println!("  failed:     {}", report.failed.len());
    println!("  missing:    {}", report.missing.len());
    if report.catalog_built {
        let note = if report.catalog_complete { "" } else { " (incomplete)" };
        println!("  macros:     {}{}", report.catalog_size, note);
    } else {
        println!("  macros:     not rebuilt");
    }

    for failed in &report.failed {
        println!("  read failed: {} ({})", failed.path, failed.error);
    }
    for path in &report.missing {
        println!("  missing:     {}", path);
    }
    for path in &report.reappeared {
        println!("  reappeared:  {}", path);
    }
    for dup in &report.duplicate_macros {
        println!(
            "  duplicate macro %{}: kept {}, ignored {}",
            dup.name,
            dup.kept,
            dup.ignored
        );
    }
}
