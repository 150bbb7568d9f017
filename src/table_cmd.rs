//! Table command implementation
//!
//! Lists every stored program reading or writing one table.

use anyhow::Result;
use sasmap::facts::TableOperation;
use sasmap::graph::table_usage;
use sasmap::output::{generate_execution_id, output_json, JsonResponse, OutputFormat};
use std::path::Path;

use crate::cli::{load_config, open_existing_store};

pub fn run_table(config_path: &Path, table: &str, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_existing_store(&config)?;
    let usage = table_usage(&store, table)?;

    if format.is_json() {
        let exec_id = generate_execution_id();
        return output_json(&JsonResponse::new(&usage, &exec_id), format);
    }

    println!("{}", usage.table);
    println!("  writers: {}", usage.writers.len());
    for op in &usage.writers {
        print_operation(op);
    }
    println!("  readers: {}", usage.readers.len());
    for op in &usage.readers {
        print_operation(op);
    }
    let out_of_scope = usage.out_of_scope_writes();
    if out_of_scope > 0 {
        println!("  {} write(s) outside the Snowflake write scope", out_of_scope);
    }
    Ok(())
}

fn print_operation(op: &TableOperation) {
    let scope = if op.in_scope { "" } else { "  [out of scope]" };
    println!(
        "    {}:{}  {}{}",
        op.program,
        op.source_line,
        op.engine.as_str(),
        scope
    );
}
