//! Impact command implementation
//!
//! `impact` walks programs and tables from any identifier; `upstream` and
//! `downstream` restrict the walk to programs reachable from a program.

use anyhow::Result;
use sasmap::graph::{impact, program_closure, Direction, ImpactNode, NodeKind};
use sasmap::output::{generate_execution_id, output_json, ImpactResponse, JsonResponse, OutputFormat};
use std::path::Path;
use tracing::info;

use crate::cli::{load_config, open_existing_store};

pub fn run_impact(
    config_path: &Path,
    identifier: &str,
    direction: Direction,
    max_depth: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_existing_store(&config)?;
    let depth = max_depth.unwrap_or(config.max_depth);

    let result = impact(&store, identifier, direction, depth)?;
    info!(
        start = %result.start,
        direction = direction.as_str(),
        nodes = result.nodes.len(),
        truncated = result.truncated,
        "Impact query complete"
    );

    let response = ImpactResponse {
        start: result.start,
        start_kind: result.start_kind,
        direction,
        max_depth: depth,
        nodes: result.nodes,
    };
    emit(response, result.truncated, format)
}

/// `upstream` (backward) or `downstream` (forward) program lists
pub fn run_closure(
    config_path: &Path,
    program: &str,
    direction: Direction,
    max_depth: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_existing_store(&config)?;
    let depth = max_depth.unwrap_or(config.max_depth);

    let nodes = program_closure(&store, program, direction, depth)?;
    let response = ImpactResponse {
        start: program.to_string(),
        start_kind: NodeKind::Program,
        direction,
        max_depth: depth,
        nodes,
    };
    emit(response, false, format)
}

fn emit(response: ImpactResponse, truncated: bool, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        let exec_id = generate_execution_id();
        let mut envelope = JsonResponse::new(response, &exec_id);
        if truncated {
            envelope = envelope.with_partial(true);
        }
        return output_json(&envelope, format);
    }

    println!(
        "{} {} ({}), max depth {}",
        response.direction.as_str(),
        response.start,
        kind_label(response.start_kind),
        response.max_depth
    );
    if response.nodes.is_empty() {
        println!("  (nothing reachable)");
    }
    for node in &response.nodes {
        print_node(node);
    }
    if truncated {
        println!("  ... truncated at depth {}", response.max_depth);
    }
    Ok(())
}

fn print_node(node: &ImpactNode) {
    let name = match &node.reference {
        Some(reference) => format!("{} ({})", node.node, reference),
        None => node.node.clone(),
    };
    println!(
        "  {:>3}  {:<8} {}  via {} [{}]",
        node.depth,
        kind_label(node.kind),
        name,
        node.via,
        node.path_kind()
    );
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Program => "program",
        NodeKind::Table => "table",
        NodeKind::Unknown => "unknown",
    }
}
