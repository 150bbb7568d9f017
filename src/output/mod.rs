//! JSON output module for CLI commands
//!
//! Provides the schema-versioned envelope shared by every command.

pub mod command;

pub use command::{
    generate_execution_id, output_error, output_json, render_json, ErrorResponse, ImpactResponse,
    JsonResponse, OutputFormat, StatusResponse, SASMAP_JSON_SCHEMA_VERSION,
};
