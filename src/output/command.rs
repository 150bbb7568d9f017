//! JSON output types for CLI commands
//!
//! Every JSON response is wrapped in [`JsonResponse`], which carries a schema
//! version for parsing stability and an execution id for correlating a response
//! with the log lines of the run that produced it.
//!
//! # Formats
//!
//! | Format   | Output                                  |
//! |----------|-----------------------------------------|
//! | `human`  | Plain text on stdout                    |
//! | `json`   | One compact JSON document per command   |
//! | `pretty` | The same document, indented             |
//!
//! Errors in JSON mode are written as an [`ErrorResponse`] inside the same
//! envelope, with a stable `SASMAP-*` code from [`crate::error_codes`].

use serde::{Deserialize, Serialize};

use crate::graph::{Direction, ImpactNode, NodeKind};
use crate::store::{FlagRecord, StoreCounts};
use crate::version::BuildInfo;

/// Current JSON output schema version
pub const SASMAP_JSON_SCHEMA_VERSION: &str = "1.0.0";

/// Wrapper for all JSON responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse<T> {
    /// Schema version for parsing stability
    pub schema_version: String,
    /// Unique execution ID for this run
    pub execution_id: String,
    /// Response data
    pub data: T,
    /// Whether the response is partial (e.g., truncated at the depth bound)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
}

impl<T> JsonResponse<T> {
    pub fn new(data: T, execution_id: &str) -> Self {
        JsonResponse {
            schema_version: SASMAP_JSON_SCHEMA_VERSION.to_string(),
            execution_id: execution_id.to_string(),
            data,
            partial: None,
        }
    }

    /// Mark the response as partial
    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = Some(partial);
        self
    }
}

/// Response for `impact`, `upstream` and `downstream`
#[derive(Debug, Clone, Serialize)]
pub struct ImpactResponse {
    pub start: String,
    pub start_kind: NodeKind,
    pub direction: Direction,
    pub max_depth: usize,
    pub nodes: Vec<ImpactNode>,
}

/// Response for `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub database: String,
    pub counts: StoreCounts,
    pub flags: Vec<FlagRecord>,
    pub build: BuildInfo,
}

/// Error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error code, e.g. `SASMAP-QRY-001`
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

/// Output format for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Human,
    /// Compact JSON with schema versioning
    Json,
    /// Indented JSON with schema versioning
    Pretty,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        !matches!(self, OutputFormat::Human)
    }
}

/// Generate a unique execution ID for this run
///
/// Uses timestamp + process ID for uniqueness. A clock set before the epoch
/// yields a zero timestamp rather than failing.
pub fn generate_execution_id() -> String {
    use std::process;
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = process::id();

    format!("{:x}-{:x}", timestamp, pid)
}

/// Serialize to a string in the requested JSON format
pub fn render_json<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<String> {
    let json = match format {
        OutputFormat::Pretty => serde_json::to_string_pretty(data)?,
        _ => serde_json::to_string(data)?,
    };
    Ok(json)
}

/// Output JSON to stdout
pub fn output_json<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<()> {
    println!("{}", render_json(data, format)?);
    Ok(())
}

/// Report a failed command
///
/// JSON formats print an enveloped [`ErrorResponse`] on stdout; human output
/// goes to stderr with the code in brackets.
pub fn output_error(format: OutputFormat, code: &str, message: &str) {
    if format.is_json() {
        let response = JsonResponse::new(
            ErrorResponse {
                error: code.to_string(),
                message: message.to_string(),
            },
            &generate_execution_id(),
        );
        match render_json(&response, format) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("[{}] {} (JSON encoding failed: {})", code, message, e),
        }
    } else {
        eprintln!("Error [{}]: {}", code, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_is_json() {
        assert!(OutputFormat::Json.is_json());
        assert!(OutputFormat::Pretty.is_json());
        assert!(!OutputFormat::Human.is_json());
    }

    #[test]
    fn test_envelope_fields() {
        let response = JsonResponse::new(vec![1, 2], "abc-1").with_partial(true);
        let parsed: serde_json::Value =
            serde_json::from_str(&render_json(&response, OutputFormat::Json).unwrap()).unwrap();

        assert_eq!(parsed["schema_version"], SASMAP_JSON_SCHEMA_VERSION);
        assert_eq!(parsed["execution_id"], "abc-1");
        assert_eq!(parsed["data"][1], 2);
        assert_eq!(parsed["partial"], true);
    }

    #[test]
    fn test_partial_omitted_when_unset() {
        let response = JsonResponse::new("x", "id");
        let json = render_json(&response, OutputFormat::Json).unwrap();
        assert!(!json.contains("partial"));
    }

    #[test]
    fn test_pretty_is_indented() {
        let response = JsonResponse::new(ErrorResponse {
            error: "SASMAP-QRY-001".to_string(),
            message: "missing".to_string(),
        }, "id");
        let pretty = render_json(&response, OutputFormat::Pretty).unwrap();
        assert!(pretty.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&pretty).unwrap();
        assert_eq!(parsed["data"]["error"], "SASMAP-QRY-001");
    }

    #[test]
    fn test_execution_id_shape() {
        let id = generate_execution_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| u128::from_str_radix(p, 16).is_ok()));
    }
}
