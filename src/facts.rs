//! Resolved facts persisted per program
//!
//! These are the final, structured facts produced by the resolver and written by the
//! store. Raw extractor output lives in [`crate::extract`].
//!
//! Every fact carries its owning program and a 1-indexed source line.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Target marker stored for references that could not be resolved
pub const UNKNOWN: &str = "unknown";

/// Storage engine a table reference resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Oracle,
    Snowflake,
    /// Local SAS library bound to a filesystem path
    Base,
    /// Temporary WORK library
    Work,
    Unknown,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Oracle => "oracle",
            Engine::Snowflake => "snowflake",
            Engine::Base => "base",
            Engine::Work => "work",
            Engine::Unknown => "unknown",
        }
    }

    /// Parse a stored or configured engine name
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "oracle" => Some(Engine::Oracle),
            "snowflake" => Some(Engine::Snowflake),
            "base" => Some(Engine::Base),
            "work" => Some(Engine::Work),
            "unknown" => Some(Engine::Unknown),
            _ => None,
        }
    }

    /// Map a SAS engine token (LIBNAME engine, CONNECT TO target) to an engine
    pub fn from_sas_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "oracle" | "ora" => Engine::Oracle,
            "snow" | "snowflake" => Engine::Snowflake,
            "base" | "v9" | "v8" | "v7" => Engine::Base,
            _ => Engine::Unknown,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    Write,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read" => Some(OperationKind::Read),
            "write" => Some(OperationKind::Write),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Include,
    MacroCall,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Include => "include",
            DependencyKind::MacroCall => "macro_call",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "include" => Some(DependencyKind::Include),
            "macro_call" => Some(DependencyKind::MacroCall),
            _ => None,
        }
    }
}

/// How a LIBNAME binding was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionSource {
    Static,
    MacroVariableTrace,
    Unknown,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Static => "static",
            ResolutionSource::MacroVariableTrace => "macro-variable-trace",
            ResolutionSource::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "static" => Some(ResolutionSource::Static),
            "macro-variable-trace" => Some(ResolutionSource::MacroVariableTrace),
            "unknown" => Some(ResolutionSource::Unknown),
            _ => None,
        }
    }
}

/// Target of a program dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum DependencyTarget {
    Program(String),
    Unknown,
}

impl DependencyTarget {
    /// Value stored in `program_dependencies.target`
    pub fn as_stored(&self) -> &str {
        match self {
            DependencyTarget::Program(path) => path,
            DependencyTarget::Unknown => UNKNOWN,
        }
    }

    pub fn from_stored(s: &str) -> Self {
        if s == UNKNOWN {
            DependencyTarget::Unknown
        } else {
            DependencyTarget::Program(s.to_string())
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, DependencyTarget::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOperation {
    pub program: String,
    /// Lower-case qualified identifier, e.g. `dbo.customers`
    pub table: String,
    pub engine: Engine,
    pub operation: OperationKind,
    pub source_line: usize,
    /// False only for Snowflake writes outside the designated write scope
    pub in_scope: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDependency {
    pub source: String,
    pub target: DependencyTarget,
    pub kind: DependencyKind,
    /// Reference text as written (include path or macro name)
    pub reference: String,
    pub source_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibnameMapping {
    pub libref: String,
    pub engine: Engine,
    pub resolution: ResolutionSource,
    /// Schema, path or `database.schema`; None when it could not be resolved
    pub target: Option<String>,
    pub source_program: String,
    pub source_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialFinding {
    pub source_line: usize,
    /// Option keyword the literal was assigned to (`password`, `user`, ...)
    pub keyword: String,
    pub matched: String,
}

/// One row of the `programs` relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub path: String,
    /// Remote modification time (seconds since epoch) observed when scanned
    pub mtime: i64,
    /// RFC 3339 timestamp of the pass that wrote this row
    pub scan_timestamp: String,
    pub credential_findings: Vec<CredentialFinding>,
}

/// Complete fact set for one program, written atomically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramFacts {
    pub program: ProgramRecord,
    pub operations: Vec<TableOperation>,
    pub dependencies: Vec<ProgramDependency>,
    pub libnames: Vec<LibnameMapping>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_tokens() {
        assert_eq!(Engine::from_sas_token("ORACLE"), Engine::Oracle);
        assert_eq!(Engine::from_sas_token("snow"), Engine::Snowflake);
        assert_eq!(Engine::from_sas_token("V9"), Engine::Base);
        assert_eq!(Engine::from_sas_token("odbc"), Engine::Unknown);
    }

    #[test]
    fn test_stored_names_round_trip() {
        for engine in [
            Engine::Oracle,
            Engine::Snowflake,
            Engine::Base,
            Engine::Work,
            Engine::Unknown,
        ] {
            assert_eq!(Engine::from_str(engine.as_str()), Some(engine));
        }
        assert_eq!(
            ResolutionSource::from_str("macro-variable-trace"),
            Some(ResolutionSource::MacroVariableTrace)
        );
        assert_eq!(DependencyKind::from_str("macro_call"), Some(DependencyKind::MacroCall));
    }

    #[test]
    fn test_unknown_target_marker() {
        assert_eq!(DependencyTarget::Unknown.as_stored(), "unknown");
        assert!(DependencyTarget::from_stored("unknown").is_unknown());
        assert_eq!(
            DependencyTarget::from_stored("/prod/a.sas"),
            DependencyTarget::Program("/prod/a.sas".to_string())
        );
    }
}
