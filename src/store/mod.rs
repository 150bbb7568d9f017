//! Persistent fact store
//!
//! [`FactStore`] is the only way the scanner and the query engine touch stored
//! facts. [`SqliteStore`] is the shipped backend.

pub mod schema;
pub mod sqlite;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::facts::{LibnameMapping, ProgramDependency, ProgramFacts, ProgramRecord, TableOperation};

pub use sqlite::SqliteStore;

/// Operator-review flags kept beside the fact relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramFlag {
    /// Stored but absent from the latest listing
    Missing,
    /// Reads exhausted their retries in the latest pass that selected it
    ReadFailed,
}

impl ProgramFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramFlag::Missing => "missing",
            ProgramFlag::ReadFailed => "read_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "missing" => Some(ProgramFlag::Missing),
            "read_failed" => Some(ProgramFlag::ReadFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub path: String,
    pub flag: ProgramFlag,
    pub detail: Option<String>,
    /// Unix seconds
    pub flagged_at: i64,
}

/// Row counts for the status report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub programs: usize,
    pub table_operations: usize,
    pub out_of_scope_writes: usize,
    pub dependencies: usize,
    pub unknown_dependencies: usize,
    pub libname_mappings: usize,
    pub programs_with_credentials: usize,
    pub missing: usize,
    pub read_failed: usize,
}

/// Storage interface for scanned facts
///
/// This trait is object-safe and shared across scan workers.
pub trait FactStore: Send + Sync {
    /// Replace everything stored for one program and advance its mtime
    ///
    /// # Guarantees
    /// - One transaction: either all old facts are replaced and the mtime is
    ///   updated, or nothing changes
    /// - Clears the program's `missing` and `read_failed` flags on commit
    fn replace_program_facts(&self, facts: &ProgramFacts) -> Result<()>;

    /// path -> stored mtime for every program
    fn stored_mtimes(&self) -> Result<HashMap<String, i64>>;

    fn program(&self, path: &str) -> Result<Option<ProgramRecord>>;

    fn all_programs(&self) -> Result<Vec<ProgramRecord>>;

    /// Table operations of a program in insertion order
    fn operations_for_program(&self, program: &str) -> Result<Vec<TableOperation>>;

    /// Every operation on a table, ordered by program then insertion order
    fn operations_for_table(&self, table: &str) -> Result<Vec<TableOperation>>;

    /// Dependencies whose source is `program`, in insertion order
    fn dependencies_from(&self, program: &str) -> Result<Vec<ProgramDependency>>;

    /// Dependencies whose resolved target is `program`
    fn dependencies_to(&self, program: &str) -> Result<Vec<ProgramDependency>>;

    /// Every stored `macro_call` dependency
    fn macro_call_dependencies(&self) -> Result<Vec<ProgramDependency>>;

    fn libnames_for_program(&self, program: &str) -> Result<Vec<LibnameMapping>>;

    /// Programs with at least one literal credential finding
    fn programs_with_credentials(&self) -> Result<Vec<ProgramRecord>>;

    /// Raise a flag; re-raising `missing` keeps its original timestamp
    fn set_flag(&self, path: &str, flag: ProgramFlag, detail: Option<&str>) -> Result<()>;

    /// Returns true when a flag was removed
    fn clear_flag(&self, path: &str, flag: ProgramFlag) -> Result<bool>;

    fn flags(&self) -> Result<Vec<FlagRecord>>;

    fn counts(&self) -> Result<StoreCounts>;
}
