//! sasmap: a deterministic SAS codebase mapping tool
//!
//! sasmap lists SAS programs under configured roots, extracts the tables they
//! read and write, the programs they include and the macros they call, resolves
//! those references against LIBNAME statements, macro variables and a catalog
//! of shared macros, and persists the facts to SQLite for impact queries.
//!
//! # Position Conventions
//!
//! - **Line numbers**: 1-indexed (line 1 is the first line)
//! - **Offsets**: 0-indexed byte offsets from file start; "earlier in the file"
//!   always means a smaller offset
//!
//! # Pipeline
//!
//! ```text
//! FileSource ──list/read──▶ scan ──▶ extract ──▶ resolve ──▶ FactStore
//!                              │                    ▲
//!                              └── macro root ──▶ catalog
//! ```
//!
//! Queries in [`graph`] read the store directly; no graph is kept in memory
//! between commands.

pub mod catalog;
pub mod config;
pub mod error_codes;
pub mod extract;
pub mod facts;
pub mod graph;
pub mod output;
pub mod resolve;
pub mod scan;
pub mod source;
pub mod store;
pub mod version;

pub use catalog::{MacroCatalog, MacroCatalogBuilder};
pub use config::{ConfigError, ScanConfig};
pub use extract::{extract, ExtractedFacts};
pub use facts::{
    CredentialFinding, DependencyKind, DependencyTarget, Engine, LibnameMapping, OperationKind,
    ProgramDependency, ProgramFacts, ProgramRecord, ResolutionSource, TableOperation, UNKNOWN,
};
pub use graph::{impact, Direction, ImpactNode, ImpactResult, QueryError};
pub use output::{generate_execution_id, output_json, JsonResponse, OutputFormat};
pub use resolve::{resolve_program, ResolveOptions};
pub use scan::{run_scan, ScanError, ScanProgress, ScanReport, Scanner};
pub use source::{FileSource, LocalSource, MemorySource, RemoteEntry, SourceError};
pub use store::{FactStore, SqliteStore};
pub use version::version;
