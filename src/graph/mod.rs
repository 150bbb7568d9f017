//! Impact graph queries over persisted facts
//!
//! No graph is materialized. Every query walks the current fact relations
//! through [`FactStore`](crate::store::FactStore), so results always reflect the
//! latest committed scan.

pub mod impact;
pub mod reports;

use thiserror::Error;

use crate::error_codes;

pub use impact::{
    classify, impact, program_closure, Direction, EdgeKind, ImpactNode, ImpactResult, NodeKind,
};
pub use reports::{credential_report, table_usage, ProgramCredentials, TableUsage};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Not found: '{0}' is neither a stored program nor a stored table")]
    NotFound(String),

    #[error("'{0}' is a table, not a program")]
    NotAProgram(String),

    #[error("max depth must be at least 1")]
    InvalidDepth,

    #[error("Store failure: {0}")]
    Store(String),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::NotFound(_) => error_codes::SASMAP_QRY_001_NOT_FOUND,
            QueryError::NotAProgram(_) | QueryError::InvalidDepth => {
                error_codes::SASMAP_QRY_002_INVALID_PARAMS
            }
            QueryError::Store(_) => error_codes::SASMAP_SCN_002_STORE_FAILED,
        }
    }
}

impl From<anyhow::Error> for QueryError {
    fn from(e: anyhow::Error) -> Self {
        QueryError::Store(format!("{:#}", e))
    }
}
