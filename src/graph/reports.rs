//! Flat reports over the fact relations

use serde::Serialize;

use super::QueryError;
use crate::facts::{CredentialFinding, OperationKind, TableOperation};
use crate::store::FactStore;

/// Every program reading or writing one table
#[derive(Debug, Clone, Serialize)]
pub struct TableUsage {
    pub table: String,
    pub writers: Vec<TableOperation>,
    pub readers: Vec<TableOperation>,
}

impl TableUsage {
    /// Writes stored with `in_scope = false`
    pub fn out_of_scope_writes(&self) -> usize {
        self.writers.iter().filter(|op| !op.in_scope).count()
    }
}

pub fn table_usage(store: &dyn FactStore, table: &str) -> Result<TableUsage, QueryError> {
    let ops = store.operations_for_table(table)?;
    if ops.is_empty() {
        return Err(QueryError::NotFound(table.to_string()));
    }
    let (writers, readers) = ops
        .into_iter()
        .partition(|op| op.operation == OperationKind::Write);
    Ok(TableUsage {
        table: table.to_ascii_lowercase(),
        writers,
        readers,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramCredentials {
    pub path: String,
    pub findings: Vec<CredentialFinding>,
}

/// Programs holding literal credentials, sorted by path
pub fn credential_report(store: &dyn FactStore) -> Result<Vec<ProgramCredentials>, QueryError> {
    Ok(store
        .programs_with_credentials()?
        .into_iter()
        .map(|p| ProgramCredentials {
            path: p.path,
            findings: p.credential_findings,
        })
        .collect())
}
