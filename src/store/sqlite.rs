//! SQLite-backed fact store

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::schema::ensure_schema;
use super::{FactStore, FlagRecord, ProgramFlag, StoreCounts};
use crate::facts::{
    CredentialFinding, DependencyKind, DependencyTarget, Engine, LibnameMapping, OperationKind,
    ProgramDependency, ProgramFacts, ProgramRecord, ResolutionSource, TableOperation,
};

const OPERATION_COLUMNS: &str =
    "program, table_name, db_type, operation_type, source_line, in_scope";
const DEPENDENCY_COLUMNS: &str = "source, target, type, reference, source_line";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the fact database
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Store connection lock poisoned"))
    }

    fn query_operations(&self, filter: &str, value: &str) -> Result<Vec<TableOperation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM table_operations WHERE {} = ?1 ORDER BY program, id",
            OPERATION_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], operation_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| anyhow::anyhow!("Failed to read table operations: {}", e))
    }

    fn query_dependencies(&self, filter: &str, value: &str) -> Result<Vec<ProgramDependency>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM program_dependencies WHERE {} = ?1 ORDER BY source, id",
            DEPENDENCY_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], dependency_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| anyhow::anyhow!("Failed to read program dependencies: {}", e))
    }

    fn query_programs(&self, sql: &str) -> Result<Vec<ProgramRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut programs = Vec::new();
        for row in rows {
            let (path, mtime, scan_timestamp, findings) = row?;
            programs.push(program_record(path, mtime, scan_timestamp, &findings)?);
        }
        Ok(programs)
    }
}

fn program_record(
    path: String,
    mtime: i64,
    scan_timestamp: String,
    findings_json: &str,
) -> Result<ProgramRecord> {
    let credential_findings: Vec<CredentialFinding> = serde_json::from_str(findings_json)
        .with_context(|| format!("Corrupt credential findings for {}", path))?;
    Ok(ProgramRecord {
        path,
        mtime,
        scan_timestamp,
        credential_findings,
    })
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<TableOperation> {
    let engine: String = row.get(2)?;
    let operation: String = row.get(3)?;
    let source_line: i64 = row.get(4)?;
    Ok(TableOperation {
        program: row.get(0)?,
        table: row.get(1)?,
        engine: Engine::from_str(&engine).unwrap_or(Engine::Unknown),
        operation: OperationKind::from_str(&operation).unwrap_or(OperationKind::Read),
        source_line: source_line as usize,
        in_scope: row.get(5)?,
    })
}

fn dependency_from_row(row: &Row<'_>) -> rusqlite::Result<ProgramDependency> {
    let target: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let source_line: i64 = row.get(4)?;
    Ok(ProgramDependency {
        source: row.get(0)?,
        target: DependencyTarget::from_stored(&target),
        kind: DependencyKind::from_str(&kind).unwrap_or(DependencyKind::Include),
        reference: row.get(3)?,
        source_line: source_line as usize,
    })
}

fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let n: i64 = conn
        .query_row(sql, [], |row| row.get(0))
        .map_err(|e| anyhow::anyhow!("Count query failed: {}", e))?;
    Ok(n as usize)
}

impl FactStore for SqliteStore {
    fn replace_program_facts(&self, facts: &ProgramFacts) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let path = facts.program.path.as_str();

        tx.execute("DELETE FROM table_operations WHERE program = ?1", params![path])?;
        tx.execute("DELETE FROM program_dependencies WHERE source = ?1", params![path])?;
        tx.execute(
            "DELETE FROM libname_mappings WHERE source_program = ?1",
            params![path],
        )?;

        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO table_operations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                OPERATION_COLUMNS
            ))?;
            for op in &facts.operations {
                insert.execute(params![
                    path,
                    op.table,
                    op.engine.as_str(),
                    op.operation.as_str(),
                    op.source_line as i64,
                    op.in_scope,
                ])?;
            }

            let mut insert = tx.prepare(&format!(
                "INSERT INTO program_dependencies ({}) VALUES (?1, ?2, ?3, ?4, ?5)",
                DEPENDENCY_COLUMNS
            ))?;
            for dep in &facts.dependencies {
                insert.execute(params![
                    path,
                    dep.target.as_stored(),
                    dep.kind.as_str(),
                    dep.reference,
                    dep.source_line as i64,
                ])?;
            }

            let mut insert = tx.prepare(
                "INSERT INTO libname_mappings
                    (libref, engine, resolution, target, source_program, source_line)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for lib in &facts.libnames {
                insert.execute(params![
                    lib.libref,
                    lib.engine.as_str(),
                    lib.resolution.as_str(),
                    lib.target,
                    path,
                    lib.source_line as i64,
                ])?;
            }
        }

        // Facts first, mtime last, one commit
        let findings = serde_json::to_string(&facts.program.credential_findings)?;
        tx.execute(
            "INSERT INTO programs (path, mtime, scan_timestamp, credential_findings)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                mtime = excluded.mtime,
                scan_timestamp = excluded.scan_timestamp,
                credential_findings = excluded.credential_findings",
            params![path, facts.program.mtime, facts.program.scan_timestamp, findings],
        )?;
        tx.execute(
            "DELETE FROM program_flags WHERE path = ?1 AND flag IN ('missing', 'read_failed')",
            params![path],
        )?;

        tx.commit()
            .map_err(|e| anyhow::anyhow!("Failed to commit facts for {}: {}", path, e))
    }

    fn stored_mtimes(&self) -> Result<HashMap<String, i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT path, mtime FROM programs")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        rows.collect::<rusqlite::Result<HashMap<String, i64>>>()
            .map_err(|e| anyhow::anyhow!("Failed to read stored mtimes: {}", e))
    }

    fn program(&self, path: &str) -> Result<Option<ProgramRecord>> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT path, mtime, scan_timestamp, credential_findings FROM programs WHERE path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?
        };
        row.map(|(path, mtime, ts, findings)| program_record(path, mtime, ts, &findings))
            .transpose()
    }

    fn all_programs(&self) -> Result<Vec<ProgramRecord>> {
        self.query_programs(
            "SELECT path, mtime, scan_timestamp, credential_findings FROM programs ORDER BY path",
        )
    }

    fn operations_for_program(&self, program: &str) -> Result<Vec<TableOperation>> {
        self.query_operations("program", program)
    }

    fn operations_for_table(&self, table: &str) -> Result<Vec<TableOperation>> {
        self.query_operations("table_name", &table.to_ascii_lowercase())
    }

    fn dependencies_from(&self, program: &str) -> Result<Vec<ProgramDependency>> {
        self.query_dependencies("source", program)
    }

    fn dependencies_to(&self, program: &str) -> Result<Vec<ProgramDependency>> {
        self.query_dependencies("target", program)
    }

    fn macro_call_dependencies(&self) -> Result<Vec<ProgramDependency>> {
        self.query_dependencies("type", DependencyKind::MacroCall.as_str())
    }

    fn libnames_for_program(&self, program: &str) -> Result<Vec<LibnameMapping>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT libref, engine, resolution, target, source_program, source_line
             FROM libname_mappings WHERE source_program = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![program], |row| {
            let engine: String = row.get(1)?;
            let resolution: String = row.get(2)?;
            let source_line: i64 = row.get(5)?;
            Ok(LibnameMapping {
                libref: row.get(0)?,
                engine: Engine::from_str(&engine).unwrap_or(Engine::Unknown),
                resolution: ResolutionSource::from_str(&resolution)
                    .unwrap_or(ResolutionSource::Unknown),
                target: row.get(3)?,
                source_program: row.get(4)?,
                source_line: source_line as usize,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| anyhow::anyhow!("Failed to read libname mappings: {}", e))
    }

    fn programs_with_credentials(&self) -> Result<Vec<ProgramRecord>> {
        self.query_programs(
            "SELECT path, mtime, scan_timestamp, credential_findings FROM programs
             WHERE credential_findings != '[]' ORDER BY path",
        )
    }

    fn set_flag(&self, path: &str, flag: ProgramFlag, detail: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let sql = match flag {
            ProgramFlag::Missing => {
                "INSERT OR IGNORE INTO program_flags (path, flag, detail, flagged_at)
                 VALUES (?1, ?2, ?3, ?4)"
            }
            ProgramFlag::ReadFailed => {
                "INSERT INTO program_flags (path, flag, detail, flagged_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path, flag) DO UPDATE SET
                    detail = excluded.detail,
                    flagged_at = excluded.flagged_at"
            }
        };
        conn.execute(sql, params![path, flag.as_str(), detail, now])
            .map_err(|e| anyhow::anyhow!("Failed to flag {} as {}: {}", path, flag.as_str(), e))?;
        Ok(())
    }

    fn clear_flag(&self, path: &str, flag: ProgramFlag) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM program_flags WHERE path = ?1 AND flag = ?2",
            params![path, flag.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn flags(&self) -> Result<Vec<FlagRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT path, flag, detail, flagged_at FROM program_flags ORDER BY path, flag",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut flags = Vec::new();
        for row in rows {
            let (path, flag, detail, flagged_at) = row?;
            // Flags written by a newer version are skipped
            if let Some(flag) = ProgramFlag::from_str(&flag) {
                flags.push(FlagRecord {
                    path,
                    flag,
                    detail,
                    flagged_at,
                });
            }
        }
        Ok(flags)
    }

    fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn()?;
        Ok(StoreCounts {
            programs: count(&conn, "SELECT COUNT(*) FROM programs")?,
            table_operations: count(&conn, "SELECT COUNT(*) FROM table_operations")?,
            out_of_scope_writes: count(
                &conn,
                "SELECT COUNT(*) FROM table_operations WHERE in_scope = 0",
            )?,
            dependencies: count(&conn, "SELECT COUNT(*) FROM program_dependencies")?,
            unknown_dependencies: count(
                &conn,
                "SELECT COUNT(*) FROM program_dependencies WHERE target = 'unknown'",
            )?,
            libname_mappings: count(&conn, "SELECT COUNT(*) FROM libname_mappings")?,
            programs_with_credentials: count(
                &conn,
                "SELECT COUNT(*) FROM programs WHERE credential_findings != '[]'",
            )?,
            missing: count(
                &conn,
                "SELECT COUNT(*) FROM program_flags WHERE flag = 'missing'",
            )?,
            read_failed: count(
                &conn,
                "SELECT COUNT(*) FROM program_flags WHERE flag = 'read_failed'",
            )?,
        })
    }
}
