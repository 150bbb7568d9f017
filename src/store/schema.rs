//! SQLite schema for the fact relations

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Bumped whenever a relation changes shape
pub const SCHEMA_VERSION: i64 = 1;

const TABLES: &[(&str, &str)] = &[
    (
        "sasmap_meta",
        "CREATE TABLE IF NOT EXISTS sasmap_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )",
    ),
    (
        "programs",
        "CREATE TABLE IF NOT EXISTS programs (
            path TEXT PRIMARY KEY,
            mtime INTEGER NOT NULL,
            scan_timestamp TEXT NOT NULL,
            credential_findings TEXT NOT NULL DEFAULT '[]'
        )",
    ),
    (
        "table_operations",
        "CREATE TABLE IF NOT EXISTS table_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            program TEXT NOT NULL,
            table_name TEXT NOT NULL,
            db_type TEXT NOT NULL,
            operation_type TEXT NOT NULL,
            source_line INTEGER NOT NULL,
            in_scope INTEGER NOT NULL DEFAULT 1
        )",
    ),
    (
        "program_dependencies",
        "CREATE TABLE IF NOT EXISTS program_dependencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            target TEXT NOT NULL,
            type TEXT NOT NULL,
            reference TEXT NOT NULL,
            source_line INTEGER NOT NULL
        )",
    ),
    (
        "libname_mappings",
        "CREATE TABLE IF NOT EXISTS libname_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            libref TEXT NOT NULL,
            engine TEXT NOT NULL,
            resolution TEXT NOT NULL,
            target TEXT,
            source_program TEXT NOT NULL,
            source_line INTEGER NOT NULL
        )",
    ),
    (
        "program_flags",
        "CREATE TABLE IF NOT EXISTS program_flags (
            path TEXT NOT NULL,
            flag TEXT NOT NULL,
            detail TEXT,
            flagged_at INTEGER NOT NULL,
            PRIMARY KEY (path, flag)
        )",
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_table_operations_program ON table_operations(program)",
    "CREATE INDEX IF NOT EXISTS idx_table_operations_table ON table_operations(table_name)",
    "CREATE INDEX IF NOT EXISTS idx_program_dependencies_source ON program_dependencies(source)",
    "CREATE INDEX IF NOT EXISTS idx_program_dependencies_target ON program_dependencies(target)",
    "CREATE INDEX IF NOT EXISTS idx_libname_mappings_program ON libname_mappings(source_program)",
];

/// Create every relation and index, then check the stored schema version
///
/// # Guarantees
/// - Idempotent: safe to run on every open
/// - A database written by a newer schema is rejected rather than modified
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    for (name, ddl) in TABLES {
        conn.execute(ddl, [])
            .map_err(|e| anyhow::anyhow!("Failed to create {} table: {}", name, e))?;
    }
    for ddl in INDEXES {
        conn.execute(ddl, [])
            .map_err(|e| anyhow::anyhow!("Failed to create index: {}", e))?;
    }

    let stored: Option<i64> = conn
        .query_row("SELECT schema_version FROM sasmap_meta WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match stored {
        None => {
            conn.execute(
                "INSERT INTO sasmap_meta (id, schema_version, created_at) VALUES (1, ?1, ?2)",
                params![SCHEMA_VERSION, chrono::Utc::now().timestamp()],
            )
            .map_err(|e| anyhow::anyhow!("Failed to record schema version: {}", e))?;
        }
        Some(version) if version > SCHEMA_VERSION => {
            anyhow::bail!(
                "Database schema version {} is newer than supported version {}",
                version,
                SCHEMA_VERSION
            );
        }
        Some(_) => {}
    }
    Ok(())
}
