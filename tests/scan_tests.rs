//! Scan pass integration tests
//!
//! Drives full passes against an in-memory source and a SQLite store on disk.

use sasmap::config::{RemoteConfig, ScanConfig};
use sasmap::facts::{DependencyKind, DependencyTarget, OperationKind};
use sasmap::scan::{run_scan, ScanError, SelectionReason};
use sasmap::source::MemorySource;
use sasmap::store::{FactStore, ProgramFlag, SqliteStore};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const UTIL: &str = "/prod/macros/util.sas";
const JOB_A: &str = "/prod/jobs/a.sas";
const JOB_B: &str = "/prod/jobs/b.sas";
const JOB_A_TEXT: &str =
    "libname dw oracle schema=ods;\ndata dw.sales; set dw.raw; run;\n%load_data;\n";

fn config(db: &Path) -> ScanConfig {
    ScanConfig {
        database: db.to_path_buf(),
        roots: vec!["/prod/macros".to_string(), "/prod/jobs".to_string()],
        macro_root: "/prod/macros".to_string(),
        workers: 2,
        remote: RemoteConfig {
            base_dir: None,
            read_timeout_secs: 5,
            retries: 1,
            retry_backoff_ms: 0,
        },
        ..ScanConfig::default()
    }
}

fn fixture() -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    source.insert(UTIL, 10, "%macro load_data;\n%put loading;\n%mend load_data;\n");
    source.insert(JOB_A, 10, JOB_A_TEXT);
    source.insert(
        JOB_B,
        10,
        "libname dw oracle schema=ods;\ndata dw.report; set dw.sales; run;\n",
    );
    source
}

fn setup() -> (TempDir, ScanConfig, SqliteStore, Arc<MemorySource>) {
    let dir = TempDir::new().unwrap();
    let config = config(&dir.path().join("sasmap.db"));
    let store = SqliteStore::open(&config.database).unwrap();
    (dir, config, store, fixture())
}

/// Every row of the four fact relations, column by column, in rowid order
fn dump_relations(db: &Path) -> Vec<String> {
    let conn = rusqlite::Connection::open(db).unwrap();
    let mut rows = Vec::new();
    for table in ["programs", "table_operations", "program_dependencies", "libname_mappings"] {
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", table))
            .unwrap();
        let columns = stmt.column_count();
        let mut query = stmt.query([]).unwrap();
        while let Some(row) = query.next().unwrap() {
            let values: Vec<String> = (0..columns)
                .map(|i| format!("{:?}", row.get_ref(i).unwrap()))
                .collect();
            rows.push(format!("{}|{}", table, values.join("|")));
        }
    }
    rows
}

fn scanned_paths(report: &sasmap::scan::ScanReport) -> Vec<String> {
    let mut paths: Vec<String> = report.scanned.iter().map(|s| s.path.clone()).collect();
    paths.sort();
    paths
}

#[test]
fn test_first_pass_persists_every_program() {
    let (_dir, config, store, source) = setup();

    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    assert_eq!(report.listed, 3);
    assert_eq!(scanned_paths(&report), vec![JOB_A, JOB_B, UTIL]);
    assert!(report.scanned.iter().all(|s| s.reason == SelectionReason::New));
    assert!(report.catalog_built);
    assert_eq!(report.catalog_size, 1);

    let ops = store.operations_for_program(JOB_A).unwrap();
    let tables: Vec<(&str, OperationKind)> =
        ops.iter().map(|o| (o.table.as_str(), o.operation)).collect();
    assert_eq!(
        tables,
        vec![("ods.sales", OperationKind::Write), ("ods.raw", OperationKind::Read)]
    );

    let deps = store.dependencies_from(JOB_A).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].kind, DependencyKind::MacroCall);
    assert_eq!(deps[0].target, DependencyTarget::Program(UTIL.to_string()));
    assert_eq!(deps[0].source_line, 3);

    assert_eq!(store.program(JOB_B).unwrap().unwrap().mtime, 10);
}

#[test]
fn test_rescan_without_changes_selects_nothing() {
    let (_dir, config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();
    let before = dump_relations(&config.database);
    let reads = source.total_reads();

    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    assert!(report.scanned.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.unchanged, 3);
    assert!(!report.catalog_built);
    assert!(before.len() > 3);
    assert_eq!(dump_relations(&config.database), before);
    assert_eq!(source.total_reads(), reads, "an idle pass reads nothing");
}

#[test]
fn test_mtime_gate_is_strict() {
    let (_dir, config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();

    // Equal and lower mtimes keep stored facts even when the text changed
    source.insert(JOB_B, 10, "data other; run;\n");
    assert!(run_scan(&config, source.clone(), &store, None).unwrap().scanned.is_empty());
    source.insert(JOB_B, 9, "data other; run;\n");
    assert!(run_scan(&config, source.clone(), &store, None).unwrap().scanned.is_empty());
    assert_eq!(store.operations_for_program(JOB_B).unwrap()[0].table, "ods.report");

    source.insert(JOB_B, 11, "data other; run;\n");
    let report = run_scan(&config, source.clone(), &store, None).unwrap();
    assert_eq!(scanned_paths(&report), vec![JOB_B]);
    assert_eq!(report.scanned[0].reason, SelectionReason::Modified);
    assert_eq!(store.operations_for_program(JOB_B).unwrap()[0].table, "work.other");
    assert_eq!(store.program(JOB_B).unwrap().unwrap().mtime, 11);
}

#[test]
fn test_full_rescan_selects_everything() {
    let (_dir, mut config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();
    let counts = store.counts().unwrap();

    config.full_rescan = true;
    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    assert_eq!(report.scanned.len(), 3);
    assert!(report
        .scanned
        .iter()
        .all(|s| s.reason == SelectionReason::FullRescan));
    assert_eq!(store.counts().unwrap(), counts, "facts are replaced, not duplicated");
}

#[test]
fn test_macro_root_definition_wins_over_job_definition() {
    let (_dir, config, store, source) = setup();
    source.insert(
        "/prod/jobs/local.sas",
        10,
        "%macro load_data;\n%put shadow;\n%mend;\n",
    );

    run_scan(&config, source.clone(), &store, None).unwrap();

    let deps = store.dependencies_from(JOB_A).unwrap();
    assert_eq!(deps[0].target, DependencyTarget::Program(UTIL.to_string()));
}

#[test]
fn test_read_failure_keeps_previous_facts() {
    let (_dir, config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();

    source.insert(JOB_A, 20, "data dw.replaced; run;\n");
    source.fail_always(JOB_A);
    let before = source.read_count(JOB_A);
    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, JOB_A);
    assert_eq!(source.read_count(JOB_A) - before, 2, "one try plus one retry");
    assert_eq!(store.operations_for_program(JOB_A).unwrap()[0].table, "ods.sales");
    assert_eq!(store.program(JOB_A).unwrap().unwrap().mtime, 10);
    let flags = store.flags().unwrap();
    assert!(flags
        .iter()
        .any(|f| f.path == JOB_A && f.flag == ProgramFlag::ReadFailed));

    // Still newer than stored, so the next pass retries it
    source.heal(JOB_A);
    let report = run_scan(&config, source.clone(), &store, None).unwrap();
    assert_eq!(scanned_paths(&report), vec![JOB_A]);
    assert_eq!(store.operations_for_program(JOB_A).unwrap()[0].table, "dw.replaced");
    assert!(store.flags().unwrap().is_empty());
}

#[test]
fn test_transient_failure_within_retries_succeeds() {
    let (_dir, config, store, source) = setup();
    source.fail_reads(JOB_B, 1);

    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(report.scanned.len(), 3);
}

#[test]
fn test_missing_program_is_flagged_and_recovers() {
    let (_dir, config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();

    source.remove(JOB_B);
    let report = run_scan(&config, source.clone(), &store, None).unwrap();
    assert_eq!(report.missing, vec![JOB_B.to_string()]);
    assert!(store.program(JOB_B).unwrap().is_some(), "facts are never deleted");
    let flags = store.flags().unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].flag, ProgramFlag::Missing);
    let flagged_at = flags[0].flagged_at;

    // Still missing: flag kept with its first timestamp
    run_scan(&config, source.clone(), &store, None).unwrap();
    assert_eq!(store.flags().unwrap()[0].flagged_at, flagged_at);

    source.insert(JOB_B, 10, "data dw.report; run;\n");
    let report = run_scan(&config, source.clone(), &store, None).unwrap();
    assert_eq!(report.reappeared, vec![JOB_B.to_string()]);
    assert!(report.missing.is_empty());
    assert!(report.scanned.is_empty(), "same mtime, stored facts reused");
    assert!(store.flags().unwrap().is_empty());
}

#[test]
fn test_catalog_drift_reresolves_unchanged_callers() {
    let (_dir, config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();

    // Sorts before util.sas, so its definition now wins
    source.insert("/prod/macros/aaa.sas", 30, "%macro load_data;\n%mend;\n");
    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    let reasons: BTreeMap<&str, SelectionReason> = report
        .scanned
        .iter()
        .map(|s| (s.path.as_str(), s.reason))
        .collect();
    assert_eq!(reasons.get("/prod/macros/aaa.sas"), Some(&SelectionReason::New));
    assert_eq!(reasons.get(JOB_A), Some(&SelectionReason::CatalogChanged));
    assert!(!reasons.contains_key(JOB_B));
    assert_eq!(report.duplicate_macros.len(), 1);
    assert_eq!(report.duplicate_macros[0].kept, "/prod/macros/aaa.sas");

    let deps = store.dependencies_from(JOB_A).unwrap();
    assert_eq!(
        deps[0].target,
        DependencyTarget::Program("/prod/macros/aaa.sas".to_string())
    );
    assert_eq!(store.program(JOB_A).unwrap().unwrap().mtime, 10);
}

#[test]
fn test_catalog_drift_keeps_newer_stored_mtime() {
    let (_dir, config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();

    // Skewed listing: same text, older mtime
    source.insert(JOB_A, 7, JOB_A_TEXT);
    source.insert("/prod/macros/aaa.sas", 30, "%macro load_data;\n%mend;\n");
    let report = run_scan(&config, source.clone(), &store, None).unwrap();
    let reason = report.scanned.iter().find(|s| s.path == JOB_A).map(|s| s.reason);
    assert_eq!(reason, Some(SelectionReason::CatalogChanged));
    assert_eq!(store.program(JOB_A).unwrap().unwrap().mtime, 10);

    source.insert(JOB_A, 10, JOB_A_TEXT);
    let report = run_scan(&config, source.clone(), &store, None).unwrap();
    assert!(report.scanned.is_empty());
}

#[test]
fn test_dynamic_macro_call_is_stable_across_passes() {
    let (_dir, config, store, source) = setup();
    source.insert("/prod/jobs/dyn.sas", 10, "%let m = load_data;\n%&m;\n");
    run_scan(&config, source.clone(), &store, None).unwrap();

    let deps = store.dependencies_from("/prod/jobs/dyn.sas").unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].reference, "load_data");
    assert_eq!(deps[0].target, DependencyTarget::Program(UTIL.to_string()));

    // A modified job rebuilds the catalog, so drift is judged this pass
    source.insert(JOB_B, 11, "data x; run;\n");
    let report = run_scan(&config, source.clone(), &store, None).unwrap();
    assert!(report.catalog_built);
    assert_eq!(scanned_paths(&report), vec![JOB_B]);
}

#[test]
fn test_removed_macro_program_turns_calls_unknown() {
    let (_dir, config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();

    source.remove(UTIL);
    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    assert!(report.catalog_built);
    assert_eq!(report.catalog_size, 0);
    assert_eq!(scanned_paths(&report), vec![JOB_A]);
    assert!(store.dependencies_from(JOB_A).unwrap()[0].target.is_unknown());
}

#[test]
fn test_unreadable_macro_program_skips_drift() {
    let (_dir, config, store, source) = setup();
    run_scan(&config, source.clone(), &store, None).unwrap();

    source.insert(JOB_B, 11, "data x; run;\n");
    source.insert(UTIL, 11, "%macro renamed;\n%mend;\n");
    source.fail_always(UTIL);
    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    assert!(!report.catalog_complete);
    assert_eq!(scanned_paths(&report), vec![JOB_B]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(
        store.dependencies_from(JOB_A).unwrap()[0].target,
        DependencyTarget::Program(UTIL.to_string())
    );
}

#[test]
fn test_snowflake_scope_gating_end_to_end() {
    let (_dir, config, store, source) = setup();
    source.insert(
        "/prod/jobs/sf.sas",
        10,
        "libname sf snow database=SOME_DB schema=DATALAB_ILSNP;\n\
         libname bad snow database=SOME_DB schema=SOME_OTHER_SCHEMA;\n\
         data sf.t1; run;\n\
         data bad.t2; run;\n",
    );

    run_scan(&config, source.clone(), &store, None).unwrap();

    let ops = store.operations_for_program("/prod/jobs/sf.sas").unwrap();
    let gated: Vec<(&str, bool)> = ops.iter().map(|o| (o.table.as_str(), o.in_scope)).collect();
    assert_eq!(
        gated,
        vec![
            ("some_db.datalab_ilsnp.t1", true),
            ("some_db.some_other_schema.t2", false),
        ]
    );
    assert_eq!(store.counts().unwrap().out_of_scope_writes, 1);
}

#[test]
fn test_extension_and_exclude_filters() {
    let (_dir, mut config, store, source) = setup();
    source.insert("/prod/jobs/readme.txt", 10, "data nope; run;");
    source.insert("/prod/jobs/archive/old.sas", 10, "data nope; run;");
    config.exclude = vec!["**/archive/**".to_string()];

    let report = run_scan(&config, source.clone(), &store, None).unwrap();

    assert_eq!(report.listed, 3);
    assert!(store.program("/prod/jobs/archive/old.sas").unwrap().is_none());
}

#[test]
fn test_progress_reports_every_selected_program() {
    let (_dir, config, store, source) = setup();
    let seen = Mutex::new(Vec::new());
    let progress = |done: usize, total: usize| {
        seen.lock().unwrap().push((done, total));
    };

    run_scan(&config, source.clone(), &store, Some(&progress)).unwrap();

    let mut seen = seen.into_inner().unwrap();
    seen.sort();
    assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
}

#[test]
fn test_invalid_config_fails_before_reading() {
    let (_dir, mut config, store, source) = setup();
    config.macro_root = "/elsewhere".to_string();

    let err = run_scan(&config, source.clone(), &store, None).unwrap_err();

    assert!(matches!(err, ScanError::Config(_)));
    assert_eq!(source.total_reads(), 0);
    assert_eq!(store.counts().unwrap().programs, 0);
}
