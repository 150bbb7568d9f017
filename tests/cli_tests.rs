//! CLI tests for the sasmap binary
//!
//! Builds a local mirror of a remote tree, runs the binary against it and checks
//! the JSON envelopes and exit codes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn bin_path() -> String {
    std::env::var("CARGO_BIN_EXE_sasmap").unwrap_or_else(|_| {
        let mut path = std::env::current_exe().unwrap();
        path.pop();
        path.pop();
        path.push("sasmap");
        path.to_str().unwrap().to_string()
    })
}

/// Mirror with one macro program and two jobs, plus a config pointing at it
fn workspace() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let mirror = dir.path().join("mirror");
    fs::create_dir_all(mirror.join("prod/macros")).unwrap();
    fs::create_dir_all(mirror.join("prod/jobs/.snapshots")).unwrap();
    fs::write(
        mirror.join("prod/macros/util.sas"),
        "%macro load_data;\n%put loading;\n%mend;\n",
    )
    .unwrap();
    fs::write(
        mirror.join("prod/jobs/load.sas"),
        "libname dw oracle schema=ods;\ndata dw.stage; set dw.source; run;\n%load_data;\n",
    )
    .unwrap();
    fs::write(
        mirror.join("prod/jobs/report.sas"),
        "libname dw oracle schema=ods;\ndata dw.report; set dw.stage; run;\n",
    )
    .unwrap();
    fs::write(
        mirror.join("prod/jobs/.snapshots/old.sas"),
        "data dw.ignored; run;\n",
    )
    .unwrap();

    let config = dir.path().join("sasmap.yaml");
    fs::write(
        &config,
        format!(
            "database: sasmap.db\nroots: [/prod/macros, /prod/jobs]\nmacro_root: /prod/macros\nworkers: 2\nremote:\n  base_dir: {}\n  retries: 0\n",
            mirror.display()
        ),
    )
    .unwrap();
    (dir, config)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .arg("--config")
        .arg(config)
        .output()
        .expect("Failed to start sasmap binary")
}

fn json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad JSON ({}): {}", e, stdout))
}

#[test]
fn test_scan_then_status() {
    let (_dir, config) = workspace();

    let output = run(&config, &["scan", "--output", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let scan = json(&output);
    assert_eq!(scan["schema_version"], "1.0.0");
    assert!(scan["execution_id"].is_string());
    assert_eq!(scan["data"]["listed"], 3);
    assert_eq!(scan["data"]["scanned"].as_array().unwrap().len(), 3);
    assert_eq!(scan["data"]["catalog_size"], 1);

    let again = json(&run(&config, &["scan", "--output", "json"]));
    assert_eq!(again["data"]["scanned"].as_array().unwrap().len(), 0);
    assert_eq!(again["data"]["unchanged"], 3);

    let status = json(&run(&config, &["status", "--output", "json"]));
    assert_eq!(status["data"]["counts"]["programs"], 3);
    assert_eq!(status["data"]["counts"]["table_operations"], 4);
    assert_eq!(status["data"]["flags"].as_array().unwrap().len(), 0);
}

#[test]
fn test_impact_and_table_commands() {
    let (_dir, config) = workspace();
    assert!(run(&config, &["scan"]).status.success());

    let output = run(&config, &["impact", "/prod/jobs/load.sas", "--output", "json"]);
    assert!(output.status.success());
    let impact = json(&output);
    let nodes: Vec<&str> = impact["data"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["node"].as_str().unwrap())
        .collect();
    assert_eq!(nodes, vec!["ods.stage", "/prod/jobs/report.sas", "ods.report"]);

    let output = run(&config, &["downstream", "/prod/macros/util.sas", "--output", "json"]);
    assert!(output.status.success());
    let downstream: Vec<String> = json(&output)["data"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["node"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(downstream, vec!["/prod/jobs/load.sas", "/prod/jobs/report.sas"]);

    let upstream = json(&run(&config, &["upstream", "/prod/jobs/report.sas", "--output", "json"]));
    assert_eq!(upstream["data"]["nodes"][0]["node"], "/prod/jobs/load.sas");
    assert_eq!(upstream["data"]["nodes"][1]["node"], "/prod/macros/util.sas");

    let table = json(&run(&config, &["table", "ODS.STAGE", "--output", "json"]));
    assert_eq!(table["data"]["table"], "ods.stage");
    assert_eq!(table["data"]["writers"][0]["program"], "/prod/jobs/load.sas");
    assert_eq!(table["data"]["readers"][0]["program"], "/prod/jobs/report.sas");

    let human = run(&config, &["impact", "ods.stage", "--direction", "backward"]);
    assert!(human.status.success());
    assert!(String::from_utf8_lossy(&human.stdout).contains("/prod/jobs/load.sas"));
}

#[test]
fn test_unknown_identifier_reports_code() {
    let (_dir, config) = workspace();
    assert!(run(&config, &["scan"]).status.success());

    let output = run(&config, &["impact", "nowhere.table", "--output", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let err = json(&output);
    assert_eq!(err["data"]["error"], "SASMAP-QRY-001");
}

#[test]
fn test_query_before_scan_fails() {
    let (_dir, config) = workspace();
    let output = run(&config, &["status"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("sasmap scan"));
}

#[test]
fn test_invalid_config_exits_with_2() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.yaml");
    fs::write(&config, "roots: [/a]\nmacro_root: /b\n").unwrap();

    let output = run(&config, &["scan", "--output", "json"]);

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(json(&output)["data"]["error"], "SASMAP-CFG-002");
}

#[test]
fn test_version_command() {
    let output = Command::new(bin_path()).arg("version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("sasmap "));
}
