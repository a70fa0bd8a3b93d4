//! End-to-end runs of the rigger binary without a cluster

use std::process::{Command, Output};
use tempfile::TempDir;

fn fixtures_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures")
}

/// Run rigger with an isolated home and default logging
fn rigger(home: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rigger"))
        .args(args)
        .env("HOME", home.path())
        .env("XDG_CACHE_HOME", home.path().join("cache"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("RUST_LOG", "info")
        .env_remove("RIGGER_NAMESPACE")
        .env_remove("RIGGER_STORAGE_DRIVER")
        .output()
        .expect("failed to execute rigger")
}

fn dry_run(home: &TempDir, extra: &[&str]) -> Output {
    let chart = format!("{}/demo-chart", fixtures_path());
    let mut args = vec![
        "--chartName",
        chart.as_str(),
        "--releaseName",
        "demo",
        "--storage-driver",
        "memory",
        "--dry-run",
    ];
    args.extend_from_slice(extra);
    rigger(home, &args)
}

#[test]
fn test_help() {
    let home = TempDir::new().unwrap();
    let output = rigger(&home, &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--chartName"));
    assert!(stdout.contains("--releaseName"));
    assert!(stdout.contains("--repoURL"));
    assert!(stdout.contains("--storage-driver"));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    let home = TempDir::new().unwrap();
    let output = rigger(&home, &["--chart", "web"]);

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn test_dry_run_installs_first_revision() {
    let home = TempDir::new().unwrap();
    let output = dry_run(&home, &["--values", "greeting=hi, replicas=2"]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "rigger failed: {stderr}");
    assert!(stderr.contains("received arguments"));
    assert!(stderr.contains("Successfully installed or updated release demo at revision 1"));
    assert!(stderr.contains("Deployment/demo-demo-chart"));
}

#[test]
fn test_dry_run_with_subchart_enabled() {
    let home = TempDir::new().unwrap();
    let output = dry_run(&home, &["--values", "cache.enabled=true"]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "rigger failed: {stderr}");
    assert!(stderr.contains("Service/demo-cache"));
}

#[test]
fn test_json_logs() {
    let home = TempDir::new().unwrap();
    let output = dry_run(&home, &["--log-format", "json"]);

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr
        .lines()
        .filter(|line| line.starts_with('{'))
        .last()
        .expect("no JSON log lines");
    assert!(last.contains("Successfully installed or updated release demo at revision 1"));
}

#[test]
fn test_malformed_values_exit_code() {
    let home = TempDir::new().unwrap();
    let output = dry_run(&home, &["--values", "greeting"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("expected key=value"));
}

#[test]
fn test_invalid_release_name() {
    let home = TempDir::new().unwrap();
    let chart = format!("{}/demo-chart", fixtures_path());
    let output = rigger(
        &home,
        &[
            "--chartName",
            &chart,
            "--releaseName",
            "Not_Valid",
            "--storage-driver",
            "memory",
            "--dry-run",
        ],
    );

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn test_unknown_storage_driver() {
    let home = TempDir::new().unwrap();
    let output = rigger(&home, &["--storage-driver", "sql", "--dry-run"]);

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("sql"));
}

#[test]
fn test_missing_chart_is_resolution_error() {
    let home = TempDir::new().unwrap();
    let output = rigger(
        &home,
        &[
            "--chartName",
            "/nonexistent/chart",
            "--releaseName",
            "demo",
            "--storage-driver",
            "memory",
            "--dry-run",
        ],
    );

    assert_eq!(output.status.code(), Some(3));
}
