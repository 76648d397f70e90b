//! CLI command contract tests.
//!
//! Runs the `tailf` binary against temp config files and checks exit codes,
//! output shape and error messages.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test fixture helpers
// =============================================================================

/// Temp dir with a `tailf.toml` holding `config`.
fn setup_config(config: &str) -> TempDir {
    let dir = TempDir::new().expect("create temp dir");
    std::fs::write(dir.path().join("tailf.toml"), config).expect("write config");
    dir
}

/// `tailf` pointed at the config file in `dir`, isolated from the user's.
fn tailf(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tailf").expect("tailf binary should be built");
    cmd.env("TAILF_CONFIG", dir.join("tailf.toml"));
    cmd.env("RUST_LOG", "warn");
    cmd.env_remove("NO_COLOR");
    cmd
}

// =============================================================================
// config
// =============================================================================

#[test]
fn help_lists_subcommands() {
    let dir = setup_config("");
    tailf(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("file"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn config_show_prints_effective_toml() {
    let dir = setup_config("[timestamps]\nformat = \"%H:%M:%S\"\n");
    tailf(dir.path())
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("format = \"%H:%M:%S\""))
        .stdout(predicate::str::contains("poll_interval_ms = 1000"));
}

#[test]
fn config_json_is_parseable() {
    let dir = setup_config("[follow]\npaused_offset = \"skip\"\n");
    let output = tailf(dir.path())
        .args(["config", "--json"])
        .output()
        .expect("run tailf");
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(value["follow"]["paused_offset"], "skip");
    assert_eq!(value["severity"]["keywords"]["ERROR"], "error");
}

#[test]
fn missing_explicit_config_fails_with_path() {
    let dir = setup_config("");
    let missing = dir.path().join("nope.toml");
    tailf(dir.path())
        .arg("--config")
        .arg(&missing)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config"))
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn invalid_timestamp_format_is_rejected() {
    let dir = setup_config("[timestamps]\nformat = \"%Q\"\n");
    tailf(dir.path())
        .args(["config", "--show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid timestamp format"));
}

// =============================================================================
// run
// =============================================================================

#[test]
fn run_requires_a_command() {
    let dir = setup_config("");
    tailf(dir.path()).arg("run").assert().failure();
}

#[test]
fn run_reports_unknown_binary() {
    let dir = setup_config("");
    tailf(dir.path())
        .args(["run", "--", "tailf-no-such-binary-xyz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tailf-no-such-binary-xyz"));
}

#[cfg(unix)]
#[test]
fn run_prints_output_and_exit_marker() {
    let dir = setup_config("");
    tailf(dir.path())
        .args(["--no-color", "run", "--", "sh", "-c", "echo hello; echo 'ERROR boom'"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("hello\nERROR boom\n"))
        .stdout(predicate::str::contains("[process exited with status 0]"))
        .stdout(predicate::str::contains("\x1b[").not());
}

#[cfg(unix)]
#[test]
fn run_json_output_carries_severity_tags() {
    let dir = setup_config("");
    let output = tailf(dir.path())
        .args(["--json", "run", "--severity", "--", "sh", "-c", "echo 'WARN low disk'"])
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .expect("run tailf");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("utf8");
    let first: serde_json::Value =
        serde_json::from_str(stdout.lines().next().expect("a line")).expect("json line");
    assert_eq!(first["text"], "WARN low disk");
    assert_eq!(first["severity"][0]["keyword"], "WARN");
    assert_eq!(first["severity"][0]["category"], "warn");
}

#[cfg(unix)]
#[test]
fn run_with_timestamps_stamps_every_line() {
    let dir = setup_config("[timestamps]\nformat = \"<%Y>\"\n");
    tailf(dir.path())
        .args(["--no-color", "run", "--timestamps", "--", "sh", "-c", "echo a; echo b"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?m)^<\d{4}> a$").expect("regex"))
        .stdout(predicate::str::is_match(r"(?m)^<\d{4}> b$").expect("regex"));
}
