//! End-to-end exit-code contract tests against the built `runner` binary
//! (spec.md §6, scenarios 1-3 in §8).

use std::io::Write;

use assert_cmd::Command;
use predicates::str::contains;

fn write_config(dir: &std::path::Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn happy_path_dry_run_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
version = "1.0"
[global]
env_allowed = ["PATH"]
verify_standard_paths = false

[[groups]]
name = "g"
[[groups.commands]]
name = "echo_hi"
cmd = "/bin/echo"
args = ["hi"]
risk_level = "low"
"#,
    );

    Command::cargo_bin("runner")
        .unwrap()
        .args(["run", "--config", config.to_str().unwrap(), "--dry-run"])
        .assert()
        .success();
}

#[test]
fn risk_gate_refusal_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
version = "1.0"
[global]
env_allowed = ["PATH"]
verify_standard_paths = false

[[groups]]
name = "g"
[[groups.commands]]
name = "curl_call"
cmd = "/usr/bin/curl"
args = ["https://example.com"]
risk_level = "low"
"#,
    );

    Command::cargo_bin("runner")
        .unwrap()
        .args(["run", "--config", config.to_str().unwrap(), "--dry-run"])
        .assert()
        .code(2);
}

#[test]
fn invalid_config_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
version = "1.0"
[global]
not_a_real_field = true
"#,
    );

    Command::cargo_bin("runner")
        .unwrap()
        .args(["run", "--config", config.to_str().unwrap(), "--dry-run"])
        .assert()
        .code(1)
        .stderr(contains("error"));
}

#[test]
fn unverified_command_binary_aborts_with_exit_one() {
    // The command's own binary has no hash record and is not under a
    // standard-path prefix, so it is neither skipped nor recordable by
    // accident; `run` must refuse to spawn it at all (spec §8 scenario 2).
    let dir = tempfile::tempdir().unwrap();
    let bin_dir = tempfile::tempdir().unwrap();
    let tool = bin_dir.path().join("custom_tool");
    std::fs::write(&tool, b"#!/bin/sh\necho hi\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let config = write_config(
        dir.path(),
        &format!(
            r#"
version = "1.0"
[global]
env_allowed = ["PATH"]

[[groups]]
name = "g"
[[groups.commands]]
name = "run_tool"
cmd = "{}"
risk_level = "low"
"#,
            tool.display()
        ),
    );

    Command::cargo_bin("runner")
        .unwrap()
        .args(["run", "--config", config.to_str().unwrap(), "--dry-run"])
        .assert()
        .code(1);
}

#[test]
fn verify_subcommand_reports_missing_hash_record() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let target = data_dir.path().join("tool");
    std::fs::write(&target, b"content").unwrap();

    let config = write_config(
        dir.path(),
        &format!(
            r#"
version = "1.0"
[global]
env_allowed = ["PATH"]
verify_files = ["{}"]
"#,
            target.display()
        ),
    );

    Command::cargo_bin("runner")
        .unwrap()
        .args(["verify", "--config", config.to_str().unwrap()])
        .assert()
        .code(1);
}
