use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("batproxy").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reverse proxy gateway"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("proxy"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("batproxy").unwrap();
    cmd.arg("--version").assert().success();
}

#[test]
fn test_run_rejects_unknown_listen_scheme() {
    let mut cmd = Command::cargo_bin("batproxy").unwrap();
    cmd.args(["run", "--listen", "ftp://x", "--dsn", ":memory:"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("network"));
}

#[test]
fn test_proxy_create_requires_ssh_flags() {
    let mut cmd = Command::cargo_bin("batproxy").unwrap();
    cmd.args(["proxy", "create", "--node", "n", "--port", "80"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--user"));
}

#[test]
fn test_proxy_delete_requires_name() {
    let mut cmd = Command::cargo_bin("batproxy").unwrap();
    cmd.args(["proxy", "delete"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--name"));
}

#[test]
fn test_proxy_create_validates_before_connecting() {
    // No credential at all: validation fails locally, nothing is dialed.
    let mut cmd = Command::cargo_bin("batproxy").unwrap();
    cmd.args([
        "proxy", "create", "-u", "u", "-H", "h", "--node", "n", "--port", "80",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("private_key"));
}
