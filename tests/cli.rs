// ABOUTME: Integration tests for the sshdial CLI commands.
// ABOUTME: Validates --help output and the offline plan command.

use assert_cmd::Command;
use predicates::prelude::*;

const PASSWORD_URI: &str = "ssh://bob:secret@h1/?sshauth=ssh-password&no_verify";

fn sshdial_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sshdial"));
    cmd.env_remove("HTTP_PROXY")
        .env_remove("ALL_PROXY")
        .env_remove("SSH_AUTH_SOCK");
    cmd
}

#[test]
fn help_shows_commands() {
    sshdial_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("plan"));
}

#[test]
fn plan_prints_resolution() {
    sshdial_cmd()
        .args(["plan", PASSWORD_URI])
        .assert()
        .success()
        .stdout(predicate::str::contains("user:          bob"))
        .stdout(predicate::str::contains("auth:          ssh-password"))
        .stdout(predicate::str::contains("direct"))
        .stdout(predicate::str::contains("NOT VERIFIED"));
}

#[test]
fn plan_json_never_leaks_password() {
    sshdial_cmd()
        .args(["--json", "plan", PASSWORD_URI])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"event\":\"plan\""))
        .stdout(predicate::str::contains("\"host\":\"h1\""))
        .stdout(predicate::str::contains("secret").not());
}

#[test]
fn plan_quiet_prints_only_the_path() {
    sshdial_cmd()
        .args(["-q", "plan", PASSWORD_URI])
        .assert()
        .success()
        .stdout(predicate::eq("direct\n"));
}

#[test]
fn plan_reports_proxy_from_environment() {
    sshdial_cmd()
        .env("ALL_PROXY", "socks5://127.0.0.1:9050")
        .args(["plan", PASSWORD_URI])
        .assert()
        .success()
        .stdout(predicate::str::contains("127.0.0.1:9050"));
}

#[test]
fn invalid_port_fails_at_descriptor_step() {
    sshdial_cmd()
        .args(["plan", "ssh://bob@h1:notaport/?no_verify"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("descriptor:"));
}

#[test]
fn unknown_auth_method_only_fails_at_auth_step() {
    sshdial_cmd()
        .args(["plan", "ssh://bob:pw@h1/?sshauth=kerberos&no_verify"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("auth:"));
}

#[test]
fn config_file_sets_default_remote_socket() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("sshdial.yml");
    std::fs::write(&config, "remote_socket: /run/custom.sock\n").unwrap();

    sshdial_cmd()
        .arg("--config")
        .arg(&config)
        .args(["plan", PASSWORD_URI])
        .assert()
        .success()
        .stdout(predicate::str::contains("/run/custom.sock"));
}

#[test]
fn unreadable_config_fails_at_config_step() {
    sshdial_cmd()
        .args(["--config", "/nonexistent/sshdial.yml", "plan", PASSWORD_URI])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config:"));
}
