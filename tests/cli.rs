//! Integration tests for CLI commands

#![allow(deprecated)]

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn agentsock(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("agentsock").unwrap();
    cmd.arg("--config").arg(config_dir.path().join("config.toml"));
    cmd.env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("agentsock").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("project"));
}

#[test]
fn test_project_command_resolves_first_label() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = agentsock(&tmp);
    cmd.arg("project").arg("jlm-app.robinswood.io");

    cmd.assert().success().stdout("jlm-app\n");
}

#[test]
fn test_project_command_applies_alias() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = agentsock(&tmp);
    cmd.arg("project").arg("www.robinswood.io");

    cmd.assert().success().stdout("jlm-app\n");
}

#[test]
fn test_project_command_uses_configured_aliases() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("config.toml"),
        "[project.aliases]\nshop = \"storefront\"\n",
    )
    .unwrap();

    let mut cmd = agentsock(&tmp);
    cmd.arg("project").arg("shop.example.com");

    cmd.assert().success().stdout("storefront\n");
}

#[test]
fn test_project_command_localhost_has_no_project() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = agentsock(&tmp);
    cmd.arg("project").arg("localhost");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("No project for"));
}

#[test]
fn test_config_command_prints_defaults() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = agentsock(&tmp);
    cmd.arg("config");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "endpoint = \"http://localhost:3001\"",
        ))
        .stdout(predicate::str::contains("path = \"/socket.io/\""));
}

#[test]
fn test_exec_against_simulated_agent() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = agentsock(&tmp);
    cmd.arg("exec")
        .arg("add a footer")
        .arg("--sim")
        .arg("--host")
        .arg("jlm.robinswood.io");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("you › add a footer"))
        .stdout(predicate::str::contains("agent › Done: add a footer"));
}

#[test]
fn test_exec_simulated_failure_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = agentsock(&tmp);
    cmd.arg("exec").arg("please fail").arg("--sim");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("error › Simulated failure"));
}

#[test]
fn test_exec_without_server_reports_not_connected() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = agentsock(&tmp);
    cmd.arg("exec")
        .arg("hello")
        .arg("--endpoint")
        .arg("http://127.0.0.1:9");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Not connected to agent server"));
}
