//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::{fixture, rstest};
use std::fs;
use tempfile::TempDir;

const LAB_PLAN: &str = r#"
[remotes.lab]
host = "lab.example.net"
user = "deploy"

[destinations.lab1]
remote = "lab"
mode = "overwrite"
paths = ["/srv/lab1/plugins"]
lock = { domain = "lab", shard = "lab1", minutes = 10 }
"#;

/// Runs the binary inside an empty home and working directory so no
/// configuration or plan file from the host leaks in.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn command(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("shardeploy");
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env_remove("SHARDEPLOY_PLAN_PATH")
            .env_remove("SHARDEPLOY_CONFIG_PATH")
            .env_remove("SHARDEPLOY_PLAN_FILE")
            .env("RUST_LOG", "warn");
        cmd
    }

    fn write_plan(&self) -> String {
        let path = self.dir.path().join("lab-plan.toml");
        fs::write(&path, LAB_PLAN).unwrap_or_else(|err| panic!("write plan: {err}"));
        path.to_string_lossy().into_owned()
    }
}

#[fixture]
fn sandbox() -> Sandbox {
    Sandbox {
        dir: TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}")),
    }
}

#[rstest]
fn help_lists_subcommands(sandbox: Sandbox) {
    sandbox
        .command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy").and(predicate::str::contains("list")));
}

#[rstest]
fn list_shows_standard_plan_by_default(sandbox: Sandbox) {
    sandbox
        .command()
        .arg("list")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Deploy (locking):")
                .and(predicate::str::contains("dev1-deploy-lock"))
                .and(predicate::str::contains("m119-deploy")),
        );
}

#[rstest]
fn list_json_uses_explicit_plan(sandbox: Sandbox) {
    let plan = sandbox.write_plan();
    let output = sandbox
        .command()
        .args(["list", "--json", "--plan", plan.as_str()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let rows: serde_json::Value =
        serde_json::from_slice(&output).unwrap_or_else(|err| panic!("json listing: {err}"));
    let names: Vec<_> = rows
        .as_array()
        .unwrap_or_else(|| panic!("expected array"))
        .iter()
        .filter_map(|row| row.get("name").and_then(serde_json::Value::as_str))
        .collect();
    assert_eq!(names, ["lab1-deploy-lock", "lab1-deploy"]);
}

#[rstest]
fn plan_path_can_come_from_environment(sandbox: Sandbox) {
    let plan = sandbox.write_plan();
    sandbox
        .command()
        .env("SHARDEPLOY_PLAN_PATH", plan)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("lab1-deploy").and(predicate::str::contains("dev1").not()));
}

#[rstest]
fn unknown_task_fails_before_connecting(sandbox: Sandbox) {
    sandbox
        .command()
        .args([
            "deploy",
            "--artifact",
            "build/libs/plugin-1.0.jar",
            "--artifact-version",
            "1.0",
            "nowhere-deploy",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown task 'nowhere-deploy'"));
}

#[rstest]
fn deploy_requires_artifact_arguments(sandbox: Sandbox) {
    sandbox
        .command()
        .args(["deploy", "dev1-deploy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--artifact"));
}

#[rstest]
fn missing_plan_file_is_reported(sandbox: Sandbox) {
    sandbox
        .command()
        .args(["list", "--plan", "absent.toml"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("plan error"));
}
