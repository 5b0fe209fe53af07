//! Tests for job validation, step ordering, and the batch runner.

use super::*;
use crate::auth::{CredentialChain, CredentialProvider};
use crate::connection::ConnectionError;
use crate::lockout::ShardLockRequest;
use crate::target::RemoteTarget;
use crate::test_support::{RemoteCall, ScriptedChannel, ScriptedTransport};
use crate::transport::TransportError;
use rstest::{fixture, rstest};
use std::time::Duration;

const CLAIM: &str = "~/4_SHARED/lockouts/lockout build claim dev1 jane 30 'Automatic lockout (deploy script)'";

#[fixture]
fn transport() -> ScriptedTransport {
    ScriptedTransport::new()
}

fn deployer(transport: &ScriptedTransport) -> Deployer<ScriptedTransport> {
    let env = DeployEnvironment {
        is_windows: true,
        ..DeployEnvironment::default()
    };
    Deployer::new(transport.clone(), env)
        .with_poll_settings(PollSettings::with_interval(Duration::ZERO))
}

fn target(name: &str, port: u16) -> RemoteTarget {
    RemoteTarget::new(name, "shards.example.net")
        .with_port(port)
        .with_user(Some(String::from("epic")))
}

fn builder(name: &str) -> DeployJobBuilder {
    DeployJob::builder(name)
        .target(target("basicssh", 8822))
        .credentials(CredentialChain::new(vec![
            CredentialProvider::platform_agent(),
        ]))
        .artifact(Artifact::new("build/libs/plugin-1.0.jar", "1.0"))
}

fn overwrite_job() -> DeployJob {
    builder("dev1")
        .remote_paths(["/a", "/b"])
        .mode(DeployMode::Overwrite {
            artifact_base_name: String::from("plugin"),
        })
        .build()
        .unwrap_or_else(|err| panic!("job should build: {err}"))
}

fn symlink_job() -> DeployJob {
    builder("stage")
        .remote_paths(["/a", "/b"])
        .mode(DeployMode::SymlinkSwap {
            link_base_name: String::from("plugin"),
        })
        .build()
        .unwrap_or_else(|err| panic!("job should build: {err}"))
}

fn exec(command: &str) -> RemoteCall {
    RemoteCall::Exec {
        target: target("basicssh", 8822).key(),
        command: command.to_owned(),
    }
}

fn upload(remote: &str) -> RemoteCall {
    RemoteCall::Upload {
        target: target("basicssh", 8822).key(),
        local: "build/libs/plugin-1.0.jar".into(),
        remote: remote.to_owned(),
    }
}

#[rstest]
#[case::no_paths(builder("x").mode(DeployMode::Overwrite { artifact_base_name: String::from("p") }), "paths must be non-empty")]
#[case::blank_base(builder("x").remote_path("/a").mode(DeployMode::SymlinkSwap { link_base_name: String::from(" ") }), "base name must not be empty")]
#[case::no_mode(builder("x").remote_path("/a"), "mode is required")]
#[case::blank_version(
    builder("x")
        .remote_path("/a")
        .artifact(Artifact::new("plugin.jar", ""))
        .mode(DeployMode::Overwrite { artifact_base_name: String::from("p") }),
    "artifact version must not be empty"
)]
#[case::no_file_name(
    builder("x")
        .remote_path("/a")
        .artifact(Artifact::new("/", "1.0"))
        .mode(DeployMode::Overwrite { artifact_base_name: String::from("p") }),
    "artifact path must name a file"
)]
#[case::link_shadows_artifact(
    builder("x")
        .remote_path("/a")
        .artifact(Artifact::new("build/libs/plugin.jar", "1.0"))
        .mode(DeployMode::SymlinkSwap { link_base_name: String::from("plugin") }),
    "symlink name collides with the artifact file name"
)]
fn builder_rejects_invalid_jobs(#[case] candidate: DeployJobBuilder, #[case] reason: &str) {
    let Err(err) = candidate.build() else {
        panic!("invalid job should be rejected");
    };
    assert_eq!(
        err,
        DeployError::InvalidJob {
            job: String::from("x"),
            reason: reason.to_owned(),
        }
    );
}

#[rstest]
fn overwrite_cleans_every_path_before_uploading(transport: ScriptedTransport) {
    let report = deployer(&transport)
        .run(&overwrite_job())
        .unwrap_or_else(|err| panic!("deploy should succeed: {err}"));

    assert_eq!(
        transport.calls(),
        [
            exec("cd /a && rm -f plugin*.jar"),
            exec("cd /b && rm -f plugin*.jar"),
            upload("/a/plugin-1.0.jar"),
            upload("/b/plugin-1.0.jar"),
        ]
    );
    assert_eq!(report.steps.len(), 4);
}

#[rstest]
fn failed_clean_is_only_a_warning(transport: ScriptedTransport) {
    transport.exit_with("rm -f plugin*.jar", 1);

    deployer(&transport)
        .run(&overwrite_job())
        .unwrap_or_else(|err| panic!("clean failures are tolerated: {err}"));

    assert_eq!(transport.uploads().len(), 2);
}

#[rstest]
fn failed_upload_aborts_remaining_steps(transport: ScriptedTransport) {
    transport.fail_upload(
        "/a/",
        TransportError::Io {
            operation: String::from("create"),
            message: String::from("disk full"),
        },
    );

    let Err(err) = deployer(&transport).run(&overwrite_job()) else {
        panic!("upload failure should abort");
    };

    assert!(matches!(
        err,
        DeployError::Connection(ConnectionError::TransferFailed { .. })
    ));
    assert_eq!(transport.uploads(), ["/a/plugin-1.0.jar"]);
}

#[rstest]
fn failed_clean_exec_aborts_remaining_steps(transport: ScriptedTransport) {
    transport.fail_exec(
        "cd /a",
        TransportError::Protocol {
            operation: String::from("open exec channel"),
            message: String::from("channel refused"),
        },
    );

    let Err(err) = deployer(&transport).run(&overwrite_job()) else {
        panic!("clean failure should abort");
    };

    assert!(matches!(
        err,
        DeployError::Connection(ConnectionError::CommandFailed { .. })
    ));
    assert_eq!(transport.commands(), ["cd /a && rm -f plugin*.jar"]);
    assert!(transport.uploads().is_empty());
}

#[rstest]
fn symlink_swap_uploads_then_relinks(transport: ScriptedTransport) {
    deployer(&transport)
        .run(&symlink_job())
        .unwrap_or_else(|err| panic!("deploy should succeed: {err}"));

    assert_eq!(
        transport.calls(),
        [
            upload("/a/plugin-1.0.jar"),
            upload("/b/plugin-1.0.jar"),
            exec("cd /a && rm -f plugin.jar && ln -s plugin-1.0.jar plugin.jar"),
            exec("cd /b && rm -f plugin.jar && ln -s plugin-1.0.jar plugin.jar"),
        ]
    );
}

#[rstest]
fn failed_relink_is_escalated(transport: ScriptedTransport) {
    transport.reply_to(
        "cd /a && rm -f plugin.jar",
        ScriptedChannel::new(1).with_output(b"", b"ln: permission denied\n"),
    );

    let Err(err) = deployer(&transport).run(&symlink_job()) else {
        panic!("relink failure should abort");
    };

    assert_eq!(
        err,
        DeployError::RelinkFailed {
            path: String::from("/a"),
            link: String::from("plugin.jar"),
            exit_code: 1,
            stderr: String::from("ln: permission denied"),
        }
    );
    assert_eq!(transport.commands().len(), 1, "second relink must not run");
}

#[rstest]
fn lock_runs_first_and_busy_shards_change_nothing(transport: ScriptedTransport) {
    transport.exit_with("claim", 3);
    let mut job = overwrite_job();
    job.lock = Some(ShardLockRequest::claim("build", "dev1", "jane", 30));

    let Err(err) = deployer(&transport).run(&job) else {
        panic!("busy shard should abort");
    };

    assert!(matches!(err, DeployError::LockBusy { exit_code: 3, .. }));
    assert_eq!(transport.calls(), [exec(CLAIM)]);
}

#[rstest]
fn acquired_lock_precedes_clean(transport: ScriptedTransport) {
    let mut job = overwrite_job();
    job.lock = Some(ShardLockRequest::claim("build", "dev1", "jane", 30));

    deployer(&transport)
        .run(&job)
        .unwrap_or_else(|err| panic!("deploy should succeed: {err}"));

    let commands = transport.commands();
    assert_eq!(commands.first().map(String::as_str), Some(CLAIM));
    assert_eq!(commands.len(), 3);
}

#[rstest]
fn rerunning_a_job_repeats_the_same_commands(transport: ScriptedTransport) {
    let deployer = deployer(&transport);
    let job = symlink_job();

    deployer
        .run(&job)
        .unwrap_or_else(|err| panic!("first run should succeed: {err}"));
    let first = transport.calls();
    deployer
        .run(&job)
        .unwrap_or_else(|err| panic!("second run should succeed: {err}"));

    let calls = transport.calls();
    assert_eq!(calls.get(first.len()..), Some(first.as_slice()));
}

#[tokio::test]
async fn batch_shares_connections_per_target() {
    let transport = ScriptedTransport::new();
    let mut admin_job = symlink_job();
    admin_job.name = String::from("m119");
    admin_job.target = target("adminssh", 9922);
    let mut second_basic = overwrite_job();
    second_basic.name = String::from("dev2");

    let outcomes = deployer(&transport)
        .run_batch(vec![overwrite_job(), admin_job, second_basic])
        .await;

    let names: Vec<_> = outcomes.iter().map(|outcome| outcome.job.as_str()).collect();
    assert_eq!(names, ["dev1", "m119", "dev2"]);
    assert!(outcomes.iter().all(JobOutcome::is_success));
    assert_eq!(transport.connects().len(), 2);
}

#[tokio::test]
async fn batch_reconnects_after_failed_open() {
    let transport = ScriptedTransport::new();
    transport.fail_next_connect(TransportError::Timeout {
        operation: String::from("connect"),
    });
    let mut second = overwrite_job();
    second.name = String::from("dev2");

    let outcomes = deployer(&transport)
        .run_batch(vec![overwrite_job(), second])
        .await;

    let successes: Vec<_> = outcomes.iter().map(JobOutcome::is_success).collect();
    assert_eq!(successes, [false, true]);
    assert_eq!(transport.connects().len(), 2);
}
