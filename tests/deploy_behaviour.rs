//! End-to-end deploy behaviour against the scripted transport.
//!
//! These tests drive the same path as `shardeploy deploy`: resolve task
//! names from the standard plan, then run the resulting batch.

use shardeploy::connection::ConnectionError;
use shardeploy::tasks::{TaskInputs, resolve_jobs};
use shardeploy::test_support::{ScriptedRunner, ScriptedTransport};
use shardeploy::{
    Artifact, DeployEnvironment, DeployError, DeployPlan, Deployer, JobOutcome, PollSettings,
};
use rstest::{fixture, rstest};
use std::time::Duration;

const NOTE: &str = "Automatic lockout (deploy script)";

#[fixture]
fn plan() -> DeployPlan {
    DeployPlan::standard().unwrap_or_else(|err| panic!("standard plan: {err}"))
}

fn pageant_env() -> DeployEnvironment {
    DeployEnvironment {
        is_windows: true,
        lockout_username: Some(String::from("jane")),
        ..DeployEnvironment::default()
    }
}

fn inputs() -> TaskInputs {
    TaskInputs {
        artifact: Artifact::new("build/libs/monumenta-2.0.jar", "2.0"),
        project_name: None,
        lock_note: String::from(NOTE),
    }
}

async fn deploy(
    plan: &DeployPlan,
    transport: &ScriptedTransport,
    env: DeployEnvironment,
    tasks: &[&str],
) -> Vec<JobOutcome> {
    let names: Vec<String> = tasks.iter().map(|task| (*task).to_owned()).collect();
    let jobs = resolve_jobs(plan, &names, &inputs(), &env, &ScriptedRunner::new())
        .unwrap_or_else(|err| panic!("tasks should resolve: {err}"));
    Deployer::new(transport.clone(), env)
        .with_poll_settings(PollSettings::with_interval(Duration::ZERO))
        .run_batch(jobs)
        .await
}

#[rstest]
#[tokio::test]
async fn locking_symlink_deploy_claims_uploads_and_relinks(plan: DeployPlan) {
    let transport = ScriptedTransport::new();

    let outcomes = deploy(&plan, &transport, pageant_env(), &["stage-deploy-lock"]).await;

    assert!(outcomes.iter().all(JobOutcome::is_success), "{outcomes:?}");
    assert_eq!(
        transport.commands(),
        [
            format!("~/4_SHARED/lockouts/lockout stage claim '*' jane 30 '{NOTE}'"),
            String::from(
                "cd /home/epic/stage/m17/server_config/plugins && rm -f monumenta.jar && ln -s monumenta-2.0.jar monumenta.jar"
            ),
            String::from(
                "cd /home/epic/stage/m18/server_config/plugins && rm -f monumenta.jar && ln -s monumenta-2.0.jar monumenta.jar"
            ),
        ]
    );
    assert_eq!(
        transport.uploads(),
        [
            "/home/epic/stage/m17/server_config/plugins/monumenta-2.0.jar",
            "/home/epic/stage/m18/server_config/plugins/monumenta-2.0.jar",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn busy_shard_fails_only_its_own_task(plan: DeployPlan) {
    let transport = ScriptedTransport::new();
    transport.exit_with("lockout build claim dev1", 1);

    let outcomes = deploy(
        &plan,
        &transport,
        pageant_env(),
        &["dev1-deploy-lock", "dev2-deploy-lock"],
    )
    .await;

    let [first, second] = outcomes.as_slice() else {
        panic!("expected two outcomes");
    };
    assert!(matches!(
        first.result,
        Err(DeployError::LockBusy { exit_code: 1, .. })
    ));
    assert!(second.is_success(), "{second:?}");
    assert_eq!(transport.connects().len(), 1, "same target shares a session");
    assert_eq!(
        transport.uploads(),
        ["/home/epic/dev2_shard_plugins/monumenta-2.0.jar"]
    );
}

#[rstest]
#[tokio::test]
async fn separate_targets_get_separate_sessions(plan: DeployPlan) {
    let transport = ScriptedTransport::new();

    let outcomes = deploy(
        &plan,
        &transport,
        pageant_env(),
        &["dev1-deploy", "m119-deploy", "build-deploy-lock"],
    )
    .await;

    assert!(outcomes.iter().all(JobOutcome::is_success), "{outcomes:?}");
    let ports: Vec<_> = transport
        .connects()
        .iter()
        .map(|record| record.target.port)
        .collect();
    assert_eq!(ports.len(), 2);
    assert!(ports.contains(&8822) && ports.contains(&9922), "{ports:?}");
    assert!(
        transport
            .commands()
            .contains(&String::from("~/4_SHARED/lockouts/lockout build check '*'")),
        "{:?}",
        transport.commands()
    );
}

#[rstest]
#[tokio::test]
async fn missing_credentials_never_reach_the_network(plan: DeployPlan) {
    let transport = ScriptedTransport::new();
    let env = DeployEnvironment {
        lockout_username: Some(String::from("jane")),
        ..DeployEnvironment::default()
    };

    let outcomes = deploy(&plan, &transport, env, &["dev3-deploy"]).await;

    assert!(matches!(
        outcomes.first().map(|outcome| &outcome.result),
        Some(Err(DeployError::Connection(
            ConnectionError::AuthExhausted { .. }
        )))
    ));
    assert!(transport.connects().is_empty());
    assert!(transport.calls().is_empty());
}
