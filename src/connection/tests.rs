//! Tests for connection opening, command execution and uploads.

use super::*;
use crate::auth::CredentialProvider;
use crate::test_support::{RemoteCall, ScriptedChannel, ScriptedTransport};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use std::time::Duration;

#[fixture]
fn target() -> RemoteTarget {
    RemoteTarget::new("basicssh", "shards.example.net")
        .with_port(8822)
        .with_user(Some(String::from("epic")))
}

#[fixture]
fn pageant_env() -> DeployEnvironment {
    DeployEnvironment {
        is_windows: true,
        local_user: Some(String::from("localdev")),
        ..DeployEnvironment::default()
    }
}

fn pageant_chain() -> CredentialChain {
    CredentialChain::new(vec![CredentialProvider::platform_agent()])
}

fn quick_poll() -> PollSettings {
    PollSettings::with_interval(Duration::ZERO)
}

fn open(
    transport: &ScriptedTransport,
    target: &RemoteTarget,
    env: &DeployEnvironment,
) -> Result<Connection<crate::test_support::ScriptedSession>, ConnectionError> {
    Connection::open(transport, target, &pageant_chain(), env, quick_poll())
}

#[rstest]
fn open_offers_resolved_identities(target: RemoteTarget, pageant_env: DeployEnvironment) {
    let transport = ScriptedTransport::new();

    let connection = open(&transport, &target, &pageant_env)
        .unwrap_or_else(|err| panic!("open should succeed: {err}"));

    assert_eq!(connection.user(), "epic");
    let connects = transport.connects();
    assert_eq!(connects.len(), 1);
    let record = connects.first().unwrap_or_else(|| panic!("connect recorded"));
    assert_eq!(record.providers, ["Pageant"]);
    assert!(!record.verify_host_key);
    assert_eq!(record.target, target.key());
}

#[rstest]
fn exhausted_chain_never_connects(target: RemoteTarget) {
    let transport = ScriptedTransport::new();

    let Err(err) = open(&transport, &target, &DeployEnvironment::default()) else {
        panic!("no identities should fail");
    };

    assert!(matches!(err, ConnectionError::AuthExhausted { .. }));
    assert!(transport.connects().is_empty());
}

#[rstest]
#[case(HostKeyPolicy::TrustOnFirstUse, "trust-on-first-use")]
#[case(HostKeyPolicy::Strict { known_hosts: Utf8PathBuf::from("/etc/ssh/known_hosts") }, "strict")]
fn verified_host_key_policies_fail_before_network(
    target: RemoteTarget,
    pageant_env: DeployEnvironment,
    #[case] policy: HostKeyPolicy,
    #[case] label: &str,
) {
    let transport = ScriptedTransport::new();
    let strict_target = target.with_host_key_policy(policy);

    let Err(err) = open(&transport, &strict_target, &pageant_env) else {
        panic!("unsupported policy should fail");
    };

    assert!(
        matches!(err, ConnectionError::UnsupportedHostKeyPolicy { policy, .. } if policy == label)
    );
    assert!(transport.connects().is_empty());
}

#[rstest]
fn missing_remote_user_falls_back_to_local_user(pageant_env: DeployEnvironment) {
    let transport = ScriptedTransport::new();
    let anonymous = RemoteTarget::new("adminssh", "shards.example.net");

    let connection = open(&transport, &anonymous, &pageant_env)
        .unwrap_or_else(|err| panic!("open should succeed: {err}"));

    assert_eq!(connection.user(), "localdev");
}

#[rstest]
fn missing_user_everywhere_is_an_error(pageant_env: DeployEnvironment) {
    let transport = ScriptedTransport::new();
    let anonymous = RemoteTarget::new("adminssh", "shards.example.net");
    let env = DeployEnvironment {
        local_user: None,
        ..pageant_env
    };

    let Err(err) = open(&transport, &anonymous, &env) else {
        panic!("missing user should fail");
    };

    assert!(matches!(err, ConnectionError::MissingUser { .. }));
}

#[rstest]
#[case(TransportError::Timeout { operation: String::from("connect") })]
#[case(TransportError::AuthRejected { user: String::from("epic") })]
fn transport_failures_become_connection_failures(
    target: RemoteTarget,
    pageant_env: DeployEnvironment,
    #[case] failure: TransportError,
) {
    let transport = ScriptedTransport::new();
    transport.fail_next_connect(failure.clone());

    let Err(err) = open(&transport, &target, &pageant_env) else {
        panic!("transport failure should surface");
    };

    assert_eq!(
        err,
        ConnectionError::ConnectionFailed {
            target: target.to_string(),
            source: failure,
        }
    );
}

#[rstest]
fn execute_returns_output_and_records_command(
    target: RemoteTarget,
    pageant_env: DeployEnvironment,
) {
    let transport = ScriptedTransport::new();
    transport.reply_to(
        "uptime",
        ScriptedChannel::new(3).with_output(b"up 4 days\n", b"load high\n"),
    );
    let mut connection = open(&transport, &target, &pageant_env)
        .unwrap_or_else(|err| panic!("open should succeed: {err}"));

    let result = connection
        .execute("uptime")
        .unwrap_or_else(|err| panic!("execute should succeed: {err}"));

    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stdout_text(), "up 4 days\n");
    assert_eq!(result.stderr_text(), "load high\n");
    assert_eq!(transport.commands(), ["uptime"]);
}

#[rstest]
fn execute_maps_channel_failures(target: RemoteTarget, pageant_env: DeployEnvironment) {
    let transport = ScriptedTransport::new();
    transport.fail_exec(
        "reboot",
        TransportError::Protocol {
            operation: String::from("open exec channel"),
            message: String::from("administratively prohibited"),
        },
    );
    let mut connection = open(&transport, &target, &pageant_env)
        .unwrap_or_else(|err| panic!("open should succeed: {err}"));

    let Err(err) = connection.execute("reboot") else {
        panic!("channel failure should surface");
    };

    assert!(matches!(err, ConnectionError::CommandFailed { command, .. } if command == "reboot"));
}

#[rstest]
fn upload_records_transfer_and_maps_failures(
    target: RemoteTarget,
    pageant_env: DeployEnvironment,
) {
    let transport = ScriptedTransport::new();
    transport.fail_upload(
        "/readonly",
        TransportError::Io {
            operation: String::from("create"),
            message: String::from("permission denied"),
        },
    );
    let mut connection = open(&transport, &target, &pageant_env)
        .unwrap_or_else(|err| panic!("open should succeed: {err}"));
    let local = Utf8PathBuf::from("build/libs/plugin-1.0.jar");

    connection
        .upload(&local, "/srv/plugins/plugin-1.0.jar")
        .unwrap_or_else(|err| panic!("upload should succeed: {err}"));
    let Err(err) = connection.upload(&local, "/readonly/plugin-1.0.jar") else {
        panic!("upload failure should surface");
    };

    assert!(matches!(err, ConnectionError::TransferFailed { .. }));
    assert_eq!(
        transport.calls().first(),
        Some(&RemoteCall::Upload {
            target: target.key(),
            local,
            remote: String::from("/srv/plugins/plugin-1.0.jar"),
        })
    );
}
