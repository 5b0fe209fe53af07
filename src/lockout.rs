//! Shard lockout coordination through the remote lockout script.
//!
//! The remote script is the source of truth: exit status zero means the
//! claim (or check) succeeded; anything else means another developer holds
//! the shard. Busy shards are never retried.

use thiserror::Error;
use tracing::{info, warn};

use crate::connection::{Connection, ConnectionError};
use crate::remote_command;
use crate::transport::RemoteSession;

/// Script invoked on the remote host when none is configured.
pub const DEFAULT_LOCKOUT_SCRIPT: &str = "~/4_SHARED/lockouts/lockout";
/// Note recorded with automatic claims.
pub const DEFAULT_LOCK_NOTE: &str = "Automatic lockout (deploy script)";

/// What to do with a shard lock.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Claim the shard for `minutes`.
    Claim {
        /// Name recorded as the lock holder.
        holder: String,
        /// Free-form note stored with the claim.
        note: String,
        /// Claim duration in minutes.
        minutes: u32,
    },
    /// Only verify that nobody else holds the shard.
    CheckOnly,
}

/// A request against the lockout service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShardLockRequest {
    /// Lock domain, for example `build` or `play`.
    pub domain: String,
    /// Shard within the domain; `*` addresses every shard.
    pub shard: String,
    /// Claim or check.
    pub mode: LockMode,
}

impl ShardLockRequest {
    /// Claim request with the default note.
    #[must_use]
    pub fn claim(
        domain: impl Into<String>,
        shard: impl Into<String>,
        holder: impl Into<String>,
        minutes: u32,
    ) -> Self {
        Self {
            domain: domain.into(),
            shard: shard.into(),
            mode: LockMode::Claim {
                holder: holder.into(),
                note: String::from(DEFAULT_LOCK_NOTE),
                minutes,
            },
        }
    }

    /// Check-only request.
    #[must_use]
    pub fn check(domain: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            shard: shard.into(),
            mode: LockMode::CheckOnly,
        }
    }

    /// Replaces the claim note. Has no effect on check-only requests.
    #[must_use]
    pub fn with_note(mut self, value: impl Into<String>) -> Self {
        if let LockMode::Claim { note, .. } = &mut self.mode {
            *note = value.into();
        }
        self
    }
}

/// Errors raised by the lockout coordinator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LockoutError {
    /// Raised when the lockout script reports the shard as taken.
    #[error(
        "Failed to deploy! Shard {domain}/{shard} is currently being used by another developer! (lockout exited with {exit_code})"
    )]
    Busy {
        /// Lock domain.
        domain: String,
        /// Shard requested.
        shard: String,
        /// Exit code reported by the script.
        exit_code: i32,
    },
    /// Raised when the lockout command could not be run.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Runs lockout requests through a remote script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Lockout {
    script: String,
}

impl Default for Lockout {
    fn default() -> Self {
        Self::new(DEFAULT_LOCKOUT_SCRIPT)
    }
}

impl Lockout {
    /// Coordinator invoking `script` on the remote host.
    #[must_use]
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Remote script path.
    #[must_use]
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Command line sent for `request`.
    #[must_use]
    pub fn command_for(&self, request: &ShardLockRequest) -> String {
        match &request.mode {
            LockMode::Claim {
                holder,
                note,
                minutes,
            } => remote_command::lockout_claim(
                &self.script,
                &request.domain,
                &request.shard,
                holder,
                *minutes,
                note,
            ),
            LockMode::CheckOnly => {
                remote_command::lockout_check(&self.script, &request.domain, &request.shard)
            }
        }
    }

    /// Claims or checks the shard described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`LockoutError::Busy`] on any non-zero exit and
    /// [`LockoutError::Connection`] when the command cannot be run.
    pub fn acquire<S: RemoteSession>(
        &self,
        connection: &mut Connection<S>,
        request: &ShardLockRequest,
    ) -> Result<(), LockoutError> {
        let result = connection.execute(&self.command_for(request))?;
        if result.is_success() {
            info!(
                domain = %request.domain,
                shard = %request.shard,
                "Lockout acquired"
            );
            return Ok(());
        }
        warn!(
            domain = %request.domain,
            shard = %request.shard,
            exit_code = result.exit_code,
            output = %result.stdout_text().trim(),
            "Shard is locked by another developer"
        );
        Err(LockoutError::Busy {
            domain: request.domain.clone(),
            shard: request.shard.clone(),
            exit_code: result.exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialChain, CredentialProvider};
    use crate::environment::DeployEnvironment;
    use crate::exec::PollSettings;
    use crate::target::RemoteTarget;
    use crate::test_support::{ScriptedSession, ScriptedTransport};
    use rstest::{fixture, rstest};
    use std::time::Duration;

    #[fixture]
    fn transport() -> ScriptedTransport {
        ScriptedTransport::new()
    }

    fn connect(transport: &ScriptedTransport) -> Connection<ScriptedSession> {
        let env = DeployEnvironment {
            is_windows: true,
            ..DeployEnvironment::default()
        };
        Connection::open(
            transport,
            &RemoteTarget::new("basicssh", "shards.example.net").with_user(Some(String::from("epic"))),
            &CredentialChain::new(vec![CredentialProvider::platform_agent()]),
            &env,
            PollSettings::with_interval(Duration::ZERO),
        )
        .unwrap_or_else(|err| panic!("open should succeed: {err}"))
    }

    #[rstest]
    fn claim_succeeds_on_zero_exit(transport: ScriptedTransport) {
        let mut connection = connect(&transport);
        let request = ShardLockRequest::claim("build", "dev2", "jane", 30);

        Lockout::default()
            .acquire(&mut connection, &request)
            .unwrap_or_else(|err| panic!("claim should succeed: {err}"));

        assert_eq!(
            transport.commands(),
            ["~/4_SHARED/lockouts/lockout build claim dev2 jane 30 'Automatic lockout (deploy script)'"]
        );
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(-1)]
    fn any_non_zero_exit_is_busy(transport: ScriptedTransport, #[case] code: i32) {
        transport.exit_with("check", code);
        let mut connection = connect(&transport);

        let Err(err) = Lockout::default().acquire(&mut connection, &ShardLockRequest::check("play", "*"))
        else {
            panic!("non-zero exit should be busy");
        };

        assert_eq!(
            err,
            LockoutError::Busy {
                domain: String::from("play"),
                shard: String::from("*"),
                exit_code: code,
            }
        );
        assert_eq!(transport.commands().len(), 1, "busy shards are not retried");
    }

    #[rstest]
    fn custom_script_and_note_are_used() {
        let lockout = Lockout::new("/opt/lockout");
        let request = ShardLockRequest::claim("stage", "*", "ci", 5).with_note("nightly");
        assert_eq!(
            lockout.command_for(&request),
            "/opt/lockout stage claim '*' ci 5 nightly"
        );
    }

    #[rstest]
    fn with_note_ignores_check_requests() {
        let request = ShardLockRequest::check("build", "*").with_note("ignored");
        assert_eq!(request.mode, LockMode::CheckOnly);
    }
}
