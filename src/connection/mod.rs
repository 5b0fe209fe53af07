//! Authenticated sessions to a single remote target.
//!
//! [`Connection::open`] applies the host-key policy, walks the credential
//! chain, and only then touches the network. A connection authenticates
//! once; reconnecting means opening a new [`Connection`].

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{CredentialChain, ResolvedIdentity};
use crate::environment::DeployEnvironment;
use crate::exec::{CommandResult, PollSettings, run_to_completion};
use crate::target::{HostKeyPolicy, RemoteTarget};
use crate::transport::{ConnectRequest, RemoteSession, Transport, TransportError};

#[cfg(test)]
mod tests;

/// Errors raised while opening or using a [`Connection`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectionError {
    /// Raised when every credential provider was skipped.
    #[error("exhausted authentication methods for {target}, check logs!")]
    AuthExhausted {
        /// Display form of the target.
        target: String,
    },
    /// Raised for host-key policies the transport cannot honour.
    #[error("host key policy '{policy}' is not supported for {target}; use allow-any")]
    UnsupportedHostKeyPolicy {
        /// Display form of the target.
        target: String,
        /// Label of the rejected policy.
        policy: &'static str,
    },
    /// Raised when neither the target nor the local environment names a user.
    #[error("no remote user configured for {target} and the local user is unknown")]
    MissingUser {
        /// Display form of the target.
        target: String,
    },
    /// Raised when connecting, the handshake, or authentication fails.
    #[error("failed to connect to {target}: {source}")]
    ConnectionFailed {
        /// Display form of the target.
        target: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
    /// Raised when a command cannot be run to completion.
    #[error("command `{command}` failed on {target}: {source}")]
    CommandFailed {
        /// Display form of the target.
        target: String,
        /// Command line that was sent.
        command: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
    /// Raised when an upload fails.
    #[error("failed to upload {local} to {target}:{remote}: {source}")]
    TransferFailed {
        /// Display form of the target.
        target: String,
        /// Local source path.
        local: String,
        /// Remote destination path.
        remote: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
}

/// One authenticated session to a [`RemoteTarget`].
#[derive(Debug)]
pub struct Connection<S> {
    target: RemoteTarget,
    user: String,
    session: S,
    poll: PollSettings,
}

impl<S: RemoteSession> Connection<S> {
    /// Opens and authenticates a session.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnsupportedHostKeyPolicy`] for policies
    /// other than allow-any, [`ConnectionError::AuthExhausted`] when no
    /// provider yields an identity, [`ConnectionError::MissingUser`] when no
    /// user can be determined, and [`ConnectionError::ConnectionFailed`] when
    /// the transport fails.
    pub fn open<T>(
        transport: &T,
        target: &RemoteTarget,
        chain: &CredentialChain,
        env: &DeployEnvironment,
        poll: PollSettings,
    ) -> Result<Self, ConnectionError>
    where
        T: Transport<Session = S>,
    {
        info!(
            "Connecting to {target} (shardeploy {})",
            env!("CARGO_PKG_VERSION")
        );
        check_host_key_policy(target)?;

        let identities = chain.resolve(env);
        if identities.is_empty() {
            warn!("Exhausted authentication methods, check logs!");
            return Err(ConnectionError::AuthExhausted {
                target: target.to_string(),
            });
        }

        let user = target
            .user()
            .map(str::to_owned)
            .or_else(|| env.local_user.clone())
            .ok_or_else(|| ConnectionError::MissingUser {
                target: target.to_string(),
            })?;

        let request = ConnectRequest {
            target,
            user: &user,
            identities: &identities,
            verify_host_key: false,
        };
        let session = transport.connect(&request).map_err(|source| {
            if matches!(source, TransportError::AuthRejected { .. }) {
                log_rejected(&identities);
            }
            ConnectionError::ConnectionFailed {
                target: target.to_string(),
                source,
            }
        })?;
        info!("Connected to {target} as {user}");

        Ok(Self {
            target: target.clone(),
            user,
            session,
            poll,
        })
    }

    /// Target this connection was opened against.
    #[must_use]
    pub const fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// User the session authenticated as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Runs `command_line` and returns its captured result. A non-zero exit
    /// code is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::CommandFailed`] when the channel cannot be
    /// opened or breaks before the exit status is known.
    pub fn execute(&mut self, command_line: &str) -> Result<CommandResult, ConnectionError> {
        info!("Executing on {}: {command_line}", self.target);
        let outcome = self
            .session
            .open_exec(command_line)
            .and_then(|mut channel| run_to_completion(&mut channel, &self.poll));
        let result = outcome.map_err(|source| ConnectionError::CommandFailed {
            target: self.target.to_string(),
            command: command_line.to_owned(),
            source,
        })?;
        debug!(
            exit_code = result.exit_code,
            stdout = %result.stdout_text(),
            stderr = %result.stderr_text(),
            "command finished"
        );
        Ok(result)
    }

    /// Uploads `local` to the absolute path `remote`, returning the bytes
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::TransferFailed`] when the transfer fails.
    pub fn upload(&mut self, local: &Utf8Path, remote: &str) -> Result<u64, ConnectionError> {
        info!("Uploading {local} to {}:{remote}", self.target);
        let bytes = self
            .session
            .upload(local, remote)
            .map_err(|source| ConnectionError::TransferFailed {
                target: self.target.to_string(),
                local: local.to_string(),
                remote: remote.to_owned(),
                source,
            })?;
        debug!(bytes, "upload finished");
        Ok(bytes)
    }
}

fn check_host_key_policy(target: &RemoteTarget) -> Result<(), ConnectionError> {
    match target.host_key_policy() {
        HostKeyPolicy::AllowAny => {
            warn!(
                "Host key verification is disabled for {target}; any server key will be accepted"
            );
            Ok(())
        }
        policy @ (HostKeyPolicy::TrustOnFirstUse | HostKeyPolicy::Strict { .. }) => {
            Err(ConnectionError::UnsupportedHostKeyPolicy {
                target: target.to_string(),
                policy: policy.label(),
            })
        }
    }
}

fn log_rejected(identities: &[ResolvedIdentity]) {
    for identity in identities {
        info!("FAIL - {}", identity.provider);
    }
}
