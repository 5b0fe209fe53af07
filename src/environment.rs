//! Snapshot of the process environment consumed by a deploy.
//!
//! Credential providers and the lockout holder name depend on a handful of
//! environment variables. They are read once at the process boundary into a
//! [`DeployEnvironment`] value so the rest of the crate never touches the
//! global environment and tests can describe any situation directly.

use std::env;
use std::ffi::OsString;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::process::{CommandRunner, ProcessError};

/// Variable naming an explicit private key file.
pub const IDENTITY_FILE_ENV: &str = "IDENTITY_FILE";
/// Variable holding the passphrase for [`IDENTITY_FILE_ENV`] and conventional keys.
pub const IDENTITY_FILE_PASSWORD_ENV: &str = "IDENTITY_FILE_PASSWORD";
/// Variable pointing at the SSH agent socket.
pub const SSH_AUTH_SOCK_ENV: &str = "SSH_AUTH_SOCK";
/// Variable overriding the lockout holder name.
pub const LOCKOUT_USERNAME_ENV: &str = "LOCKOUT_USERNAME";

/// Errors raised while deriving values from the environment.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EnvironmentError {
    /// Raised when `git` cannot be run to discover the holder name.
    #[error("could not determine lockout holder name: {0}")]
    Git(#[from] ProcessError),
    /// Raised when neither the override nor git configuration yields a name.
    #[error("could not determine lockout holder name: set {LOCKOUT_USERNAME_ENV} or git user.name")]
    MissingHolderName,
}

/// Explicit environment inputs for credential resolution and lockouts.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct DeployEnvironment {
    /// Value of `IDENTITY_FILE`.
    pub identity_file: Option<Utf8PathBuf>,
    /// Value of `IDENTITY_FILE_PASSWORD`.
    pub identity_file_password: Option<String>,
    /// Value of `SSH_AUTH_SOCK`.
    pub ssh_auth_sock: Option<Utf8PathBuf>,
    /// Value of `LOCKOUT_USERNAME`.
    pub lockout_username: Option<String>,
    /// Home directory of the local user.
    pub home_dir: Option<Utf8PathBuf>,
    /// Local login name, used when a target has no remote user.
    pub local_user: Option<String>,
    /// Whether the platform agent (Pageant) is available.
    pub is_windows: bool,
}

impl std::fmt::Debug for DeployEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployEnvironment")
            .field("identity_file", &self.identity_file)
            .field(
                "identity_file_password",
                &self.identity_file_password.as_ref().map(|_| "<redacted>"),
            )
            .field("ssh_auth_sock", &self.ssh_auth_sock)
            .field("lockout_username", &self.lockout_username)
            .field("home_dir", &self.home_dir)
            .field("local_user", &self.local_user)
            .field("is_windows", &self.is_windows)
            .finish()
    }
}

impl DeployEnvironment {
    /// Reads the environment of the current process.
    ///
    /// Non-UTF-8 and empty values are treated as unset.
    #[must_use]
    pub fn from_process() -> Self {
        Self {
            identity_file: utf8_var(IDENTITY_FILE_ENV).map(Utf8PathBuf::from),
            identity_file_password: utf8_var(IDENTITY_FILE_PASSWORD_ENV),
            ssh_auth_sock: utf8_var(SSH_AUTH_SOCK_ENV).map(Utf8PathBuf::from),
            lockout_username: utf8_var(LOCKOUT_USERNAME_ENV),
            home_dir: utf8_var("HOME")
                .or_else(|| utf8_var("USERPROFILE"))
                .map(Utf8PathBuf::from),
            local_user: utf8_var("USER").or_else(|| utf8_var("USERNAME")),
            is_windows: cfg!(windows),
        }
    }

    /// Resolves the name recorded as the lockout holder.
    ///
    /// `LOCKOUT_USERNAME` wins when set; otherwise `git config user.name` is
    /// queried and the result lowercased.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Git`] when git cannot be spawned and
    /// [`EnvironmentError::MissingHolderName`] when no name is configured.
    pub fn holder_name<R: CommandRunner>(&self, runner: &R) -> Result<String, EnvironmentError> {
        if let Some(name) = &self.lockout_username {
            return Ok(name.clone());
        }

        let output = runner.run(
            "git",
            &[
                OsString::from("config"),
                OsString::from("user.name"),
            ],
        )?;
        let name = output.stdout.trim().to_lowercase();
        if !output.is_success() || name.is_empty() {
            return Err(EnvironmentError::MissingHolderName);
        }
        Ok(name)
    }
}

fn utf8_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
