//! Remote host descriptors used to open SSH connections.

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;

/// How the remote host key is verified during the SSH handshake.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents. Logged as a security warning.
    #[default]
    AllowAny,
    /// Record the key on first contact and verify it afterwards.
    TrustOnFirstUse,
    /// Verify against an existing known-hosts file.
    Strict {
        /// Location of the known-hosts store.
        known_hosts: Utf8PathBuf,
    },
}

impl HostKeyPolicy {
    /// Short label used in log lines and error messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AllowAny => "allow-any",
            Self::TrustOnFirstUse => "trust-on-first-use",
            Self::Strict { .. } => "strict",
        }
    }
}

/// Identity used to decide whether two targets can share a connection.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TargetKey {
    /// Hostname or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Remote user, when configured.
    pub user: Option<String>,
}

/// Immutable description of a remote SSH endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    display_name: String,
    host: String,
    port: u16,
    user: Option<String>,
    connect_timeout: Duration,
    host_key_policy: HostKeyPolicy,
}

impl RemoteTarget {
    /// Creates a target on port 22 with no connect timeout and
    /// [`HostKeyPolicy::AllowAny`].
    #[must_use]
    pub fn new(display_name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            host: host.into(),
            port: 22,
            user: None,
            connect_timeout: Duration::ZERO,
            host_key_policy: HostKeyPolicy::AllowAny,
        }
    }

    /// Sets the SSH port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the remote user.
    #[must_use]
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Sets the connect timeout. [`Duration::ZERO`] disables the timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the host-key verification policy.
    #[must_use]
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Name used in logs (for example `basicssh`).
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Hostname or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SSH port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Remote user, when configured.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Timeout applied to the TCP connect and to channel operations.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Host-key verification policy.
    #[must_use]
    pub const fn host_key_policy(&self) -> &HostKeyPolicy {
        &self.host_key_policy
    }

    /// Returns the connection-sharing identity of this target.
    #[must_use]
    pub fn key(&self) -> TargetKey {
        TargetKey {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(
                f,
                "{}[{user}@{}:{}]",
                self.display_name, self.host, self.port
            ),
            None => write!(f, "{}[{}:{}]", self.display_name, self.host, self.port),
        }
    }
}
