//! Credential providers and the ordered chain that resolves SSH identities.
//!
//! Each provider either yields an [`Identity`] or explains why it was
//! skipped. The chain walks providers in order, stopping at the first
//! accepted one unless that provider asks for later providers to run too
//! (conventional key files do, so an agent can still contribute keys).
//! Nothing here touches the network; the identities are handed to the
//! transport once a connection is attempted.

use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, info};

use crate::environment::{DeployEnvironment, IDENTITY_FILE_ENV, SSH_AUTH_SOCK_ENV};


const PEM_BEGIN: &str = "-----BEGIN ";
const PEM_END: &str = "-----END ";
const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY-----";
const PUTTY_HEADER: &str = "PuTTY-User-Key-File-";

/// Source of an SSH agent identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AgentKind {
    /// Unix-domain agent socket (`SSH_AUTH_SOCK`).
    Socket(Utf8PathBuf),
    /// Platform agent (Pageant on Windows).
    Platform,
}

/// Authentication material produced by an accepted provider.
#[derive(Clone, Eq, PartialEq)]
pub enum Identity {
    /// Private key file with an optional passphrase.
    KeyFile {
        /// Location of the private key.
        path: Utf8PathBuf,
        /// Passphrase used to decrypt the key.
        passphrase: Option<String>,
    },
    /// Keys held by an SSH agent.
    Agent(AgentKind),
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Agent(kind) => f.debug_tuple("Agent").field(kind).finish(),
        }
    }
}

/// Outcome of a single provider attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthOutcome {
    /// The provider produced an identity.
    Accepted(Identity),
    /// The provider could not be used; the reason is human readable.
    Skipped(String),
}

/// Strategy used by a [`CredentialProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CredentialSource {
    /// Key file named by `IDENTITY_FILE`.
    EnvironmentKeyFile,
    /// Key file under `$HOME/.ssh/`.
    ConventionalKeyFile {
        /// File name inside `$HOME/.ssh` (for example `id_ed25519`).
        key_name: String,
    },
    /// SSH agent reachable through `SSH_AUTH_SOCK`.
    AgentSocket,
    /// Platform agent (Pageant).
    PlatformAgent,
}

/// One entry of a credential chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialProvider {
    source: CredentialSource,
    continue_on_success: bool,
}

impl CredentialProvider {
    /// Provider reading the key path from `IDENTITY_FILE`.
    #[must_use]
    pub const fn environment_key_file() -> Self {
        Self {
            source: CredentialSource::EnvironmentKeyFile,
            continue_on_success: false,
        }
    }

    /// Provider for `$HOME/.ssh/<key_name>`. Later providers still run after
    /// it succeeds.
    #[must_use]
    pub fn conventional_key_file(key_name: impl Into<String>) -> Self {
        Self {
            source: CredentialSource::ConventionalKeyFile {
                key_name: key_name.into(),
            },
            continue_on_success: true,
        }
    }

    /// Provider for the agent behind `SSH_AUTH_SOCK`.
    #[must_use]
    pub const fn agent_socket() -> Self {
        Self {
            source: CredentialSource::AgentSocket,
            continue_on_success: false,
        }
    }

    /// Provider for the platform agent (Pageant).
    #[must_use]
    pub const fn platform_agent() -> Self {
        Self {
            source: CredentialSource::PlatformAgent,
            continue_on_success: false,
        }
    }

    /// Overrides whether later providers run after this one succeeds.
    #[must_use]
    pub const fn with_continue_on_success(mut self, value: bool) -> Self {
        self.continue_on_success = value;
        self
    }

    /// Strategy used by this provider.
    #[must_use]
    pub const fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Whether later providers also run after a successful attempt.
    #[must_use]
    pub const fn continue_on_success(&self) -> bool {
        self.continue_on_success
    }

    /// Stable name used in logs.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.source {
            CredentialSource::EnvironmentKeyFile => String::from("IdentityFileEnv"),
            CredentialSource::ConventionalKeyFile { key_name } => {
                format!("$HOME/.ssh/{key_name}")
            }
            CredentialSource::AgentSocket => String::from("SSHAgent"),
            CredentialSource::PlatformAgent => String::from("Pageant"),
        }
    }

    /// Attempts to produce an identity from `env`.
    ///
    /// Expected problems (unset variables, missing files, unusable keys) are
    /// reported as [`AuthOutcome::Skipped`]; this never fails outright.
    #[must_use]
    pub fn attempt(&self, env: &DeployEnvironment) -> AuthOutcome {
        match &self.source {
            CredentialSource::EnvironmentKeyFile => match &env.identity_file {
                Some(path) => load_key_file(path, env),
                None => AuthOutcome::Skipped(format!("missing env variable {IDENTITY_FILE_ENV}")),
            },
            CredentialSource::ConventionalKeyFile { key_name } => match &env.home_dir {
                Some(home) => load_key_file(&home.join(".ssh").join(key_name), env),
                None => AuthOutcome::Skipped(String::from("home directory is unknown")),
            },
            CredentialSource::AgentSocket => agent_socket(env),
            CredentialSource::PlatformAgent => {
                if env.is_windows {
                    AuthOutcome::Accepted(Identity::Agent(AgentKind::Platform))
                } else {
                    AuthOutcome::Skipped(String::from("pageant can only be used on windows"))
                }
            }
        }
    }
}

fn agent_socket(env: &DeployEnvironment) -> AuthOutcome {
    let Some(socket) = &env.ssh_auth_sock else {
        return AuthOutcome::Skipped(format!("missing env variable {SSH_AUTH_SOCK_ENV}"));
    };
    if cfg!(unix) && !socket.as_std_path().exists() {
        return AuthOutcome::Skipped(format!("agent socket '{socket}' does not exist"));
    }
    AuthOutcome::Accepted(Identity::Agent(AgentKind::Socket(socket.clone())))
}

fn load_key_file(path: &Utf8Path, env: &DeployEnvironment) -> AuthOutcome {
    let contents = match read_key(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return AuthOutcome::Skipped(format!("cannot find identity file at '{path}'"));
        }
        Err(err) => {
            debug!(%path, error = %err, "failed to read identity file");
            return AuthOutcome::Skipped(format!("failed to read identity '{path}': {err}"));
        }
    };

    if let Err(reason) = looks_like_private_key(&contents) {
        return AuthOutcome::Skipped(format!(
            "identity '{path}' does not look like a usable private key: {reason}"
        ));
    }

    AuthOutcome::Accepted(Identity::KeyFile {
        path: path.to_path_buf(),
        passphrase: env.identity_file_password.clone(),
    })
}

/// Structural check only; libssh2 does the real parse when authenticating.
fn looks_like_private_key(contents: &str) -> Result<(), &'static str> {
    let text = contents.trim_start();
    if text.starts_with(PUTTY_HEADER) {
        return Err("PuTTY key files are not supported, convert it to OpenSSH format");
    }
    let Some(begin) = text.find(PEM_BEGIN) else {
        return Err("no BEGIN line found");
    };
    let body = text.get(begin..).unwrap_or_default();
    let Some(end) = body.find(PEM_END) else {
        return Err("key block is not terminated");
    };
    let (header, footer) = body.split_at(end);
    if !header.lines().next().is_some_and(|line| line.ends_with(PRIVATE_KEY_LABEL))
        || !footer.lines().next().is_some_and(|line| line.ends_with(PRIVATE_KEY_LABEL))
    {
        return Err("block is not a private key");
    }
    Ok(())
}

fn read_key(path: &Utf8Path) -> io::Result<String> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "path has no file name"))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read_to_string(file_name)
}

/// An identity together with the provider that produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedIdentity {
    /// Name of the provider, for logging.
    pub provider: String,
    /// Identity handed to the transport.
    pub identity: Identity,
}

/// Ordered list of providers; earlier entries are preferred.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialChain {
    providers: Vec<CredentialProvider>,
}

impl CredentialChain {
    /// Builds a chain from providers in preference order.
    #[must_use]
    pub const fn new(providers: Vec<CredentialProvider>) -> Self {
        Self { providers }
    }

    /// Environment key file, agent, `id_ed25519`, `id_rsa`, then Pageant.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            CredentialProvider::environment_key_file(),
            CredentialProvider::agent_socket(),
            CredentialProvider::conventional_key_file("id_ed25519"),
            CredentialProvider::conventional_key_file("id_rsa"),
            CredentialProvider::platform_agent(),
        ])
    }

    /// Providers in preference order.
    #[must_use]
    pub fn providers(&self) -> &[CredentialProvider] {
        &self.providers
    }

    /// Walks the chain and collects accepted identities.
    ///
    /// An empty result means every provider was skipped.
    #[must_use]
    pub fn resolve(&self, env: &DeployEnvironment) -> Vec<ResolvedIdentity> {
        info!("Using the following authentication attempts:");
        let mut accepted = Vec::new();
        for provider in &self.providers {
            let name = provider.name();
            match provider.attempt(env) {
                AuthOutcome::Accepted(identity) => {
                    info!("USING - {name}");
                    accepted.push(ResolvedIdentity {
                        provider: name,
                        identity,
                    });
                    if !provider.continue_on_success {
                        break;
                    }
                }
                AuthOutcome::Skipped(reason) => info!("SKIP - {name}: {reason}"),
            }
        }
        accepted
    }
}

impl Default for CredentialChain {
    fn default() -> Self {
        Self::standard()
    }
}
