//! Deploy plans: named remotes and the destinations deployed to them.
//!
//! Plans are TOML files located with `OrthoConfig`'s discovery search order
//! (`SHARDEPLOY_PLAN_PATH`, then `shardeploy-plan.toml` or
//! `.shardeploy-plan.toml` in the usual configuration directories). When no
//! file exists the built-in [`presets::STANDARD_PLAN`] is used.

pub mod presets;


use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::ConfigDiscovery;
use ortho_config::toml;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::{CredentialChain, CredentialProvider};
use crate::lockout::ShardLockRequest;
use crate::target::{HostKeyPolicy, RemoteTarget};

const APP_NAME: &str = "shardeploy";
const PLAN_ENV_VAR: &str = "SHARDEPLOY_PLAN_PATH";
const PLAN_FILE_NAME: &str = "shardeploy-plan.toml";
const PLAN_DOTFILE_NAME: &str = ".shardeploy-plan.toml";
const DEFAULT_SSH_PORT: u16 = 22;

/// Errors raised while locating, reading, or validating a plan.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PlanError {
    /// Raised when the plan file cannot be read.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the TOML cannot be parsed.
    #[error("failed to parse {origin}: {message}")]
    Parse {
        /// File or preset being parsed.
        origin: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the plan is well-formed TOML but inconsistent.
    #[error("invalid plan {origin}: {message}")]
    Invalid {
        /// File or preset being validated.
        origin: String,
        /// Human-readable error message.
        message: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    #[serde(default)]
    remotes: BTreeMap<String, RemoteSpec>,
    #[serde(default)]
    destinations: BTreeMap<String, DestinationSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RemoteSpec {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    user: Option<String>,
    #[serde(default)]
    connect_timeout_ms: u64,
    #[serde(default)]
    host_key: HostKeySpec,
    credentials: Option<Vec<CredentialSpec>>,
}

const fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
enum HostKeySpec {
    #[default]
    AllowAny,
    TrustOnFirstUse,
    Strict { known_hosts: String },
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum CredentialKind {
    EnvironmentKeyFile,
    ConventionalKeyFile,
    AgentSocket,
    PlatformAgent,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialSpec {
    kind: CredentialKind,
    key: Option<String>,
    continue_on_success: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DestinationSpec {
    remote: String,
    mode: DestinationMode,
    paths: Vec<String>,
    lock: Option<LockSpec>,
    link_name: Option<String>,
}

/// Replacement strategy named in a plan.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationMode {
    /// Clean old jars and upload a versioned jar.
    Overwrite,
    /// Upload the archive and repoint a stable symlink.
    SymlinkSwap,
}

impl DestinationMode {
    /// Label used in listings.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::SymlinkSwap => "symlink-swap",
        }
    }
}

/// Shard lock configured for a destination.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LockSpec {
    /// Lock domain.
    pub domain: String,
    /// Shard, or `*` for every shard in the domain.
    pub shard: String,
    /// Claim duration in minutes; ignored for check-only locks.
    #[serde(default)]
    pub minutes: u32,
    /// Only check the lock instead of claiming it.
    #[serde(default)]
    pub check_only: bool,
}

impl LockSpec {
    /// Builds the lockout request, claiming on behalf of `holder` unless
    /// the lock is check-only.
    #[must_use]
    pub fn request(&self, holder: &str, note: &str) -> ShardLockRequest {
        if self.check_only {
            ShardLockRequest::check(&self.domain, &self.shard)
        } else {
            ShardLockRequest::claim(&self.domain, &self.shard, holder, self.minutes).with_note(note)
        }
    }
}

/// A named host plus the credentials used to reach it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Remote {
    /// Endpoint description.
    pub target: RemoteTarget,
    /// Credential chain, in preference order.
    pub credentials: CredentialChain,
}

/// A named deploy destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Destination {
    /// Destination name, also the task prefix.
    pub name: String,
    /// Name of the remote hosting the destination.
    pub remote: String,
    /// Replacement strategy.
    pub mode: DestinationMode,
    /// Remote directories receiving the artifact.
    pub paths: Vec<String>,
    /// Optional shard lock.
    pub lock: Option<LockSpec>,
    /// Symlink base name override for symlink swaps.
    pub link_name: Option<String>,
}

/// Where a plan was loaded from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlanOrigin {
    /// The built-in standard plan.
    Standard,
    /// A plan file on disk.
    File(Utf8PathBuf),
}

/// A validated set of remotes and destinations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployPlan {
    remotes: BTreeMap<String, Remote>,
    destinations: BTreeMap<String, Destination>,
    origin: PlanOrigin,
}

impl DeployPlan {
    /// The built-in plan for the shared shard hosts.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] if the preset fails validation.
    pub fn standard() -> Result<Self, PlanError> {
        Self::parse(presets::STANDARD_PLAN, PlanOrigin::Standard)
    }

    /// Reads and validates the plan at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Io`] when the file cannot be read and
    /// [`PlanError::Parse`] or [`PlanError::Invalid`] for bad content.
    pub fn load(path: &Utf8Path) -> Result<Self, PlanError> {
        let contents = read_plan(path)?;
        Self::parse(&contents, PlanOrigin::File(path.to_path_buf()))
    }

    /// Parses plan TOML.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Parse`] or [`PlanError::Invalid`].
    pub fn parse(contents: &str, origin: PlanOrigin) -> Result<Self, PlanError> {
        let label = origin.to_string();
        let file: PlanFile = toml::from_str(contents).map_err(|err| PlanError::Parse {
            origin: label.clone(),
            message: err.to_string(),
        })?;
        let invalid = |message: String| PlanError::Invalid {
            origin: label.clone(),
            message,
        };

        let mut remotes = BTreeMap::new();
        for (name, spec) in file.remotes {
            let remote = build_remote(&name, spec).map_err(&invalid)?;
            remotes.insert(name, remote);
        }

        let mut destinations = BTreeMap::new();
        for (name, spec) in file.destinations {
            let destination = build_destination(&name, spec, &remotes).map_err(&invalid)?;
            destinations.insert(name, destination);
        }

        Ok(Self {
            remotes,
            destinations,
            origin,
        })
    }

    /// Source of this plan.
    #[must_use]
    pub const fn origin(&self) -> &PlanOrigin {
        &self.origin
    }

    /// Looks up a remote by name.
    #[must_use]
    pub fn remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.get(name)
    }

    /// Looks up a destination by name.
    #[must_use]
    pub fn destination(&self, name: &str) -> Option<&Destination> {
        self.destinations.get(name)
    }

    /// Destinations ordered by name.
    pub fn destinations(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.values()
    }
}

impl std::fmt::Display for PlanOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => f.write_str("built-in standard plan"),
            Self::File(path) => write!(f, "{path}"),
        }
    }
}

fn build_remote(name: &str, spec: RemoteSpec) -> Result<Remote, String> {
    if spec.host.trim().is_empty() {
        return Err(format!("remote '{name}' has an empty host"));
    }
    let policy = match spec.host_key {
        HostKeySpec::AllowAny => HostKeyPolicy::AllowAny,
        HostKeySpec::TrustOnFirstUse => HostKeyPolicy::TrustOnFirstUse,
        HostKeySpec::Strict { known_hosts } => HostKeyPolicy::Strict {
            known_hosts: Utf8PathBuf::from(known_hosts),
        },
    };
    let credentials = match spec.credentials {
        None => CredentialChain::standard(),
        Some(entries) => {
            let providers = entries
                .into_iter()
                .map(|entry| build_provider(name, entry))
                .collect::<Result<Vec<_>, _>>()?;
            if providers.is_empty() {
                return Err(format!("remote '{name}' lists no credentials"));
            }
            CredentialChain::new(providers)
        }
    };
    let target = RemoteTarget::new(name, spec.host.trim())
        .with_port(spec.port)
        .with_user(spec.user.filter(|user| !user.trim().is_empty()))
        .with_connect_timeout(Duration::from_millis(spec.connect_timeout_ms))
        .with_host_key_policy(policy);
    Ok(Remote {
        target,
        credentials,
    })
}

fn build_provider(remote: &str, spec: CredentialSpec) -> Result<CredentialProvider, String> {
    let provider = match spec.kind {
        CredentialKind::EnvironmentKeyFile => CredentialProvider::environment_key_file(),
        CredentialKind::ConventionalKeyFile => match spec.key {
            Some(key) if !key.trim().is_empty() => CredentialProvider::conventional_key_file(key),
            _ => {
                return Err(format!(
                    "remote '{remote}': conventional-key-file credentials need a key name"
                ));
            }
        },
        CredentialKind::AgentSocket => CredentialProvider::agent_socket(),
        CredentialKind::PlatformAgent => CredentialProvider::platform_agent(),
    };
    Ok(match spec.continue_on_success {
        Some(value) => provider.with_continue_on_success(value),
        None => provider,
    })
}

fn build_destination(
    name: &str,
    spec: DestinationSpec,
    remotes: &BTreeMap<String, Remote>,
) -> Result<Destination, String> {
    if !remotes.contains_key(&spec.remote) {
        return Err(format!(
            "destination '{name}' refers to unknown remote '{}'",
            spec.remote
        ));
    }
    if spec.paths.is_empty() || spec.paths.iter().any(|path| path.trim().is_empty()) {
        return Err(format!("destination '{name}': paths must be non-empty"));
    }
    if let Some(lock) = &spec.lock {
        if lock.domain.trim().is_empty() || lock.shard.trim().is_empty() {
            return Err(format!("destination '{name}': lock needs a domain and shard"));
        }
        if !lock.check_only && lock.minutes == 0 {
            return Err(format!(
                "destination '{name}': claimed locks need a positive duration in minutes"
            ));
        }
    }
    Ok(Destination {
        name: name.to_owned(),
        remote: spec.remote,
        mode: spec.mode,
        paths: spec.paths,
        lock: spec.lock,
        link_name: spec.link_name.filter(|link| !link.trim().is_empty()),
    })
}

/// Finds plan files using `OrthoConfig`'s discovery order.
#[derive(Clone, Debug)]
pub struct PlanLocator {
    discovery: ConfigDiscovery,
}

impl PlanLocator {
    /// Locator using the standard discovery settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: ConfigDiscovery::builder(APP_NAME)
                .env_var(PLAN_ENV_VAR)
                .config_file_name(PLAN_FILE_NAME)
                .dotfile_name(PLAN_DOTFILE_NAME)
                .project_file_name(PLAN_FILE_NAME)
                .build(),
        }
    }

    /// Locator using an explicit discovery configuration.
    #[must_use]
    pub const fn with_discovery(discovery: ConfigDiscovery) -> Self {
        Self { discovery }
    }

    /// Returns the first existing candidate, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Io`] when a candidate cannot be inspected.
    pub fn locate(&self) -> Result<Option<Utf8PathBuf>, PlanError> {
        for candidate in self.discovery.utf8_candidates() {
            if path_exists(&candidate)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Loads `explicit` when given, otherwise the first discovered plan,
    /// otherwise the standard plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when the chosen plan cannot be read or is
    /// invalid.
    pub fn load(&self, explicit: Option<&Utf8Path>) -> Result<DeployPlan, PlanError> {
        if let Some(path) = explicit {
            return DeployPlan::load(path);
        }
        match self.locate()? {
            Some(path) => DeployPlan::load(&path),
            None => DeployPlan::standard(),
        }
    }
}

impl Default for PlanLocator {
    fn default() -> Self {
        Self::new()
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), PlanError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| PlanError::Io {
        path: path.to_path_buf(),
        message: String::from("plan file path is missing a filename"),
    })?;
    Ok((parent, file_name))
}

fn path_exists(path: &Utf8Path) -> Result<bool, PlanError> {
    let (parent, file_name) = split_path(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name).map_err(|err| PlanError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(PlanError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

fn read_plan(path: &Utf8Path) -> Result<String, PlanError> {
    let (parent, file_name) = split_path(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| PlanError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;
    dir.read_to_string(file_name).map_err(|err| PlanError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
