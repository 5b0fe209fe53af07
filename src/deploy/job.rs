//! Deploy job description, validation, and step planning.

use std::fmt;

use camino::Utf8PathBuf;

use super::error::DeployError;
use crate::auth::CredentialChain;
use crate::lockout::{LockMode, ShardLockRequest};
use crate::remote_command;
use crate::target::RemoteTarget;

/// Build artifact shipped by a deploy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Artifact {
    /// Local path of the archive.
    pub path: Utf8PathBuf,
    /// Version string used in overwrite-mode file names.
    pub version: String,
}

impl Artifact {
    /// Creates an artifact description.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    /// File name of the archive, for example `plugin-1.0.jar`.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }
}

/// How the artifact replaces what is already deployed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeployMode {
    /// Delete `<base>*.jar`, then upload `<base>-<version>.jar`.
    Overwrite {
        /// Jar base name, usually the project name.
        artifact_base_name: String,
    },
    /// Upload the archive under its own name, then repoint `<link>.jar`.
    SymlinkSwap {
        /// Name of the stable symlink, without `.jar`.
        link_base_name: String,
    },
}

impl DeployMode {
    /// Short label used in listings.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Overwrite { .. } => "overwrite",
            Self::SymlinkSwap { .. } => "symlink-swap",
        }
    }
}

/// One planned remote action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeployStep {
    /// Claim or check the shard lock.
    LockCheck(ShardLockRequest),
    /// Remove older jars from a directory.
    Clean {
        /// Remote directory.
        path: String,
        /// Command line sent.
        command: String,
    },
    /// Upload the artifact.
    Transfer {
        /// Local archive.
        local: Utf8PathBuf,
        /// Absolute remote destination.
        remote: String,
    },
    /// Repoint the stable symlink at the uploaded archive.
    Relink {
        /// Remote directory.
        path: String,
        /// Command line sent.
        command: String,
    },
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockCheck(request) => match request.mode {
                LockMode::Claim { minutes, .. } => write!(
                    f,
                    "claim lock {}/{} for {minutes} minutes",
                    request.domain, request.shard
                ),
                LockMode::CheckOnly => {
                    write!(f, "check lock {}/{}", request.domain, request.shard)
                }
            },
            Self::Clean { path, .. } => write!(f, "clean {path}"),
            Self::Transfer { local, remote } => write!(f, "upload {local} to {remote}"),
            Self::Relink { path, .. } => write!(f, "relink in {path}"),
        }
    }
}

/// A validated deployment of one artifact to one destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployJob {
    /// Destination name, for example `dev1`.
    pub name: String,
    /// Host the artifact is shipped to.
    pub target: RemoteTarget,
    /// Credential chain used when this job opens the connection.
    pub credentials: CredentialChain,
    /// Archive being deployed.
    pub artifact: Artifact,
    /// Remote directories receiving the artifact, in order.
    pub remote_paths: Vec<String>,
    /// Replacement strategy.
    pub mode: DeployMode,
    /// Shard lock acquired before anything changes.
    pub lock: Option<ShardLockRequest>,
}

impl DeployJob {
    /// Starts a builder for a job called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DeployJobBuilder {
        DeployJobBuilder::new(name)
    }

    /// Checks the job invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidJob`] describing the first violation.
    pub fn validate(&self) -> Result<(), DeployError> {
        let invalid = |reason: &str| DeployError::InvalidJob {
            job: self.name.clone(),
            reason: reason.to_owned(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.remote_paths.is_empty() {
            return Err(invalid("paths must be non-empty"));
        }
        if self.remote_paths.iter().any(|path| path.trim().is_empty()) {
            return Err(invalid("remote paths must not be blank"));
        }
        if self.artifact.version.trim().is_empty() {
            return Err(invalid("artifact version must not be empty"));
        }
        if self.artifact.file_name().is_none() {
            return Err(invalid("artifact path must name a file"));
        }
        let base = match &self.mode {
            DeployMode::Overwrite { artifact_base_name } => artifact_base_name,
            DeployMode::SymlinkSwap { link_base_name } => link_base_name,
        };
        if base.trim().is_empty() {
            return Err(invalid("base name must not be empty"));
        }
        let link_shadows_artifact = matches!(
            &self.mode,
            DeployMode::SymlinkSwap { link_base_name }
                if self.artifact.file_name() == Some(format!("{link_base_name}.jar").as_str())
        );
        if link_shadows_artifact {
            return Err(invalid("symlink name collides with the artifact file name"));
        }
        Ok(())
    }

    /// Remote steps in execution order.
    ///
    /// Overwrite cleans every path before uploading anywhere; symlink swap
    /// uploads everywhere before relinking anything.
    #[must_use]
    pub fn steps(&self) -> Vec<DeployStep> {
        let mut steps = Vec::with_capacity(self.remote_paths.len() * 2 + 1);
        if let Some(request) = &self.lock {
            steps.push(DeployStep::LockCheck(request.clone()));
        }
        let file_name = self.artifact.file_name().unwrap_or_default();
        match &self.mode {
            DeployMode::Overwrite { artifact_base_name } => {
                let versioned = format!("{artifact_base_name}-{}.jar", self.artifact.version);
                steps.extend(self.remote_paths.iter().map(|path| DeployStep::Clean {
                    path: path.clone(),
                    command: remote_command::clean(path, artifact_base_name),
                }));
                steps.extend(self.remote_paths.iter().map(|path| DeployStep::Transfer {
                    local: self.artifact.path.clone(),
                    remote: remote_command::join_remote(path, &versioned),
                }));
            }
            DeployMode::SymlinkSwap { link_base_name } => {
                steps.extend(self.remote_paths.iter().map(|path| DeployStep::Transfer {
                    local: self.artifact.path.clone(),
                    remote: remote_command::join_remote(path, file_name),
                }));
                steps.extend(self.remote_paths.iter().map(|path| DeployStep::Relink {
                    path: path.clone(),
                    command: remote_command::relink(path, link_base_name, file_name),
                }));
            }
        }
        steps
    }
}

/// Builder for [`DeployJob`] that validates on [`DeployJobBuilder::build`].
#[derive(Clone, Debug)]
pub struct DeployJobBuilder {
    name: String,
    target: Option<RemoteTarget>,
    credentials: CredentialChain,
    artifact: Option<Artifact>,
    remote_paths: Vec<String>,
    mode: Option<DeployMode>,
    lock: Option<ShardLockRequest>,
}

impl DeployJobBuilder {
    /// Creates a builder using the standard credential chain.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            credentials: CredentialChain::standard(),
            artifact: None,
            remote_paths: Vec::new(),
            mode: None,
            lock: None,
        }
    }

    /// Sets the remote target.
    #[must_use]
    pub fn target(mut self, value: RemoteTarget) -> Self {
        self.target = Some(value);
        self
    }

    /// Replaces the credential chain.
    #[must_use]
    pub fn credentials(mut self, value: CredentialChain) -> Self {
        self.credentials = value;
        self
    }

    /// Sets the artifact.
    #[must_use]
    pub fn artifact(mut self, value: Artifact) -> Self {
        self.artifact = Some(value);
        self
    }

    /// Appends a remote directory.
    #[must_use]
    pub fn remote_path(mut self, value: impl Into<String>) -> Self {
        self.remote_paths.push(value.into());
        self
    }

    /// Appends several remote directories.
    #[must_use]
    pub fn remote_paths<I, P>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.remote_paths.extend(values.into_iter().map(Into::into));
        self
    }

    /// Sets the deploy mode.
    #[must_use]
    pub fn mode(mut self, value: DeployMode) -> Self {
        self.mode = Some(value);
        self
    }

    /// Sets or clears the shard lock.
    #[must_use]
    pub fn lock(mut self, value: Option<ShardLockRequest>) -> Self {
        self.lock = value;
        self
    }

    /// Builds and validates the job.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidJob`] when a required field is missing
    /// or an invariant does not hold.
    pub fn build(self) -> Result<DeployJob, DeployError> {
        let Self {
            name,
            target,
            credentials,
            artifact,
            remote_paths,
            mode,
            lock,
        } = self;
        let missing = |field: &str| DeployError::InvalidJob {
            job: name.clone(),
            reason: format!("{field} is required"),
        };
        let job = DeployJob {
            target: target.ok_or_else(|| missing("target"))?,
            artifact: artifact.ok_or_else(|| missing("artifact"))?,
            mode: mode.ok_or_else(|| missing("mode"))?,
            name: name.trim().to_owned(),
            credentials,
            remote_paths,
            lock,
        };
        job.validate()?;
        Ok(job)
    }
}
