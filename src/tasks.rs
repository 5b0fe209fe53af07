//! Named deploy tasks and their translation into [`DeployJob`]s.
//!
//! Every plan destination yields two tasks: `<name>-deploy-lock`, which
//! claims (or checks) the destination's shard lock first, and
//! `<name>-deploy`, which skips the lockout.

use camino::Utf8Path;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::deploy::{Artifact, DeployError, DeployJob, DeployMode};
use crate::environment::{DeployEnvironment, EnvironmentError};
use crate::plan::{DeployPlan, Destination, DestinationMode};
use crate::process::CommandRunner;

const LOCKING_SUFFIX: &str = "-deploy-lock";
const PLAIN_SUFFIX: &str = "-deploy";

/// Which flavour of a destination's task to run.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskVariant {
    /// Take the shard lock before deploying.
    Locking,
    /// Deploy without touching the lockout.
    Plain,
}

impl TaskVariant {
    /// Suffix appended to the destination name.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Locking => LOCKING_SUFFIX,
            Self::Plain => PLAIN_SUFFIX,
        }
    }

    /// Group label shown in listings.
    #[must_use]
    pub const fn group(self) -> &'static str {
        match self {
            Self::Locking => "Deploy (locking)",
            Self::Plain => "Deploy",
        }
    }
}

/// A destination plus the variant requested for it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeployTask {
    /// Destination name in the plan.
    pub destination: String,
    /// Requested variant.
    pub variant: TaskVariant,
}

impl DeployTask {
    /// Splits a task name such as `dev1-deploy-lock` into its parts.
    ///
    /// Returns `None` when the name carries neither suffix or has nothing
    /// before it.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let trimmed = name.trim();
        let (destination, variant) = if let Some(dest) = trimmed.strip_suffix(LOCKING_SUFFIX) {
            (dest, TaskVariant::Locking)
        } else {
            (trimmed.strip_suffix(PLAIN_SUFFIX)?, TaskVariant::Plain)
        };
        if destination.is_empty() {
            return None;
        }
        Some(Self {
            destination: destination.to_owned(),
            variant,
        })
    }

    /// Full task name.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}{}", self.destination, self.variant.suffix())
    }

    /// Group label of the task's variant.
    #[must_use]
    pub const fn group(&self) -> &'static str {
        self.variant.group()
    }
}

/// Every task the plan offers, locking variants first, each group ordered
/// by destination name.
#[must_use]
pub fn all_tasks(plan: &DeployPlan) -> Vec<DeployTask> {
    [TaskVariant::Locking, TaskVariant::Plain]
        .into_iter()
        .flat_map(|variant| {
            plan.destinations().map(move |dest| DeployTask {
                destination: dest.name.clone(),
                variant,
            })
        })
        .collect()
}

/// One row of `shardeploy list`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskListing {
    /// Task name.
    pub name: String,
    /// Group label.
    pub group: &'static str,
    /// Remote the destination lives on.
    pub remote: String,
    /// Replacement strategy label.
    pub mode: &'static str,
    /// Remote directories receiving the artifact.
    pub paths: Vec<String>,
    /// Lockout performed by the task, if any.
    pub lock: Option<String>,
}

/// Describes every task of `plan` for display.
#[must_use]
pub fn list_tasks(plan: &DeployPlan) -> Vec<TaskListing> {
    all_tasks(plan)
        .into_iter()
        .filter_map(|task| {
            let dest = plan.destination(&task.destination)?;
            let lock = match (task.variant, &dest.lock) {
                (TaskVariant::Locking, Some(lock)) if lock.check_only => {
                    Some(format!("check {}/{}", lock.domain, lock.shard))
                }
                (TaskVariant::Locking, Some(lock)) => Some(format!(
                    "claim {}/{} for {} min",
                    lock.domain, lock.shard, lock.minutes
                )),
                _ => None,
            };
            Some(TaskListing {
                name: task.name(),
                group: task.group(),
                remote: dest.remote.clone(),
                mode: dest.mode.label(),
                paths: dest.paths.clone(),
                lock,
            })
        })
        .collect()
}

/// Derives the project name from an archive called `<project>-<version>.jar`.
///
/// Falls back to the file stem when the name does not follow that pattern.
#[must_use]
pub fn derive_project_name(artifact: &Utf8Path, version: &str) -> Option<String> {
    let file_name = artifact.file_name()?;
    let suffix = format!("-{version}.jar");
    let base = match file_name.strip_suffix(suffix.as_str()) {
        Some(project) if !version.is_empty() => project,
        _ => artifact.file_stem()?,
    };
    (!base.is_empty()).then(|| base.to_owned())
}

/// Errors raised while turning task names into jobs.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Raised when a task name does not match any destination.
    #[error("unknown task '{name}'; run `shardeploy list` to see available tasks")]
    UnknownTask {
        /// Task name as given.
        name: String,
    },
    /// Raised when the project name cannot be derived from the artifact.
    #[error("cannot derive a project name from {artifact}; pass --project-name")]
    ProjectName {
        /// Artifact path.
        artifact: String,
    },
    /// Raised when a destination refers to a remote the plan lacks.
    #[error("destination '{destination}' refers to unknown remote '{remote}'")]
    MissingRemote {
        /// Destination name.
        destination: String,
        /// Remote name.
        remote: String,
    },
    /// Raised when the lockout holder name cannot be determined.
    #[error(transparent)]
    Holder(#[from] EnvironmentError),
    /// Raised when a job fails validation.
    #[error(transparent)]
    Job(#[from] DeployError),
}

/// Inputs shared by every task in one invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskInputs {
    /// Archive to deploy.
    pub artifact: Artifact,
    /// Project name override; derived from the artifact when `None`.
    pub project_name: Option<String>,
    /// Note recorded with lock claims.
    pub lock_note: String,
}

/// Resolves task names into validated jobs, in the order given.
///
/// The lockout holder is looked up once, and only when some task claims a
/// lock.
///
/// # Errors
///
/// Returns [`TaskError`] for unknown tasks, an underivable project name, a
/// missing holder name, or a job that fails validation.
pub fn resolve_jobs<R: CommandRunner>(
    plan: &DeployPlan,
    task_names: &[String],
    inputs: &TaskInputs,
    env: &DeployEnvironment,
    runner: &R,
) -> Result<Vec<DeployJob>, TaskError> {
    let resolved = task_names
        .iter()
        .map(|name| {
            DeployTask::parse(name)
                .and_then(|task| plan.destination(&task.destination).map(|dest| (task, dest)))
                .ok_or_else(|| TaskError::UnknownTask { name: name.clone() })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let project = match &inputs.project_name {
        Some(name) if !name.trim().is_empty() => name.trim().to_owned(),
        _ => derive_project_name(&inputs.artifact.path, &inputs.artifact.version).ok_or_else(
            || TaskError::ProjectName {
                artifact: inputs.artifact.path.to_string(),
            },
        )?,
    };

    let needs_holder = resolved.iter().any(|(task, dest)| {
        task.variant == TaskVariant::Locking
            && dest.lock.as_ref().is_some_and(|lock| !lock.check_only)
    });
    let holder = if needs_holder {
        env.holder_name(runner)?
    } else {
        String::new()
    };

    resolved
        .into_iter()
        .map(|(task, dest)| build_job(plan, &task, dest, &project, &holder, inputs))
        .collect()
}

fn build_job(
    plan: &DeployPlan,
    task: &DeployTask,
    dest: &Destination,
    project: &str,
    holder: &str,
    inputs: &TaskInputs,
) -> Result<DeployJob, TaskError> {
    let remote = plan
        .remote(&dest.remote)
        .ok_or_else(|| TaskError::MissingRemote {
            destination: dest.name.clone(),
            remote: dest.remote.clone(),
        })?;
    let mode = match dest.mode {
        DestinationMode::Overwrite => DeployMode::Overwrite {
            artifact_base_name: project.to_owned(),
        },
        DestinationMode::SymlinkSwap => DeployMode::SymlinkSwap {
            link_base_name: dest.link_name.clone().unwrap_or_else(|| project.to_owned()),
        },
    };
    let lock = match task.variant {
        TaskVariant::Locking => dest
            .lock
            .as_ref()
            .map(|lock| lock.request(holder, &inputs.lock_note)),
        TaskVariant::Plain => None,
    };
    debug!(task = %task.name(), mode = mode.label(), locked = lock.is_some(), "Resolved task");
    DeployJob::builder(task.name())
        .target(remote.target.clone())
        .credentials(remote.credentials.clone())
        .artifact(inputs.artifact.clone())
        .remote_paths(dest.paths.iter().cloned())
        .mode(mode)
        .lock(lock)
        .build()
        .map_err(TaskError::from)
}
