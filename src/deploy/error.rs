//! Errors raised while deploying.

use thiserror::Error;

use crate::connection::ConnectionError;

/// Errors raised by the deploy orchestrator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeployError {
    /// Raised when a job fails validation.
    #[error("invalid deploy job '{job}': {reason}")]
    InvalidJob {
        /// Job name.
        job: String,
        /// Violated invariant.
        reason: String,
    },
    /// Raised when the connection cannot be opened or breaks mid-job.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Raised when the shard is held by someone else.
    #[error(
        "Failed to deploy {job}! Shard {domain}/{shard} is currently being used by another developer! (lockout exited with {exit_code})"
    )]
    LockBusy {
        /// Job name.
        job: String,
        /// Lock domain.
        domain: String,
        /// Shard requested.
        shard: String,
        /// Exit code reported by the lockout script.
        exit_code: i32,
    },
    /// Raised when repointing the stable symlink fails.
    #[error("failed to relink {link} in {path} (exit code {exit_code}): {stderr}")]
    RelinkFailed {
        /// Remote directory.
        path: String,
        /// Symlink name.
        link: String,
        /// Exit code of the relink command.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the worker running a group of jobs stopped unexpectedly.
    #[error("deploy worker for {job} stopped unexpectedly: {message}")]
    WorkerStopped {
        /// Job name.
        job: String,
        /// Join error text.
        message: String,
    },
}
