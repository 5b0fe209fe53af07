//! Deploy orchestration.
//!
//! A [`DeployJob`] is a short linear program: optional lock check, then
//! clean and upload (overwrite mode) or upload and relink (symlink swap).
//! The first failure aborts the rest of the job; jobs never affect each
//! other and nothing is retried.

mod batch;
mod error;
mod job;

#[cfg(test)]
mod tests;

pub use batch::JobOutcome;
pub use error::DeployError;
pub use job::{Artifact, DeployJob, DeployJobBuilder, DeployMode, DeployStep};

use tracing::{info, warn};

use crate::connection::Connection;
use crate::environment::DeployEnvironment;
use crate::exec::PollSettings;
use crate::lockout::{Lockout, LockoutError};
use crate::transport::{RemoteSession, Transport};

/// Summary of a successful job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployReport {
    /// Job name.
    pub job: String,
    /// Display form of the target.
    pub target: String,
    /// Steps that ran, in order.
    pub steps: Vec<DeployStep>,
    /// Total bytes uploaded.
    pub bytes_uploaded: u64,
}

/// Runs deploy jobs over a [`Transport`].
#[derive(Clone, Debug)]
pub struct Deployer<T> {
    transport: T,
    env: DeployEnvironment,
    lockout: Lockout,
    poll: PollSettings,
}

impl<T: Transport> Deployer<T> {
    /// Deployer with the default lockout script and poll settings.
    #[must_use]
    pub fn new(transport: T, env: DeployEnvironment) -> Self {
        Self {
            transport,
            env,
            lockout: Lockout::default(),
            poll: PollSettings::default(),
        }
    }

    /// Replaces the lockout coordinator.
    #[must_use]
    pub fn with_lockout(mut self, lockout: Lockout) -> Self {
        self.lockout = lockout;
        self
    }

    /// Replaces the command poll settings.
    #[must_use]
    pub const fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Opens a connection for `job`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Connection`] when the connection cannot be
    /// opened.
    pub fn connect(&self, job: &DeployJob) -> Result<Connection<T::Session>, DeployError> {
        Ok(Connection::open(
            &self.transport,
            &job.target,
            &job.credentials,
            &self.env,
            self.poll,
        )?)
    }

    /// Opens a connection and runs `job` on it.
    ///
    /// # Errors
    ///
    /// See [`Deployer::run_on`]; connection failures are reported as
    /// [`DeployError::Connection`].
    pub fn run(&self, job: &DeployJob) -> Result<DeployReport, DeployError> {
        job.validate()?;
        let mut connection = self.connect(job)?;
        self.run_on(&mut connection, job)
    }

    /// Runs `job` on an already open connection.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidJob`] for invalid jobs,
    /// [`DeployError::LockBusy`] when the shard is taken,
    /// [`DeployError::RelinkFailed`] when a relink exits non-zero, and
    /// [`DeployError::Connection`] for command or transfer failures.
    pub fn run_on(
        &self,
        connection: &mut Connection<T::Session>,
        job: &DeployJob,
    ) -> Result<DeployReport, DeployError> {
        job.validate()?;
        info!(job = %job.name, target = %job.target, mode = job.mode.label(), "Starting deploy");
        let mut report = DeployReport {
            job: job.name.clone(),
            target: job.target.to_string(),
            steps: Vec::new(),
            bytes_uploaded: 0,
        };
        for step in job.steps() {
            info!(job = %job.name, "Step: {step}");
            report.bytes_uploaded += self.execute_step(connection, job, &step)?;
            report.steps.push(step);
        }
        info!(job = %job.name, bytes = report.bytes_uploaded, "Deploy finished");
        Ok(report)
    }

    fn execute_step<S: RemoteSession>(
        &self,
        connection: &mut Connection<S>,
        job: &DeployJob,
        step: &DeployStep,
    ) -> Result<u64, DeployError> {
        match step {
            DeployStep::LockCheck(request) => {
                self.lockout
                    .acquire(connection, request)
                    .map_err(|err| match err {
                        LockoutError::Busy {
                            domain,
                            shard,
                            exit_code,
                        } => DeployError::LockBusy {
                            job: job.name.clone(),
                            domain,
                            shard,
                            exit_code,
                        },
                        LockoutError::Connection(source) => DeployError::Connection(source),
                    })?;
                Ok(0)
            }
            DeployStep::Clean { path, command } => {
                let result = connection.execute(command)?;
                if !result.is_success() {
                    warn!(
                        job = %job.name,
                        %path,
                        exit_code = result.exit_code,
                        stderr = %result.stderr_text().trim(),
                        "Cleaning old jars failed; continuing"
                    );
                }
                Ok(0)
            }
            DeployStep::Transfer { local, remote } => Ok(connection.upload(local, remote)?),
            DeployStep::Relink { path, command } => {
                let result = connection.execute(command)?;
                if result.is_success() {
                    return Ok(0);
                }
                let link = match &job.mode {
                    DeployMode::SymlinkSwap { link_base_name } => link_base_name.clone(),
                    DeployMode::Overwrite { artifact_base_name } => artifact_base_name.clone(),
                };
                Err(DeployError::RelinkFailed {
                    path: path.clone(),
                    link: format!("{link}.jar"),
                    exit_code: result.exit_code,
                    stderr: result.stderr_text().trim().to_owned(),
                })
            }
        }
    }
}
