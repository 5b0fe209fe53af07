//! Running several jobs with one connection per target.
//!
//! Jobs are grouped by [`TargetKey`]. Each group runs on a blocking worker
//! that opens its connection lazily and reuses it for the group's jobs in
//! order; groups run concurrently. Results come back in input order.

use std::collections::BTreeMap;

use tracing::warn;

use super::{DeployError, DeployJob, DeployReport, Deployer};
use crate::connection::Connection;
use crate::target::TargetKey;
use crate::transport::Transport;

/// Result of one job in a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobOutcome {
    /// Job name.
    pub job: String,
    /// Report or the error that stopped the job.
    pub result: Result<DeployReport, DeployError>,
}

impl JobOutcome {
    /// Returns `true` when the job completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

type IndexedJobs = Vec<(usize, DeployJob)>;

impl<T> Deployer<T>
where
    T: Transport + Clone + Send + Sync + 'static,
{
    /// Runs `jobs`, sharing one connection between jobs on the same target.
    ///
    /// A job whose connection cannot be opened fails on its own; the next
    /// job for that target tries a fresh connection. The connection of the
    /// first job in a group carries that job's credential chain.
    pub async fn run_batch(&self, jobs: Vec<DeployJob>) -> Vec<JobOutcome> {
        let total = jobs.len();
        let mut groups: BTreeMap<TargetKey, IndexedJobs> = BTreeMap::new();
        for (index, job) in jobs.into_iter().enumerate() {
            groups.entry(job.target.key()).or_default().push((index, job));
        }

        let mut workers = Vec::with_capacity(groups.len());
        for group in groups.into_values() {
            let names: Vec<(usize, String)> = group
                .iter()
                .map(|(index, job)| (*index, job.name.clone()))
                .collect();
            let deployer = self.clone();
            let handle = tokio::task::spawn_blocking(move || deployer.run_group(group));
            workers.push((names, handle));
        }

        let mut slots: Vec<Option<JobOutcome>> = vec![None; total];
        for (names, handle) in workers {
            let outcomes = match handle.await {
                Ok(outcomes) => outcomes,
                Err(err) => names
                    .into_iter()
                    .map(|(index, job)| {
                        let outcome = JobOutcome {
                            job: job.clone(),
                            result: Err(DeployError::WorkerStopped {
                                job,
                                message: err.to_string(),
                            }),
                        };
                        (index, outcome)
                    })
                    .collect(),
            };
            for (index, outcome) in outcomes {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(outcome);
                }
            }
        }
        slots.into_iter().flatten().collect()
    }

    fn run_group(&self, group: IndexedJobs) -> Vec<(usize, JobOutcome)> {
        let mut connection: Option<Connection<T::Session>> = None;
        group
            .into_iter()
            .map(|(index, job)| {
                let result = self.run_shared(&mut connection, &job);
                if let Err(err) = &result {
                    warn!(job = %job.name, error = %err, "Deploy failed");
                }
                (
                    index,
                    JobOutcome {
                        job: job.name,
                        result,
                    },
                )
            })
            .collect()
    }

    fn run_shared(
        &self,
        slot: &mut Option<Connection<T::Session>>,
        job: &DeployJob,
    ) -> Result<DeployReport, DeployError> {
        job.validate()?;
        let mut connection = match slot.take() {
            Some(open) => open,
            None => self.connect(job)?,
        };
        let result = self.run_on(&mut connection, job);
        // A broken session is dropped so the next job reconnects.
        if !matches!(result, Err(DeployError::Connection(_))) {
            *slot = Some(connection);
        }
        result
    }
}
