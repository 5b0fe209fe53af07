//! Core library for the shardeploy deploy tool.
//!
//! The crate connects to remote shard hosts over SSH, optionally claims a
//! shard lock through the shared lockout script, and replaces the deployed
//! plugin archive either by overwriting versioned jars or by swapping a
//! stable symlink. Transport is abstracted behind [`transport::Transport`]
//! so deploys can be exercised against the scripted fakes in
//! [`test_support`].

pub mod auth;
pub mod config;
pub mod connection;
pub mod deploy;
pub mod environment;
pub mod exec;
pub mod lockout;
pub mod plan;
pub mod process;
mod remote_command;
pub mod target;
pub mod tasks;
pub mod test_support;
pub mod transport;

pub use auth::{CredentialChain, CredentialProvider, CredentialSource};
pub use config::{ConfigError, DeployConfig};
pub use connection::{Connection, ConnectionError};
pub use deploy::{
    Artifact, DeployError, DeployJob, DeployJobBuilder, DeployMode, DeployReport, DeployStep,
    Deployer, JobOutcome,
};
pub use environment::{DeployEnvironment, EnvironmentError};
pub use exec::{CommandResult, PollSettings};
pub use lockout::{LockMode, Lockout, LockoutError, ShardLockRequest};
pub use plan::{DeployPlan, PlanError, PlanLocator};
pub use target::{HostKeyPolicy, RemoteTarget, TargetKey};
pub use tasks::{DeployTask, TaskError, TaskVariant};
pub use transport::{Ssh2Transport, Transport, TransportError};
