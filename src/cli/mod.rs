//! Command-line interface definitions for the `shardeploy` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `shardeploy` binary.
#[derive(Debug, Parser)]
#[command(
    name = "shardeploy",
    about = "Deploy build artifacts to remote shards over SSH",
    version,
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run one or more deploy tasks.
    #[command(name = "deploy", about = "Run one or more deploy tasks")]
    Deploy(DeployCommand),
    /// List the tasks offered by the active deploy plan.
    #[command(name = "list", about = "List the tasks offered by the deploy plan")]
    List(ListCommand),
}

/// Arguments for the `shardeploy deploy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Archive to deploy, for example `build/libs/plugin-1.0.jar`.
    #[arg(long, value_name = "PATH")]
    pub(crate) artifact: String,
    /// Version string of the archive.
    #[arg(long, value_name = "VERSION")]
    pub(crate) artifact_version: String,
    /// Project name used for jar and symlink names.
    ///
    /// Derived from `<project>-<version>.jar` when omitted.
    #[arg(long, value_name = "NAME")]
    pub(crate) project_name: Option<String>,
    /// Deploy plan file overriding configuration and discovery.
    #[arg(long, value_name = "PATH")]
    pub(crate) plan: Option<String>,
    /// Tasks to run, such as `dev1-deploy-lock` or `stage-deploy`.
    #[arg(required = true, value_name = "TASK")]
    pub(crate) tasks: Vec<String>,
}

/// Arguments for the `shardeploy list` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ListCommand {
    /// Print the listing as JSON.
    #[arg(long)]
    pub(crate) json: bool,
    /// Deploy plan file overriding configuration and discovery.
    #[arg(long, value_name = "PATH")]
    pub(crate) plan: Option<String>,
}
