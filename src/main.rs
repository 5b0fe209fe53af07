//! Binary entry point for the shardeploy CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use shardeploy::config::ConfigError;
use shardeploy::plan::{DeployPlan, PlanError, PlanLocator};
use shardeploy::process::ProcessCommandRunner;
use shardeploy::tasks::{TaskError, TaskInputs, TaskListing, list_tasks, resolve_jobs};
use shardeploy::{Artifact, DeployConfig, DeployEnvironment, Deployer, JobOutcome, Ssh2Transport};

mod cli;

use cli::{Cli, DeployCommand, ListCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),
    #[error("task error: {0}")]
    Task(#[from] TaskError),
    #[error("{failed} of {total} deploy tasks failed")]
    DeployFailed { failed: usize, total: usize },
    #[error("failed to write output: {0}")]
    Output(String),
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        Self::Output(value.to_string())
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Deploy(command) => run_deploy(command).await,
        Cli::List(command) => run_list(&command),
    }
}

fn load_config() -> Result<DeployConfig, CliError> {
    let config = DeployConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

fn load_plan(config: &DeployConfig, flag: Option<&str>) -> Result<DeployPlan, CliError> {
    let explicit = flag.map(Utf8PathBuf::from).or_else(|| config.plan_path());
    let plan = PlanLocator::new().load(explicit.as_deref())?;
    info!(origin = %plan.origin(), "Loaded deploy plan");
    Ok(plan)
}

async fn run_deploy(args: DeployCommand) -> Result<(), CliError> {
    let config = load_config()?;
    let plan = load_plan(&config, args.plan.as_deref())?;
    let env = DeployEnvironment::from_process();
    let inputs = TaskInputs {
        artifact: Artifact::new(args.artifact, args.artifact_version),
        project_name: args.project_name,
        lock_note: config.lock_note.clone(),
    };
    let jobs = resolve_jobs(&plan, &args.tasks, &inputs, &env, &ProcessCommandRunner)?;

    let deployer = Deployer::new(Ssh2Transport, env)
        .with_lockout(config.lockout())
        .with_poll_settings(config.poll_settings());
    let outcomes = deployer.run_batch(jobs).await;

    write_summary(io::stdout().lock(), &outcomes)?;
    let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
    if failed > 0 {
        return Err(CliError::DeployFailed {
            failed,
            total: outcomes.len(),
        });
    }
    Ok(())
}

fn run_list(args: &ListCommand) -> Result<(), CliError> {
    let config = load_config()?;
    let plan = load_plan(&config, args.plan.as_deref())?;
    write_listing(io::stdout().lock(), &list_tasks(&plan), args.json)
}

fn write_summary(mut target: impl Write, outcomes: &[JobOutcome]) -> Result<(), CliError> {
    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                info!(task = %outcome.job, target = %report.target, "Deploy complete");
                writeln!(
                    target,
                    "{}: ok ({} steps, {} bytes uploaded)",
                    outcome.job,
                    report.steps.len(),
                    report.bytes_uploaded
                )?;
            }
            Err(err) => {
                error!(task = %outcome.job, error = %err, "Deploy failed");
                writeln!(target, "{}: FAILED: {err}", outcome.job)?;
            }
        }
    }
    Ok(())
}

fn write_listing(mut target: impl Write, rows: &[TaskListing], json: bool) -> Result<(), CliError> {
    if json {
        serde_json::to_writer_pretty(&mut target, rows)
            .map_err(|err| CliError::Output(err.to_string()))?;
        writeln!(target)?;
        return Ok(());
    }

    let mut current_group = None;
    for row in rows {
        if current_group != Some(row.group) {
            writeln!(target, "{}:", row.group)?;
            current_group = Some(row.group);
        }
        let lock = row.lock.as_deref().unwrap_or("no lockout");
        writeln!(
            target,
            "  {:<20} {:<10} {:<13} {lock}",
            row.name, row.remote, row.mode
        )?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
