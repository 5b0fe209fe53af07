//! Configuration loading via `ortho-config`.
//!
//! [`DeployConfig`] holds the knobs that are not part of a deploy plan: which
//! plan file to use, how the lockout script is invoked, and how often remote
//! commands are polled.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::exec::PollSettings;
use crate::lockout::{DEFAULT_LOCK_NOTE, DEFAULT_LOCKOUT_SCRIPT, Lockout};

/// Default poll interval for remote command output, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Deploy settings derived from configuration files and environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SHARDEPLOY",
    discovery(
        app_name = "shardeploy",
        env_var = "SHARDEPLOY_CONFIG_PATH",
        config_file_name = "shardeploy.toml",
        dotfile_name = ".shardeploy.toml",
        project_file_name = "shardeploy.toml"
    )
)]
pub struct DeployConfig {
    /// Explicit deploy plan file. When unset the plan is discovered, falling
    /// back to the built-in standard plan.
    pub plan_file: Option<String>,
    /// Remote path of the lockout script.
    #[ortho_config(default = DEFAULT_LOCKOUT_SCRIPT.to_owned())]
    pub lockout_script: String,
    /// Note recorded with every lock claim.
    #[ortho_config(default = DEFAULT_LOCK_NOTE.to_owned())]
    pub lock_note: String,
    /// Sleep between polls of an idle command channel.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl DeployConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to shardeploy.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("shardeploy")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that the lockout settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the variable and key to
    /// set when a required value is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.lockout_script,
            &FieldMetadata::new(
                "lockout script path",
                "SHARDEPLOY_LOCKOUT_SCRIPT",
                "lockout_script",
            ),
        )?;
        Self::require_field(
            &self.lock_note,
            &FieldMetadata::new("lock claim note", "SHARDEPLOY_LOCK_NOTE", "lock_note"),
        )?;
        if let Some(path) = &self.plan_file {
            Self::require_field(
                path,
                &FieldMetadata::new("deploy plan path", "SHARDEPLOY_PLAN_FILE", "plan_file"),
            )?;
        }
        Ok(())
    }

    /// Plan file override, if configured.
    #[must_use]
    pub fn plan_path(&self) -> Option<Utf8PathBuf> {
        self.plan_file.as_deref().map(Utf8PathBuf::from)
    }

    /// Lockout client for the configured script.
    #[must_use]
    pub fn lockout(&self) -> Lockout {
        Lockout::new(self.lockout_script.trim())
    }

    /// Poll settings for remote commands.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        PollSettings::with_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
