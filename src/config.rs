//! Configuration loading via `ortho-config`.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::ProvisioningUnit;

/// Default working directory of the network (VPC, bastion, RDS) unit.
pub const DEFAULT_NETWORK_DIR: &str = "./vpc";

/// Default working directory of the database unit.
pub const DEFAULT_DATABASE_DIR: &str = "./database";

/// Coordinator settings derived from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STACKHOP",
    discovery(
        app_name = "stackhop",
        env_var = "STACKHOP_CONFIG_PATH",
        config_file_name = "stackhop.toml",
        dotfile_name = ".stackhop.toml",
        project_file_name = "stackhop.toml"
    )
)]
pub struct StackhopConfig {
    /// Working directory of the unit that provisions the VPC, bastion host,
    /// and private database instance.
    #[ortho_config(default = DEFAULT_NETWORK_DIR.to_owned())]
    pub network_dir: String,
    /// Working directory of the unit that provisions databases inside the
    /// private instance.
    #[ortho_config(default = DEFAULT_DATABASE_DIR.to_owned())]
    pub database_dir: String,
    /// Path to the `pulumi` executable.
    #[ortho_config(default = "pulumi".to_owned())]
    pub pulumi_bin: String,
    /// Package manager run as `<install_bin> install` in each unit.
    #[ortho_config(default = "npm".to_owned())]
    pub install_bin: String,
    /// Directory whose presence marks a unit's dependencies as installed.
    #[ortho_config(default = "node_modules".to_owned())]
    pub dependency_marker: String,
    /// Path to the `ssh` executable used for the tunnel.
    #[ortho_config(default = "/usr/bin/ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user on the bastion host.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub ssh_user: String,
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

impl StackhopConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("stackhop")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                &self.network_dir,
                FieldMetadata::new(
                    "network unit directory",
                    "STACKHOP_NETWORK_DIR",
                    "network_dir",
                ),
            ),
            (
                &self.database_dir,
                FieldMetadata::new(
                    "database unit directory",
                    "STACKHOP_DATABASE_DIR",
                    "database_dir",
                ),
            ),
            (
                &self.pulumi_bin,
                FieldMetadata::new("pulumi executable", "STACKHOP_PULUMI_BIN", "pulumi_bin"),
            ),
            (
                &self.install_bin,
                FieldMetadata::new("package manager", "STACKHOP_INSTALL_BIN", "install_bin"),
            ),
            (
                &self.dependency_marker,
                FieldMetadata::new(
                    "dependency marker directory",
                    "STACKHOP_DEPENDENCY_MARKER",
                    "dependency_marker",
                ),
            ),
            (
                &self.ssh_bin,
                FieldMetadata::new("ssh executable", "STACKHOP_SSH_BIN", "ssh_bin"),
            ),
            (
                &self.ssh_user,
                FieldMetadata::new("bastion SSH user", "STACKHOP_SSH_USER", "ssh_user"),
            ),
        ];

        for (value, metadata) in &fields {
            Self::require_field(value, metadata)?;
        }
        Ok(())
    }

    /// Returns the network unit described by this configuration.
    #[must_use]
    pub fn network_unit(&self) -> ProvisioningUnit {
        ProvisioningUnit::new("network", Utf8PathBuf::from(&self.network_dir))
    }

    /// Returns the database unit described by this configuration.
    #[must_use]
    pub fn database_unit(&self) -> ProvisioningUnit {
        ProvisioningUnit::new("database", Utf8PathBuf::from(&self.database_dir))
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to stackhop.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
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
