//! Harness configuration.
//!
//! Loaded from environment variables once per run and handed to every
//! component at construction. Credentials are not part of this struct; they are
//! resolved separately by `common::credentials`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default engine executable.
pub const DEFAULT_TERRAFORM_BINARY: &str = "terraform";

/// Default Terraform tree root, relative to the working directory.
pub const DEFAULT_TERRAFORM_ROOT: &str = "terraform";

/// Default module directory under test, relative to the Terraform root.
pub const DEFAULT_TERRAFORM_DIR: &str = "environments/dev";

/// Default retry budget for transient engine errors.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between engine retries in seconds.
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 5;

/// Default verification deadline in seconds (5 minutes).
pub const DEFAULT_VERIFY_TIMEOUT_SECONDS: u64 = 300;

/// Default Azure Resource Manager endpoint.
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// Default token authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Engine executable (default: "terraform").
    pub terraform_binary: String,

    /// Root of the Terraform tree (modules plus environments).
    pub terraform_root: PathBuf,

    /// Module directory under test, relative to `terraform_root`.
    pub terraform_dir: PathBuf,

    /// Copy the Terraform tree into a fresh temporary directory per scenario.
    pub copy_to_temp: bool,

    /// Maximum retries for transient engine errors.
    pub max_retries: u32,

    /// Delay between engine retries.
    pub time_between_retries: Duration,

    /// Deadline for a single verification read.
    pub verify_timeout: Duration,

    /// Azure Resource Manager endpoint.
    pub arm_endpoint: String,

    /// Token authority host.
    pub authority_host: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            terraform_binary: DEFAULT_TERRAFORM_BINARY.to_string(),
            terraform_root: PathBuf::from(DEFAULT_TERRAFORM_ROOT),
            terraform_dir: PathBuf::from(DEFAULT_TERRAFORM_DIR),
            copy_to_temp: true,
            max_retries: DEFAULT_MAX_RETRIES,
            time_between_retries: Duration::from_secs(DEFAULT_RETRY_DELAY_SECONDS),
            verify_timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECONDS),
            arm_endpoint: DEFAULT_ARM_ENDPOINT.to_string(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let terraform_binary = vars
            .get("TERRAFORM_BINARY")
            .cloned()
            .unwrap_or(defaults.terraform_binary);

        let terraform_root = vars
            .get("TERRAFORM_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.terraform_root);

        let terraform_dir = vars
            .get("TERRAFORM_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.terraform_dir);

        let copy_to_temp = match vars.get("TERRAFORM_COPY_TO_TEMP") {
            Some(value) => parse_bool("TERRAFORM_COPY_TO_TEMP", value)?,
            None => defaults.copy_to_temp,
        };

        let max_retries = match vars.get("APPLY_MAX_RETRIES") {
            Some(value) => value.parse::<u32>().map_err(|e| ConfigError::InvalidValue {
                name: "APPLY_MAX_RETRIES",
                reason: format!("must be a non-negative integer, got '{}': {}", value, e),
            })?,
            None => defaults.max_retries,
        };

        let time_between_retries = match vars.get("APPLY_RETRY_DELAY_SECONDS") {
            Some(value) => Duration::from_secs(value.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue {
                    name: "APPLY_RETRY_DELAY_SECONDS",
                    reason: format!("must be a non-negative integer, got '{}': {}", value, e),
                }
            })?),
            None => defaults.time_between_retries,
        };

        let verify_timeout = if let Some(value) = vars.get("VERIFY_TIMEOUT_SECONDS") {
            let secs: u64 = value.parse().map_err(|e| ConfigError::InvalidValue {
                name: "VERIFY_TIMEOUT_SECONDS",
                reason: format!("must be a valid positive integer, got '{}': {}", value, e),
            })?;

            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "VERIFY_TIMEOUT_SECONDS",
                    reason: "must be greater than 0".to_string(),
                });
            }

            Duration::from_secs(secs)
        } else {
            defaults.verify_timeout
        };

        let arm_endpoint = vars
            .get("ARM_ENDPOINT")
            .cloned()
            .unwrap_or(defaults.arm_endpoint);

        let authority_host = vars
            .get("AZURE_AUTHORITY_HOST")
            .cloned()
            .unwrap_or(defaults.authority_host);

        Ok(HarnessConfig {
            terraform_binary,
            terraform_root,
            terraform_dir,
            copy_to_temp,
            max_retries,
            time_between_retries,
            verify_timeout,
            arm_endpoint,
            authority_host,
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            reason: format!("must be true or false, got '{}'", value),
        }),
    }
}
