//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Management API settings derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "FLUENTCLOUD")]
pub struct CloudConfig {
    /// Subscription every identity is scoped to. This value is required.
    pub subscription_id: String,
    /// Bearer token sent with each request. This value is required.
    pub access_token: String,
    /// Base URL of the management API.
    #[ortho_config(default = "https://management.azure.com".to_owned())]
    pub endpoint: String,
    /// Value of the `api-version` query parameter.
    #[ortho_config(default = "2015-06-15".to_owned())]
    pub api_version: String,
    /// Group that bare resource names resolve against.
    pub default_group: Option<String>,
    /// Per-request timeout in seconds. Defaults to 30.
    pub request_timeout_secs: Option<u64>,
}

/// Timeout applied when `request_timeout_secs` is unset.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("subscription_id", &self.subscription_id)
            .field("access_token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("default_group", &self.default_group)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
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

impl CloudConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to fluentcloud.toml",
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

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("fluentcloud")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Request timeout, falling back to [`DEFAULT_TIMEOUT_SECS`].
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::InvalidField`] when the endpoint is not an HTTP(S)
    /// URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.subscription_id,
            &FieldMetadata::new(
                "subscription ID",
                "FLUENTCLOUD_SUBSCRIPTION_ID",
                "subscription_id",
            ),
        )?;
        Self::require_field(
            &self.access_token,
            &FieldMetadata::new(
                "management API access token",
                "FLUENTCLOUD_ACCESS_TOKEN",
                "access_token",
            ),
        )?;
        Self::require_field(
            &self.endpoint,
            &FieldMetadata::new("management endpoint", "FLUENTCLOUD_ENDPOINT", "endpoint"),
        )?;
        Self::require_field(
            &self.api_version,
            &FieldMetadata::new("API version", "FLUENTCLOUD_API_VERSION", "api_version"),
        )?;
        let endpoint = self.endpoint.trim();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ConfigError::InvalidField(format!(
                "endpoint must be an http(s) URL, got {endpoint}"
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
    /// Indicates a configured value has the wrong shape.
    #[error("invalid configuration field: {0}")]
    InvalidField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
