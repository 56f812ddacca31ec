//! Persists the default resource group into `fluentcloud.toml`.
//!
//! `use-group` accepts either a bare group name or a resource group path.
//! Names are checked against the provider's naming rules before anything is
//! written, and a path is refused when its subscription differs from the
//! `subscription_id` already configured in the same file.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::ConfigDiscovery;
use ortho_config::toml;
use thiserror::Error;

use crate::identity::{ResourceId, ResourceType, check_group_name};

const APP_NAME: &str = "fluentcloud";
const CONFIG_ENV_VAR: &str = "FLUENTCLOUD_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = "fluentcloud.toml";
const DOTFILE_NAME: &str = ".fluentcloud.toml";
const GROUP_KEY: &str = "default_group";
const SUBSCRIPTION_KEY: &str = "subscription_id";

/// Errors raised while updating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Raised when no configuration candidates are available.
    #[error("no configuration file candidates were discovered")]
    NoCandidates,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when existing TOML cannot be parsed or rendered.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when existing TOML has an unexpected structure.
    #[error("invalid configuration in {path}: {message}")]
    InvalidStructure {
        /// Path that had invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a different default group is configured and overwrite is
    /// disabled.
    #[error("default group already configured as {group}; rerun with --force to replace it")]
    GroupAlreadyConfigured {
        /// Group name already present in configuration.
        group: String,
    },
    /// Raised when the requested group is not a usable group reference.
    #[error("cannot use '{group}' as the default group: {reason}")]
    InvalidGroup {
        /// Text the caller supplied.
        group: String,
        /// Why it was refused.
        reason: String,
    },
    /// Raised when a group path belongs to another subscription.
    #[error(
        "group {group} belongs to subscription {given}, but {path} is configured for {configured}"
    )]
    SubscriptionMismatch {
        /// Group name taken from the path.
        group: String,
        /// Subscription named by the path.
        given: String,
        /// Subscription already in the configuration file.
        configured: String,
        /// File holding the configured subscription.
        path: Utf8PathBuf,
    },
}

/// A group chosen as the default, parsed from a bare name or a group path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DefaultGroup {
    name: String,
    subscription: Option<String>,
}

impl DefaultGroup {
    /// Parses `raw` as a bare group name or a resource group path.
    ///
    /// A path to a resource inside a group is refused instead of silently
    /// reduced to its group.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::InvalidGroup`] when the text is blank,
    /// malformed, names something other than a group, or breaks the group
    /// naming rules.
    pub fn parse(raw: &str) -> Result<Self, ConfigStoreError> {
        let trimmed = raw.trim();
        let invalid = |reason: String| ConfigStoreError::InvalidGroup {
            group: trimmed.to_owned(),
            reason,
        };
        if !trimmed.contains('/') {
            check_group_name(trimmed).map_err(invalid)?;
            return Ok(Self {
                name: trimmed.to_owned(),
                subscription: None,
            });
        }
        let id = ResourceId::parse(trimmed).map_err(|err| invalid(err.to_string()))?;
        if id.resource_type() != Some(ResourceType::ResourceGroup) {
            return Err(invalid(String::from(
                "path names a resource inside a group, not the group itself",
            )));
        }
        check_group_name(id.group()).map_err(invalid)?;
        Ok(Self {
            name: id.group().to_owned(),
            subscription: Some(id.subscription().to_owned()),
        })
    }

    /// Group name written to configuration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscription named by a group path, if one was given.
    #[must_use]
    pub fn subscription(&self) -> Option<&str> {
        self.subscription.as_deref()
    }
}

/// Abstraction over configuration writers for dependency injection.
pub trait ConfigWriter {
    /// Returns the currently configured default group, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when the configuration file cannot be
    /// accessed or parsed.
    fn current_default_group(&self) -> Result<Option<String>, ConfigStoreError>;

    /// Writes the default group to the configuration file and returns the
    /// file's path.
    ///
    /// Writing the group that is already configured needs no `force`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when a group path names another
    /// subscription, when reading or updating configuration content fails,
    /// or when a different group is set and `force` is false.
    fn write_default_group(
        &self,
        group: &DefaultGroup,
        force: bool,
    ) -> Result<Utf8PathBuf, ConfigStoreError>;
}

/// Updates `fluentcloud.toml` using `OrthoConfig`'s discovery search order.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    discovery: ConfigDiscovery,
}

impl ConfigStore {
    /// Builds a config store using the standard discovery settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: ConfigDiscovery::builder(APP_NAME)
                .env_var(CONFIG_ENV_VAR)
                .config_file_name(CONFIG_FILE_NAME)
                .dotfile_name(DOTFILE_NAME)
                .project_file_name(CONFIG_FILE_NAME)
                .build(),
        }
    }

    /// Builds a config store using an explicit discovery configuration.
    #[must_use]
    pub const fn with_discovery(discovery: ConfigDiscovery) -> Self {
        Self { discovery }
    }

    /// First existing candidate, or the last candidate when none exists yet.
    fn open_document(&self) -> Result<ConfigDocument, ConfigStoreError> {
        let candidates = self.discovery.utf8_candidates();
        for candidate in &candidates {
            if let Some(contents) = try_read(candidate)? {
                return ConfigDocument::parse(candidate.clone(), &contents);
            }
        }
        let fallback = candidates.last().ok_or(ConfigStoreError::NoCandidates)?;
        Ok(ConfigDocument::empty(fallback.clone()))
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigWriter for ConfigStore {
    fn current_default_group(&self) -> Result<Option<String>, ConfigStoreError> {
        self.open_document()?.string(GROUP_KEY)
    }

    fn write_default_group(
        &self,
        chosen: &DefaultGroup,
        force: bool,
    ) -> Result<Utf8PathBuf, ConfigStoreError> {
        let mut document = self.open_document()?;

        if let (Some(given), Some(configured)) =
            (chosen.subscription(), document.string(SUBSCRIPTION_KEY)?)
            && !given.eq_ignore_ascii_case(&configured)
        {
            return Err(ConfigStoreError::SubscriptionMismatch {
                group: chosen.name().to_owned(),
                given: given.to_owned(),
                configured,
                path: document.path,
            });
        }

        if let Some(existing) = document.string(GROUP_KEY)?
            && !force
            && existing != chosen.name()
        {
            return Err(ConfigStoreError::GroupAlreadyConfigured { group: existing });
        }

        document
            .table
            .insert(String::from(GROUP_KEY), toml::Value::String(chosen.name.clone()));
        document.save()?;
        Ok(document.path)
    }
}

/// Parsed contents of one configuration file.
#[derive(Debug)]
struct ConfigDocument {
    path: Utf8PathBuf,
    table: toml::value::Table,
}

impl ConfigDocument {
    fn empty(path: Utf8PathBuf) -> Self {
        Self {
            path,
            table: toml::value::Table::new(),
        }
    }

    fn parse(path: Utf8PathBuf, contents: &str) -> Result<Self, ConfigStoreError> {
        if contents.trim().is_empty() {
            return Ok(Self::empty(path));
        }
        match toml::from_str::<toml::Value>(contents) {
            Ok(toml::Value::Table(table)) => Ok(Self { path, table }),
            Ok(_) => Err(ConfigStoreError::InvalidStructure {
                path,
                message: String::from("configuration root is not a table"),
            }),
            Err(err) => Err(ConfigStoreError::Parse {
                path,
                message: err.to_string(),
            }),
        }
    }

    /// Trimmed string stored under a root-level `key`.
    fn string(&self, key: &str) -> Result<Option<String>, ConfigStoreError> {
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::String(text)) => Ok(Some(text.trim().to_owned())),
            Some(_) => Err(ConfigStoreError::InvalidStructure {
                path: self.path.clone(),
                message: format!("{key} must be a string"),
            }),
        }
    }

    fn save(&self) -> Result<(), ConfigStoreError> {
        let rendered =
            toml::to_string_pretty(&self.table).map_err(|err| ConfigStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        let (parent, file_name) = split_path(&self.path)?;
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        Dir::open_ambient_dir(parent, ambient_authority())
            .and_then(|dir| dir.write(file_name, rendered))
            .map_err(|err| io_error(&self.path, &err))
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), ConfigStoreError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("configuration file path is missing a filename"),
        })?;
    Ok((parent, file_name))
}

/// Reads `path`, treating a missing file or directory as absent.
fn try_read(path: &Utf8Path) -> Result<Option<String>, ConfigStoreError> {
    let (parent, file_name) = split_path(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(parent, &err)),
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, &err)),
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> ConfigStoreError {
    ConfigStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
