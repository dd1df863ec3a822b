// File: ./src/config.rs
// Handles configuration loading, saving, and defaults.
use crate::context::AppContext;
use crate::import::CommitPolicy;
use crate::import::mapping::DEFAULT_TAGS_DELIMITER;
use crate::storage::{DEFAULT_BRANCH, LocalStorage, validate_branch_name};
use anyhow::{Error, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_tags_delimiter() -> char {
    DEFAULT_TAGS_DELIMITER
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Branch used when a command does not name one.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_tags_delimiter")]
    pub tags_delimiter: char,
    #[serde(default)]
    pub commit_policy: CommitPolicy,
    /// One of off, error, warn, info, debug, trace.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            tags_delimiter: default_tags_delimiter(),
            commit_policy: CommitPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load the configuration from disk using an explicit context.
    pub fn load(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_config_file_path()?;

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found"));
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(ctx: &dyn AppContext) -> Result<Self> {
        match Self::load(ctx) {
            Ok(cfg) => Ok(cfg),
            Err(e) if Self::is_missing_config_error(&e) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_branch_name(&self.default_branch)?;
        if self.tags_delimiter.is_whitespace() {
            bail!("tags_delimiter cannot be whitespace");
        }
        if self.log_level_filter().is_none() {
            bail!("Unknown log_level '{}'", self.log_level);
        }
        Ok(())
    }

    pub fn log_level_filter(&self) -> Option<log::LevelFilter> {
        self.log_level.trim().parse().ok()
    }

    /// Detects whether an error returned by `load` means the file was missing,
    /// either by our own message or an underlying IO NotFound in the chain.
    pub fn is_missing_config_error(err: &Error) -> bool {
        if err.to_string().contains("Config file not found") {
            return true;
        }
        err.chain().any(|cause| {
            cause
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
        })
    }

    /// Save configuration using an explicit context.
    pub fn save(&self, ctx: &dyn AppContext) -> Result<()> {
        let path = ctx.get_config_file_path()?;
        LocalStorage::with_lock(&path, || {
            let toml_str = toml::to_string_pretty(self)?;
            LocalStorage::atomic_write(&path, toml_str)?;
            Ok(())
        })?;
        Ok(())
    }
}
