// src/config.rs
//! Transfer configuration
//!
//! Configuration is read from TOML. Every field is optional, so an empty
//! file is a valid configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! workers = 8
//! plugin_dir = "/usr/lib/cvtransfer/plugins"
//! script = "/etc/cvtransfer/transfer.toml"
//!
//! [policy]
//! recursive = true
//! local_resources_by_value = true
//! retries = 2
//! omit_access_types = ["helm"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::policy::TransferOption;
use crate::policy::options::{
    EnforceTransport, KeepGlobalAccess, LocalByValue, OmitAccessTypes, OmitArtifactTypes,
    Overwrite, Recursive, ResourcesByValue, Retries, ScriptFile, SkipUpdate, SourcesByValue,
    StopOnExistingVersion,
};
use crate::transfer::{DEFAULT_WORKERS, WORKERS_ENV, parse_workers};

/// Application directory below the platform config directory
const APP_DIR: &str = "cvtransfer";

/// Default policy flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub recursive: bool,
    pub resources_by_value: bool,
    pub local_resources_by_value: bool,
    pub sources_by_value: bool,
    pub keep_global_access: bool,
    pub stop_on_existing: bool,
    pub enforce_transport: bool,
    pub overwrite: bool,
    pub skip_update: bool,
    pub retries: u32,
    pub omit_access_types: Vec<String>,
    pub omit_artifact_types: Vec<String>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Copy pool width per component version
    pub workers: Option<usize>,
    pub policy: PolicyConfig,
    /// Directory searched for plugin executables
    pub plugin_dir: Option<PathBuf>,
    /// Transfer script applied to every transfer
    pub script: Option<PathBuf>,
}

impl TransferConfig {
    /// Parse configuration text
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::ConfigError(format!("invalid configuration: {}", e)))
    }

    /// Load configuration from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read configuration {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&text)?;
        if config.workers == Some(0) {
            return Err(Error::ConfigError(format!(
                "{}: workers must be positive",
                path.display()
            )));
        }
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the user configuration if present, defaults otherwise
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Effective copy pool width
    ///
    /// The environment overrides the file; invalid environment values are
    /// ignored.
    pub fn workers(&self) -> usize {
        self.workers_with_env(std::env::var(WORKERS_ENV).ok().as_deref())
    }

    fn workers_with_env(&self, env: Option<&str>) -> usize {
        parse_workers(env)
            .or(self.workers.filter(|n| *n > 0))
            .unwrap_or(DEFAULT_WORKERS)
    }

    /// Plugin directory from the file or the platform default
    pub fn plugin_dir(&self) -> Option<PathBuf> {
        self.plugin_dir.clone().or_else(default_plugin_dir)
    }

    /// Options reproducing the configured policy defaults
    ///
    /// Only settings that differ from the built-in defaults produce an
    /// option, so the result combines with command line options.
    pub fn transfer_options(&self) -> Vec<Box<dyn TransferOption>> {
        let p = &self.policy;
        let mut options: Vec<Box<dyn TransferOption>> = Vec::new();
        let flags: [(bool, Box<dyn TransferOption>); 9] = [
            (p.recursive, Box::new(Recursive(true))),
            (p.resources_by_value, Box::new(ResourcesByValue(true))),
            (p.local_resources_by_value, Box::new(LocalByValue(true))),
            (p.sources_by_value, Box::new(SourcesByValue(true))),
            (p.keep_global_access, Box::new(KeepGlobalAccess(true))),
            (p.stop_on_existing, Box::new(StopOnExistingVersion(true))),
            (p.enforce_transport, Box::new(EnforceTransport(true))),
            (p.overwrite, Box::new(Overwrite(true))),
            (p.skip_update, Box::new(SkipUpdate(true))),
        ];
        options.extend(flags.into_iter().filter(|(set, _)| *set).map(|(_, o)| o));
        if p.retries > 0 {
            options.push(Box::new(Retries(p.retries)));
        }
        if !p.omit_access_types.is_empty() {
            options.push(Box::new(OmitAccessTypes(p.omit_access_types.clone())));
        }
        if !p.omit_artifact_types.is_empty() {
            options.push(Box::new(OmitArtifactTypes(p.omit_artifact_types.clone())));
        }
        if let Some(script) = &self.script {
            options.push(Box::new(ScriptFile(script.clone())));
        }
        options
    }
}

/// Default location of the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Default directory holding plugin executables
pub fn default_plugin_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("plugins"))
}
