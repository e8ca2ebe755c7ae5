// src/policy/options.rs

//! Transfer options
//!
//! Options are small trait objects applied to an option set. An option
//! tagged with a [`Capability`] only makes sense for handler families
//! offering that capability and takes part in handler selection; untagged
//! options (printer, worker width) configure the operation itself.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::policy::plugin::PluginTransport;
use crate::policy::scripted::TransferScript;
use crate::printer::SharedPrinter;
use crate::repository::{ComponentVersionResolver, Repository, RepositoryFactory};

/// Feature a transfer option requires from the handler family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Standard,
    Scripted,
    Plugin,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::Standard => "standard",
            Capability::Scripted => "scripted",
            Capability::Plugin => "plugin",
        };
        f.write_str(name)
    }
}

/// A single transfer option
pub trait TransferOption: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capability required from the handler family, `None` for operation options
    fn capability(&self) -> Option<Capability> {
        None
    }

    /// Apply to an option set; `Ok(false)` when the set has no place for it
    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool>;
}

/// An option set options can be applied to
///
/// Each accessor exposes one group of settings when the set carries it.
pub trait TransferOptions {
    fn standard(&mut self) -> Option<&mut StandardOptions> {
        None
    }

    fn script(&mut self) -> Option<&mut ScriptOptions> {
        None
    }

    fn plugin(&mut self) -> Option<&mut PluginOptions> {
        None
    }

    fn operation(&mut self) -> Option<&mut OperationOptions> {
        None
    }
}

/// Settings of the standard policy, shared by all handler families
#[derive(Clone, Default)]
pub struct StandardOptions {
    pub recursive: bool,
    pub resources_by_value: bool,
    pub local_resources_by_value: bool,
    pub sources_by_value: bool,
    pub keep_global_access: bool,
    pub stop_on_existing_version: bool,
    pub enforce_transport: bool,
    pub overwrite: bool,
    pub skip_update: bool,
    pub retries: u32,
    pub omit_access_types: Vec<String>,
    pub omit_artifact_types: Vec<String>,
    pub resolver: Option<Arc<dyn ComponentVersionResolver>>,
}

impl std::fmt::Debug for StandardOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardOptions")
            .field("recursive", &self.recursive)
            .field("resources_by_value", &self.resources_by_value)
            .field("local_resources_by_value", &self.local_resources_by_value)
            .field("sources_by_value", &self.sources_by_value)
            .field("keep_global_access", &self.keep_global_access)
            .field("stop_on_existing_version", &self.stop_on_existing_version)
            .field("enforce_transport", &self.enforce_transport)
            .field("overwrite", &self.overwrite)
            .field("skip_update", &self.skip_update)
            .field("retries", &self.retries)
            .field("omit_access_types", &self.omit_access_types)
            .field("omit_artifact_types", &self.omit_artifact_types)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl TransferOptions for StandardOptions {
    fn standard(&mut self) -> Option<&mut StandardOptions> {
        Some(self)
    }
}

/// Settings of the scripted policy
#[derive(Clone, Default)]
pub struct ScriptOptions {
    pub standard: StandardOptions,
    pub script: Option<TransferScript>,
    /// Opens the alternate repositories named by script rules
    pub repositories: RepositoryFactory,
}

impl TransferOptions for ScriptOptions {
    fn standard(&mut self) -> Option<&mut StandardOptions> {
        Some(&mut self.standard)
    }

    fn script(&mut self) -> Option<&mut ScriptOptions> {
        Some(self)
    }
}

/// Settings of the plugin-delegated policy
#[derive(Clone, Default)]
pub struct PluginOptions {
    pub standard: StandardOptions,
    /// Plugin name, resolved to an executable in `plugin_dir`
    pub plugin: Option<String>,
    /// Transfer handler offered by the plugin
    pub handler: Option<String>,
    /// Free-form configuration passed with every question
    pub config: Option<Value>,
    /// Pre-built transport, taking precedence over `plugin_dir` lookup
    pub transport: Option<Arc<dyn PluginTransport>>,
    pub plugin_dir: Option<PathBuf>,
}

impl TransferOptions for PluginOptions {
    fn standard(&mut self) -> Option<&mut StandardOptions> {
        Some(&mut self.standard)
    }

    fn plugin(&mut self) -> Option<&mut PluginOptions> {
        Some(self)
    }
}

/// Settings of the transfer operation itself
#[derive(Clone, Default)]
pub struct OperationOptions {
    pub printer: Option<SharedPrinter>,
    pub workers: Option<usize>,
}

impl OperationOptions {
    /// Collect the operation settings from a list of options
    ///
    /// Options without a place in the operation settings are ignored.
    pub fn from_options(options: &[Box<dyn TransferOption>]) -> Result<Self> {
        let mut ops = OperationOptions::default();
        for option in options {
            option.apply(&mut ops)?;
        }
        Ok(ops)
    }
}

impl TransferOptions for OperationOptions {
    fn operation(&mut self) -> Option<&mut OperationOptions> {
        Some(self)
    }
}

macro_rules! standard_flag {
    ($(#[$doc:meta])* $option:ident, $field:ident, $name:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $option(pub bool);

        impl TransferOption for $option {
            fn name(&self) -> &'static str {
                $name
            }

            fn capability(&self) -> Option<Capability> {
                Some(Capability::Standard)
            }

            fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
                match options.standard() {
                    Some(standard) => {
                        standard.$field = self.0;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    };
}

standard_flag!(
    /// Follow component references
    Recursive, recursive, "recursive"
);
standard_flag!(
    /// Copy the content of all resources into the target
    ResourcesByValue, resources_by_value, "resources-by-value"
);
standard_flag!(
    /// Copy the content of resources with local relation
    LocalByValue, local_resources_by_value, "local-by-value"
);
standard_flag!(
    /// Copy the content of all sources into the target
    SourcesByValue, sources_by_value, "sources-by-value"
);
standard_flag!(
    /// Keep the original access as global access of copied blobs
    KeepGlobalAccess, keep_global_access, "keep-global-access"
);
standard_flag!(
    /// Do not descend into references already present in the target
    StopOnExistingVersion, stop_on_existing_version, "stop-on-existing-version"
);
standard_flag!(
    /// Transfer existing target versions as if they were absent
    EnforceTransport, enforce_transport, "enforce-transport"
);
standard_flag!(
    /// Overwrite target versions with diverging signature-relevant content
    Overwrite, overwrite, "overwrite"
);
standard_flag!(
    /// Leave existing target versions with volatile differences alone
    SkipUpdate, skip_update, "skip-update"
);

/// Retry blob reads up to this many times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retries(pub u32);

impl TransferOption for Retries {
    fn name(&self) -> &'static str {
        "retries"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Standard)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(standard) = options.standard() else {
            return Ok(false);
        };
        standard.retries = self.0;
        Ok(true)
    }
}

/// Never copy the content behind these access types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmitAccessTypes(pub Vec<String>);

impl TransferOption for OmitAccessTypes {
    fn name(&self) -> &'static str {
        "omit-access-types"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Standard)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(standard) = options.standard() else {
            return Ok(false);
        };
        for kind in &self.0 {
            if !standard.omit_access_types.contains(kind) {
                standard.omit_access_types.push(kind.clone());
            }
        }
        Ok(true)
    }
}

/// Never copy the content of artifacts of these types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmitArtifactTypes(pub Vec<String>);

impl TransferOption for OmitArtifactTypes {
    fn name(&self) -> &'static str {
        "omit-artifact-types"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Standard)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(standard) = options.standard() else {
            return Ok(false);
        };
        for kind in &self.0 {
            if !standard.omit_artifact_types.contains(kind) {
                standard.omit_artifact_types.push(kind.clone());
            }
        }
        Ok(true)
    }
}

/// Extra resolver for references missing in the source repository
#[derive(Clone)]
pub struct Resolver(pub Arc<dyn ComponentVersionResolver>);

impl TransferOption for Resolver {
    fn name(&self) -> &'static str {
        "resolver"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Standard)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(standard) = options.standard() else {
            return Ok(false);
        };
        standard.resolver = Some(Arc::clone(&self.0));
        Ok(true)
    }
}

/// Transfer script deciding per component version and artifact
#[derive(Debug, Clone)]
pub struct Script(pub TransferScript);

impl TransferOption for Script {
    fn name(&self) -> &'static str {
        "script"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Scripted)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(script) = options.script() else {
            return Ok(false);
        };
        script.script = Some(self.0.clone());
        Ok(true)
    }
}

/// Transfer script read from a TOML or JSON file
#[derive(Debug, Clone)]
pub struct ScriptFile(pub PathBuf);

impl TransferOption for ScriptFile {
    fn name(&self) -> &'static str {
        "script-file"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Scripted)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(script) = options.script() else {
            return Ok(false);
        };
        script.script = Some(TransferScript::from_file(&self.0)?);
        Ok(true)
    }
}

/// Repositories scripts may switch to, matched by specification
#[derive(Clone)]
pub struct Repositories(pub Vec<Arc<dyn Repository>>);

impl TransferOption for Repositories {
    fn name(&self) -> &'static str {
        "repositories"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Scripted)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(script) = options.script() else {
            return Ok(false);
        };
        for repo in &self.0 {
            script.repositories.register(Arc::clone(repo));
        }
        Ok(true)
    }
}

/// Delegate decisions to a transfer handler of a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub name: String,
    pub handler: String,
}

impl Plugin {
    pub fn new(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
        }
    }
}

impl TransferOption for Plugin {
    fn name(&self) -> &'static str {
        "plugin"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Plugin)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(plugin) = options.plugin() else {
            return Ok(false);
        };
        if self.name.is_empty() || self.handler.is_empty() {
            return Err(Error::OptionError(
                "plugin option requires plugin and handler name".to_string(),
            ));
        }
        plugin.plugin = Some(self.name.clone());
        plugin.handler = Some(self.handler.clone());
        Ok(true)
    }
}

/// Configuration handed to the plugin with every question
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig(pub Value);

impl TransferOption for PluginConfig {
    fn name(&self) -> &'static str {
        "plugin-config"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Plugin)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(plugin) = options.plugin() else {
            return Ok(false);
        };
        plugin.config = Some(self.0.clone());
        Ok(true)
    }
}

/// Talk to the plugin through this transport instead of a process
#[derive(Clone)]
pub struct WithPluginTransport(pub Arc<dyn PluginTransport>);

impl TransferOption for WithPluginTransport {
    fn name(&self) -> &'static str {
        "plugin-transport"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Plugin)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(plugin) = options.plugin() else {
            return Ok(false);
        };
        plugin.transport = Some(Arc::clone(&self.0));
        Ok(true)
    }
}

/// Directory holding plugin executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDir(pub PathBuf);

impl TransferOption for PluginDir {
    fn name(&self) -> &'static str {
        "plugin-dir"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Plugin)
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(plugin) = options.plugin() else {
            return Ok(false);
        };
        plugin.plugin_dir = Some(self.0.clone());
        Ok(true)
    }
}

/// Progress output of the operation
#[derive(Clone)]
pub struct Printer(pub SharedPrinter);

impl TransferOption for Printer {
    fn name(&self) -> &'static str {
        "printer"
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(ops) = options.operation() else {
            return Ok(false);
        };
        ops.printer = Some(Arc::clone(&self.0));
        Ok(true)
    }
}

/// Width of the per-version copy pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workers(pub usize);

impl TransferOption for Workers {
    fn name(&self) -> &'static str {
        "workers"
    }

    fn apply(&self, options: &mut dyn TransferOptions) -> Result<bool> {
        let Some(ops) = options.operation() else {
            return Ok(false);
        };
        if self.0 == 0 {
            return Err(Error::OptionError("worker count must be positive".to_string()));
        }
        ops.workers = Some(self.0);
        Ok(true)
    }
}
