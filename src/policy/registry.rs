// src/policy/registry.rs

//! Transfer handler selection
//!
//! Handler families register with a priority and the capabilities they
//! accept. For a list of options the registry picks the highest-priority
//! family accepting every capability the options are tagged with, applies
//! the options to a fresh option set of that family and builds the policy.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::error::{Error, ErrorList, Result};
use crate::policy::TransferPolicy;
use crate::policy::options::{Capability, TransferOption, TransferOptions};
use crate::policy::plugin::PluginFamily;
use crate::policy::scripted::ScriptedFamily;
use crate::policy::standard::StandardFamily;

/// Priority of the standard family
pub const STANDARD_PRIORITY: i32 = 1000;

/// Priority of the scripted family
pub const SCRIPTED_PRIORITY: i32 = 100;

/// Priority of the plugin family
pub const PLUGIN_PRIORITY: i32 = 10;

/// An option set that can be turned into a policy
pub trait PolicyOptions: TransferOptions + Send {
    fn build(self: Box<Self>) -> Result<Arc<dyn TransferPolicy>>;
}

/// A kind of transfer handler
pub trait HandlerFamily: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn accepts(&self, capability: Capability) -> bool;

    /// Fresh option set for this family
    fn new_options(&self) -> Box<dyn PolicyOptions>;
}

/// Prioritised set of handler families
pub struct PolicyRegistry {
    families: Vec<Box<dyn HandlerFamily>>,
}

impl PolicyRegistry {
    /// Registry without any family
    pub fn empty() -> Self {
        Self {
            families: Vec::new(),
        }
    }

    /// Registry with the standard, scripted and plugin families
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(StandardFamily));
        registry.register(Box::new(ScriptedFamily));
        registry.register(Box::new(PluginFamily));
        registry
    }

    /// Add a family, keeping families ordered by descending priority
    pub fn register(&mut self, family: Box<dyn HandlerFamily>) {
        self.families.push(family);
        self.families
            .sort_by_key(|f| std::cmp::Reverse(f.priority()));
    }

    /// Names of the registered families, highest priority first
    pub fn families(&self) -> Vec<&str> {
        self.families.iter().map(|f| f.name()).collect()
    }

    /// Pick the family for a list of options
    pub fn select(&self, options: &[Box<dyn TransferOption>]) -> Result<&dyn HandlerFamily> {
        let required: BTreeSet<String> = options
            .iter()
            .filter_map(|o| o.capability())
            .map(|c| c.to_string())
            .collect();
        let capabilities: Vec<Capability> = options.iter().filter_map(|o| o.capability()).collect();

        self.families
            .iter()
            .find(|f| capabilities.iter().all(|c| f.accepts(*c)))
            .map(|f| f.as_ref())
            .ok_or_else(|| {
                Error::OptionError(format!(
                    "no transfer handler accepts options requiring {}",
                    required.into_iter().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Build a transfer policy for a list of options
    pub fn new_handler(&self, options: &[Box<dyn TransferOption>]) -> Result<Arc<dyn TransferPolicy>> {
        let family = self.select(options)?;
        debug!("using {} transfer handler", family.name());

        let mut set = family.new_options();
        let mut errors = ErrorList::new("transfer options");
        for option in options {
            let target: &mut dyn TransferOptions = set.as_mut();
            match option.apply(target) {
                Ok(true) => {}
                Ok(false) if option.capability().is_none() => {}
                Ok(false) => errors.push(Error::OptionError(format!(
                    "option {} not applicable to {} transfer handler",
                    option.name(),
                    family.name()
                ))),
                Err(e) => errors.push(e),
            }
        }
        errors.result()?;
        set.build()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Process-wide registry with the built-in families
pub fn default_registry() -> &'static PolicyRegistry {
    static REGISTRY: OnceLock<PolicyRegistry> = OnceLock::new();
    REGISTRY.get_or_init(PolicyRegistry::with_defaults)
}

/// Build a transfer policy from options using the default registry
pub fn new_transfer_handler(options: &[Box<dyn TransferOption>]) -> Result<Arc<dyn TransferPolicy>> {
    default_registry().new_handler(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::options::{Plugin, Recursive, Script, Workers};
    use crate::policy::scripted::TransferScript;

    #[test]
    fn test_default_families_ordered_by_priority() {
        let registry = PolicyRegistry::with_defaults();
        assert_eq!(registry.families(), vec!["standard", "scripted", "plugin"]);
    }

    #[test]
    fn test_select_standard_for_flags() {
        let registry = PolicyRegistry::with_defaults();
        let options: Vec<Box<dyn TransferOption>> =
            vec![Box::new(Recursive(true)), Box::new(Workers(3))];
        assert_eq!(registry.select(&options).unwrap().name(), "standard");
        assert_eq!(registry.select(&[]).unwrap().name(), "standard");
    }

    #[test]
    fn test_select_scripted_for_script() {
        let registry = PolicyRegistry::with_defaults();
        let options: Vec<Box<dyn TransferOption>> = vec![
            Box::new(Recursive(true)),
            Box::new(Script(TransferScript::default())),
        ];
        assert_eq!(registry.select(&options).unwrap().name(), "scripted");
        assert!(registry.new_handler(&options).is_ok());
    }

    #[test]
    fn test_conflicting_capabilities_rejected() {
        let registry = PolicyRegistry::with_defaults();
        let options: Vec<Box<dyn TransferOption>> = vec![
            Box::new(Script(TransferScript::default())),
            Box::new(Plugin::new("p", "h")),
        ];
        let err = match registry.new_handler(&options) {
            Ok(_) => panic!("expected option error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::OptionError(_)));
    }

    #[test]
    fn test_empty_registry_has_no_handler() {
        let registry = PolicyRegistry::empty();
        assert!(registry.select(&[]).is_err());
    }
}
