// src/policy/scripted.rs

//! Script-driven transfer policy
//!
//! A transfer script is a list of rules. Each rule names the question it
//! answers (`mode`) and optional match conditions; the first matching rule
//! decides via its `process` flag. Questions without a matching rule get the
//! standard answer.
//!
//! ```toml
//! [[rule]]
//! mode = "resource"
//! component = "acme.org/*"
//! type = "helmChart"
//! process = false
//!
//! [[rule]]
//! mode = "componentversion"
//! element = "base-*"
//! repository = { type = "filesystem", location = "/srv/mirror" }
//!
//! [[rule.script.rule]]
//! mode = "resource"
//! process = true
//! ```
//!
//! Match conditions:
//! - `component`, `version`: globs on the component version being transferred
//!   (for `componentversion`, the version holding the reference)
//! - `element`: glob on the resource, source or reference name
//! - `type`: glob on the artifact type
//! - `access`: glob on the access type
//! - `labels`: label values that must be present, on the element when there
//!   is one, otherwise on the component
//!
//! The standard gates always apply first: skip-update refuses updates,
//! the by-value flags and omitted types refuse copies, and references are
//! only followed when recursive.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::descriptor::{AccessSpec, Labels, Reference, RepositorySpec, Resource, Source};
use crate::error::{Error, Result};
use crate::policy::options::{Capability, ScriptOptions};
use crate::policy::registry::{HandlerFamily, PolicyOptions, SCRIPTED_PRIORITY};
use crate::policy::standard::StandardPolicy;
use crate::policy::{ResolvedReference, TransferPolicy};
use crate::repository::{AccessMethod, ComponentVersionAccess, Repository, RepositoryFactory};

/// Question a script rule answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptMode {
    Update,
    Enforce,
    Overwrite,
    ComponentVersion,
    Resource,
    Source,
}

fn default_process() -> bool {
    true
}

/// One rule of a transfer script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRule {
    pub mode: ScriptMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, Value>,
    #[serde(default = "default_process")]
    pub process: bool,
    /// Repository to resolve the referenced version in (`componentversion` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositorySpec>,
    /// Script governing the referenced sub-tree (`componentversion` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<TransferScript>,
}

/// A parsed transfer script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferScript {
    #[serde(default, rename = "rule")]
    pub rules: Vec<ScriptRule>,
}

impl TransferScript {
    /// Parse a script from JSON (text starting with `{`) or TOML
    pub fn parse(text: &str) -> Result<Self> {
        let script: TransferScript = if text.trim_start().starts_with('{') {
            serde_json::from_str(text)
                .map_err(|e| Error::ScriptError(format!("invalid JSON script: {}", e)))?
        } else {
            toml::from_str(text).map_err(|e| Error::ScriptError(format!("invalid TOML script: {}", e)))?
        };
        script.validate()?;
        Ok(script)
    }

    /// Read and parse a script file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::ScriptError(format!("cannot read script {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Check all globs and the placement of recursion settings
    pub fn validate(&self) -> Result<()> {
        for (index, rule) in self.rules.iter().enumerate() {
            for pattern in [&rule.component, &rule.version, &rule.element, &rule.kind, &rule.access]
                .into_iter()
                .flatten()
            {
                Pattern::new(pattern).map_err(|e| {
                    Error::ScriptError(format!("rule {}: invalid pattern {:?}: {}", index, pattern, e))
                })?;
            }
            if rule.mode != ScriptMode::ComponentVersion
                && (rule.repository.is_some() || rule.script.is_some())
            {
                return Err(Error::ScriptError(format!(
                    "rule {}: repository and script are only allowed for componentversion rules",
                    index
                )));
            }
            if let Some(nested) = &rule.script {
                nested.validate()?;
            }
        }
        Ok(())
    }

    /// First rule of `mode` matching the subject
    fn find(&self, mode: ScriptMode, subject: &Subject<'_>) -> Option<&ScriptRule> {
        self.rules
            .iter()
            .filter(|r| r.mode == mode)
            .find(|r| r.matches(subject))
    }
}

/// What a rule is matched against
struct Subject<'a> {
    component: &'a str,
    version: &'a str,
    element: Option<&'a str>,
    kind: Option<&'a str>,
    access: Option<&'a str>,
    labels: &'a Labels,
}

fn glob_matches(pattern: &Option<String>, value: Option<&str>) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    let Some(value) = value else {
        return false;
    };
    // patterns are checked on parse
    Pattern::new(pattern).is_ok_and(|p| p.matches(value))
}

impl ScriptRule {
    fn matches(&self, subject: &Subject<'_>) -> bool {
        glob_matches(&self.component, Some(subject.component))
            && glob_matches(&self.version, Some(subject.version))
            && glob_matches(&self.element, subject.element)
            && glob_matches(&self.kind, subject.kind)
            && glob_matches(&self.access, subject.access)
            && self
                .labels
                .iter()
                .all(|(name, value)| subject.labels.get(name).is_some_and(|l| &l.value == value))
    }
}

/// Policy evaluating a [`TransferScript`] on top of the standard flags
#[derive(Clone)]
pub struct ScriptedPolicy {
    standard: StandardPolicy,
    script: Option<TransferScript>,
    repositories: RepositoryFactory,
}

impl ScriptedPolicy {
    pub fn new(options: ScriptOptions) -> Self {
        Self {
            standard: StandardPolicy::new(options.standard),
            script: options.script,
            repositories: options.repositories,
        }
    }

    fn rule(&self, mode: ScriptMode, subject: &Subject<'_>) -> Option<&ScriptRule> {
        let rule = self.script.as_ref()?.find(mode, subject);
        if let Some(rule) = rule {
            debug!(
                "transfer script rule for {:?} on {}:{} decides process={}",
                mode, subject.component, subject.version, rule.process
            );
        }
        rule
    }

    fn version_rule(&self, mode: ScriptMode, src: &dyn ComponentVersionAccess) -> Option<bool> {
        let cd = src.descriptor();
        let subject = Subject {
            component: &cd.name,
            version: &cd.version,
            element: None,
            kind: None,
            access: None,
            labels: &cd.labels,
        };
        self.rule(mode, &subject).map(|r| r.process)
    }

    fn artifact_rule(
        &self,
        mode: ScriptMode,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        name: &str,
        kind: &str,
        labels: &Labels,
    ) -> Option<bool> {
        let id = src.id();
        let subject = Subject {
            component: &id.name,
            version: &id.version,
            element: Some(name),
            kind: Some(kind),
            access: Some(access.kind()),
            labels,
        };
        self.rule(mode, &subject).map(|r| r.process)
    }
}

impl TransferPolicy for ScriptedPolicy {
    fn update_version(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        if !self.standard.update_version(src, tgt)? {
            return Ok(false);
        }
        Ok(self.version_rule(ScriptMode::Update, src).unwrap_or(true))
    }

    fn enforce_transport(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        if self.standard.enforce_transport(src, tgt)? {
            return Ok(true);
        }
        Ok(self.version_rule(ScriptMode::Enforce, src).unwrap_or(false))
    }

    fn overwrite_version(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        if self.standard.overwrite_version(src, tgt)? {
            return Ok(true);
        }
        Ok(self.version_rule(ScriptMode::Overwrite, src).unwrap_or(false))
    }

    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        src: &dyn ComponentVersionAccess,
        reference: &Reference,
        target: &Arc<dyn Repository>,
    ) -> Result<Option<ResolvedReference>> {
        if !self.standard.options().recursive {
            return Ok(None);
        }
        let cd = src.descriptor();
        let subject = Subject {
            component: &cd.name,
            version: &cd.version,
            element: Some(&reference.meta.name),
            kind: None,
            access: None,
            labels: &reference.meta.labels,
        };
        let Some(rule) = self.rule(ScriptMode::ComponentVersion, &subject) else {
            return self.standard.transfer_version(repo, src, reference, target);
        };
        if !rule.process {
            return Ok(None);
        }

        let id = reference.target_id();
        if self.standard.options().stop_on_existing_version
            && target.exists_component_version(&id.name, &id.version)?
        {
            return Ok(None);
        }
        let lookup = match &rule.repository {
            Some(spec) => {
                debug!("resolving {} in alternate repository {}", id, spec);
                self.repositories.open(spec)?
            }
            None => Arc::clone(repo),
        };
        let version = self.standard.resolve_reference(lookup.as_ref(), reference)?;
        let policy = rule.script.as_ref().map(|nested| {
            Arc::new(ScriptedPolicy {
                standard: self.standard.clone(),
                script: Some(nested.clone()),
                repositories: self.repositories.clone(),
            }) as Arc<dyn TransferPolicy>
        });
        Ok(Some(ResolvedReference { version, policy }))
    }

    fn transfer_resource(
        &self,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        resource: &Resource,
    ) -> Result<bool> {
        if !self.standard.transfer_resource(src, access, resource)? {
            return Ok(false);
        }
        Ok(self
            .artifact_rule(
                ScriptMode::Resource,
                src,
                access,
                &resource.meta.name,
                &resource.kind,
                &resource.meta.labels,
            )
            .unwrap_or(true))
    }

    fn transfer_source(
        &self,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        source: &Source,
    ) -> Result<bool> {
        if !self.standard.transfer_source(src, access, source)? {
            return Ok(false);
        }
        Ok(self
            .artifact_rule(
                ScriptMode::Source,
                src,
                access,
                &source.meta.name,
                &source.kind,
                &source.meta.labels,
            )
            .unwrap_or(true))
    }

    fn handle_transfer_resource(
        &self,
        resource: &Resource,
        method: &dyn AccessMethod,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()> {
        self.standard
            .handle_transfer_resource(resource, method, hint, target)
    }

    fn handle_transfer_source(
        &self,
        source: &Source,
        method: &dyn AccessMethod,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()> {
        self.standard.handle_transfer_source(source, method, hint, target)
    }
}

/// Handler family of the scripted policy
pub struct ScriptedFamily;

impl HandlerFamily for ScriptedFamily {
    fn name(&self) -> &str {
        "scripted"
    }

    fn priority(&self) -> i32 {
        SCRIPTED_PRIORITY
    }

    fn accepts(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Standard | Capability::Scripted)
    }

    fn new_options(&self) -> Box<dyn PolicyOptions> {
        Box::new(ScriptOptions::default())
    }
}

impl PolicyOptions for ScriptOptions {
    fn build(self: Box<Self>) -> Result<Arc<dyn TransferPolicy>> {
        Ok(Arc::new(ScriptedPolicy::new(*self)))
    }
}
