// src/policy/plugin.rs

//! Plugin-delegated transfer policy
//!
//! Decisions are forwarded to a transfer handler offered by an external
//! plugin. The plugin describes which questions its handler answers;
//! undeclared questions get the standard answer. Each declared question may
//! restrict the labels sent along with it.
//!
//! Plugins are executables speaking JSON:
//!
//! - `<plugin> info` prints the [`PluginDescriptor`]
//! - `<plugin> transferhandler <handler> <question>` reads the question
//!   payload on stdin and prints `{"decision": true|false}`

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::descriptor::{AccessSpec, ElementMeta, Labels, Reference, Resource, Source};
use crate::error::{Error, Result};
use crate::policy::options::{Capability, PluginOptions, StandardOptions};
use crate::policy::registry::{HandlerFamily, PLUGIN_PRIORITY, PolicyOptions};
use crate::policy::standard::StandardPolicy;
use crate::policy::{ResolvedReference, TransferPolicy};
use crate::repository::{AccessMethod, ComponentVersionAccess, Repository};

/// Default timeout for a single plugin invocation
pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Question a transfer handler may answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Question {
    UpdateVersion,
    EnforceTransport,
    OverwriteVersion,
    TransferVersion,
    TransferResource,
    TransferSource,
}

impl Question {
    pub fn as_str(&self) -> &'static str {
        match self {
            Question::UpdateVersion => "updateversion",
            Question::EnforceTransport => "enforcetransport",
            Question::OverwriteVersion => "overwriteversion",
            Question::TransferVersion => "transferversion",
            Question::TransferResource => "transferresource",
            Question::TransferSource => "transfersource",
        }
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A question declared by a transfer handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDescriptor {
    pub name: Question,
    /// Labels to send; `None` sends all, an empty list sends none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

/// A transfer handler offered by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHandlerDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<QuestionDescriptor>,
}

impl TransferHandlerDescriptor {
    pub fn question(&self, question: Question) -> Option<&QuestionDescriptor> {
        self.questions.iter().find(|q| q.name == question)
    }
}

/// What a plugin reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub transfer_handlers: Vec<TransferHandlerDescriptor>,
}

impl PluginDescriptor {
    pub fn transfer_handler(&self, name: &str) -> Option<&TransferHandlerDescriptor> {
        self.transfer_handlers.iter().find(|h| h.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct Decision {
    decision: bool,
}

/// Channel to a plugin
pub trait PluginTransport: Send + Sync {
    fn name(&self) -> &str;

    fn descriptor(&self) -> Result<PluginDescriptor>;

    /// Ask a transfer handler a question and return its decision
    fn ask(&self, handler: &str, question: Question, payload: &Value) -> Result<bool>;
}

/// Plugin executable run once per request
#[derive(Debug, Clone)]
pub struct ProcessPlugin {
    name: String,
    path: PathBuf,
    timeout: Duration,
}

impl ProcessPlugin {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            timeout: DEFAULT_PLUGIN_TIMEOUT,
        }
    }

    /// Locate the executable of plugin `name` in `dir`
    pub fn find(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(Error::not_found("plugin", name));
        }
        Ok(Self::new(name, path))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, args: &[&str], input: Option<&[u8]>) -> Result<Vec<u8>> {
        debug!("Executing plugin: {} {:?}", self.path.display(), args);
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::PluginError(format!("failed to spawn plugin {}: {}", self.name, e)))?;

        // Drain both pipes while the plugin runs so large answers cannot stall it.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(data)?;
        }

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                let stderr = collect(stderr);
                for line in String::from_utf8_lossy(&stderr).lines() {
                    warn!("[plugin {}] {}", self.name, line);
                }
                let stdout = collect(stdout);
                if !status.success() {
                    return Err(Error::PluginError(format!(
                        "plugin {} failed with exit code {}",
                        self.name,
                        status.code().unwrap_or(-1)
                    )));
                }
                Ok(stdout)
            }
            None => {
                // Reader threads are left to finish once the pipes close.
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::PluginError(format!(
                    "plugin {} timed out after {} seconds",
                    self.name,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

impl PluginTransport for ProcessPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> Result<PluginDescriptor> {
        let out = self.run(&["info"], None)?;
        serde_json::from_slice(&out).map_err(|e| {
            Error::PluginError(format!("invalid descriptor from plugin {}: {}", self.name, e))
        })
    }

    fn ask(&self, handler: &str, question: Question, payload: &Value) -> Result<bool> {
        let input = serde_json::to_vec(payload)?;
        let out = self.run(&["transferhandler", handler, question.as_str()], Some(&input))?;
        let answer: Decision = serde_json::from_slice(&out).map_err(|e| {
            Error::PluginError(format!(
                "invalid answer from plugin {} to {}: {}",
                self.name, question, e
            ))
        })?;
        Ok(answer.decision)
    }
}

/// Labels passed through a question's label filter
fn filter_labels(labels: &Labels, filter: Option<&[String]>) -> Labels {
    match filter {
        None => labels.clone(),
        Some(names) => labels
            .iter()
            .filter(|l| names.contains(&l.name))
            .cloned()
            .collect::<Vec<_>>()
            .into(),
    }
}

fn element_json(meta: &ElementMeta, filter: Option<&[String]>) -> Value {
    json!({
        "name": meta.name,
        "version": meta.version,
        "extraIdentity": meta.extra_identity,
        "labels": filter_labels(&meta.labels, filter),
    })
}

fn options_json(options: &StandardOptions, config: Option<&Value>) -> Value {
    json!({
        "recursive": options.recursive,
        "resourcesByValue": options.resources_by_value,
        "localByValue": options.local_resources_by_value,
        "sourcesByValue": options.sources_by_value,
        "keepGlobalAccess": options.keep_global_access,
        "stopOnExisting": options.stop_on_existing_version,
        "enforceTransport": options.enforce_transport,
        "overwrite": options.overwrite,
        "skipUpdate": options.skip_update,
        "omitAccessTypes": options.omit_access_types,
        "omitArtifactTypes": options.omit_artifact_types,
        "special": config,
    })
}

/// Policy asking a plugin transfer handler
pub struct PluginPolicy {
    standard: StandardPolicy,
    handler: String,
    config: Option<Value>,
    transport: Arc<dyn PluginTransport>,
    descriptor: OnceLock<TransferHandlerDescriptor>,
}

impl PluginPolicy {
    pub fn new(
        standard: StandardOptions,
        transport: Arc<dyn PluginTransport>,
        handler: impl Into<String>,
        config: Option<Value>,
    ) -> Self {
        Self {
            standard: StandardPolicy::new(standard),
            handler: handler.into(),
            config,
            transport,
            descriptor: OnceLock::new(),
        }
    }

    /// Descriptor of the configured handler, fetched from the plugin once
    fn handler_descriptor(&self) -> Result<&TransferHandlerDescriptor> {
        if let Some(desc) = self.descriptor.get() {
            return Ok(desc);
        }
        let plugin = self.transport.descriptor()?;
        let desc = plugin.transfer_handler(&self.handler).cloned().ok_or_else(|| {
            Error::not_found(
                "transfer handler",
                format!("{} of plugin {}", self.handler, self.transport.name()),
            )
        })?;
        Ok(self.descriptor.get_or_init(|| desc))
    }

    /// Label filter of a declared question, `None` when undeclared
    fn declared(&self, question: Question) -> Result<Option<Option<Vec<String>>>> {
        Ok(self
            .handler_descriptor()?
            .question(question)
            .map(|q| q.labels.clone()))
    }

    fn source_json(&self, src: &dyn ComponentVersionAccess, filter: Option<&[String]>) -> Value {
        let cd = src.descriptor();
        json!({
            "name": cd.name,
            "version": cd.version,
            "provider": {
                "name": cd.provider.name,
                "labels": filter_labels(&cd.provider.labels, filter),
            },
            "repository": src.repository().specification(),
            "labels": filter_labels(&cd.labels, filter),
        })
    }

    fn ask(&self, question: Question, payload: Value) -> Result<bool> {
        let decision = self.transport.ask(&self.handler, question, &payload)?;
        debug!(
            "plugin {} handler {} answered {} with {}",
            self.transport.name(),
            self.handler,
            question,
            decision
        );
        Ok(decision)
    }

    fn ask_version(
        &self,
        question: Question,
        filter: Option<Vec<String>>,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        let payload = json!({
            "source": self.source_json(src, filter.as_deref()),
            "target": tgt.repository().specification(),
            "options": options_json(self.standard.options(), self.config.as_ref()),
        });
        self.ask(question, payload)
    }

    fn ask_artifact(
        &self,
        question: Question,
        filter: Option<Vec<String>>,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        meta: &ElementMeta,
        kind: &str,
    ) -> Result<bool> {
        let mut artifact = element_json(meta, filter.as_deref());
        artifact["type"] = json!(kind);
        let payload = json!({
            "source": self.source_json(src, filter.as_deref()),
            "artifact": {
                "meta": artifact,
                "access": access,
                "accessInfo": {
                    "kind": access.kind(),
                    "hint": access.reference_hint(),
                },
            },
            "options": options_json(self.standard.options(), self.config.as_ref()),
        });
        self.ask(question, payload)
    }
}

impl TransferPolicy for PluginPolicy {
    fn update_version(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        match self.declared(Question::UpdateVersion)? {
            Some(filter) => self.ask_version(Question::UpdateVersion, filter, src, tgt),
            None => self.standard.update_version(src, tgt),
        }
    }

    fn enforce_transport(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        match self.declared(Question::EnforceTransport)? {
            Some(filter) => self.ask_version(Question::EnforceTransport, filter, src, tgt),
            None => self.standard.enforce_transport(src, tgt),
        }
    }

    fn overwrite_version(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        match self.declared(Question::OverwriteVersion)? {
            Some(filter) => self.ask_version(Question::OverwriteVersion, filter, src, tgt),
            None => self.standard.overwrite_version(src, tgt),
        }
    }

    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        src: &dyn ComponentVersionAccess,
        reference: &Reference,
        target: &Arc<dyn Repository>,
    ) -> Result<Option<ResolvedReference>> {
        let Some(filter) = self.declared(Question::TransferVersion)? else {
            return self.standard.transfer_version(repo, src, reference, target);
        };
        let payload = json!({
            "source": self.source_json(src, filter.as_deref()),
            "target": target.specification(),
            "element": element_json(&reference.meta, filter.as_deref()),
            "componentName": reference.component_name,
            "options": options_json(self.standard.options(), self.config.as_ref()),
        });
        if !self.ask(Question::TransferVersion, payload)? {
            return Ok(None);
        }
        self.standard.transfer_version(repo, src, reference, target)
    }

    fn transfer_resource(
        &self,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        resource: &Resource,
    ) -> Result<bool> {
        match self.declared(Question::TransferResource)? {
            Some(filter) => self.ask_artifact(
                Question::TransferResource,
                filter,
                src,
                access,
                &resource.meta,
                &resource.kind,
            ),
            None => self.standard.transfer_resource(src, access, resource),
        }
    }

    fn transfer_source(
        &self,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        source: &Source,
    ) -> Result<bool> {
        match self.declared(Question::TransferSource)? {
            Some(filter) => self.ask_artifact(
                Question::TransferSource,
                filter,
                src,
                access,
                &source.meta,
                &source.kind,
            ),
            None => self.standard.transfer_source(src, access, source),
        }
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

/// Handler family of the plugin-delegated policy
pub struct PluginFamily;

impl HandlerFamily for PluginFamily {
    fn name(&self) -> &str {
        "plugin"
    }

    fn priority(&self) -> i32 {
        PLUGIN_PRIORITY
    }

    fn accepts(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Standard | Capability::Plugin)
    }

    fn new_options(&self) -> Box<dyn PolicyOptions> {
        Box::new(PluginOptions::default())
    }
}

impl PolicyOptions for PluginOptions {
    fn build(self: Box<Self>) -> Result<Arc<dyn TransferPolicy>> {
        let options = *self;
        let (Some(name), Some(handler)) = (options.plugin, options.handler) else {
            return Err(Error::OptionError(
                "plugin transfer handler requires plugin and handler name".to_string(),
            ));
        };
        let transport = match options.transport {
            Some(transport) => transport,
            None => {
                let dir = match options.plugin_dir {
                    Some(dir) => dir,
                    None => crate::config::default_plugin_dir().ok_or_else(|| {
                        Error::ConfigError("cannot determine plugin directory".to_string())
                    })?,
                };
                Arc::new(ProcessPlugin::find(&dir, &name)?)
            }
        };
        Ok(Arc::new(PluginPolicy::new(
            options.standard,
            transport,
            handler,
            options.config,
        )))
    }
}
