// src/policy/mod.rs

//! Transfer policies
//!
//! A [`TransferPolicy`] makes every decision a transfer needs: whether an
//! existing target version may be updated or overwritten, which references
//! are followed, which artifacts are copied by value, and how a copy is
//! carried out. The orchestrator is uniform over all implementations:
//!
//! - [`standard::StandardPolicy`]: static flags
//! - [`scripted::ScriptedPolicy`]: declarative rule script on top of the flags
//! - [`plugin::PluginPolicy`]: questions forwarded to an external plugin
//!
//! Policies are built from [`options::TransferOption`]s through a
//! [`registry::PolicyRegistry`].
//!
//! Declining is not an error: refusals are `Ok(false)` or `Ok(None)`.

pub mod options;
pub mod plugin;
pub mod registry;
pub mod scripted;
pub mod standard;

use std::sync::Arc;

use crate::descriptor::{AccessSpec, Reference, Resource, Source};
use crate::error::Result;
use crate::repository::{AccessMethod, ComponentVersionAccess, Repository};

pub use options::{Capability, TransferOption};
pub use registry::{PolicyRegistry, default_registry, new_transfer_handler};
pub use standard::StandardPolicy;

/// A reference resolved for transfer
pub struct ResolvedReference {
    /// The referenced component version in its source repository
    pub version: Box<dyn ComponentVersionAccess>,
    /// Policy for the referenced sub-tree, `None` to keep the current one
    pub policy: Option<Arc<dyn TransferPolicy>>,
}

impl ResolvedReference {
    /// Resolved version continuing with the current policy
    pub fn new(version: Box<dyn ComponentVersionAccess>) -> Self {
        Self {
            version,
            policy: None,
        }
    }
}

/// Strategy making all transport decisions of a transfer
///
/// Implementations are shared with the copy workers of a version and must
/// be thread-safe.
pub trait TransferPolicy: Send + Sync {
    /// May volatile-only differences be applied to an existing target version?
    fn update_version(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool>;

    /// Transfer as if the target version were absent?
    fn enforce_transport(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool>;

    /// May an existing target version be overwritten despite
    /// signature-relevant differences?
    fn overwrite_version(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool>;

    /// Resolve a reference of `src`, `Ok(None)` to leave it untransferred
    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        src: &dyn ComponentVersionAccess,
        reference: &Reference,
        target: &Arc<dyn Repository>,
    ) -> Result<Option<ResolvedReference>>;

    /// Copy the value of a non-local resource instead of keeping its reference?
    fn transfer_resource(
        &self,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        resource: &Resource,
    ) -> Result<bool>;

    /// Copy the value of a non-local source instead of keeping its reference?
    fn transfer_source(
        &self,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        source: &Source,
    ) -> Result<bool>;

    /// Copy a resource's content into the target version
    fn handle_transfer_resource(
        &self,
        resource: &Resource,
        method: &dyn AccessMethod,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()>;

    /// Copy a source's content into the target version
    fn handle_transfer_source(
        &self,
        source: &Source,
        method: &dyn AccessMethod,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()>;
}
