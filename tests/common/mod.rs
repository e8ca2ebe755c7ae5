// tests/common/mod.rs

//! Shared builders and policies for integration tests.

#![allow(dead_code)]

use cvtransfer::descriptor::{
    AccessSpec, ComponentDescriptor, DigestSpec, Reference, Resource, ResourceRelation, Source,
};
use cvtransfer::policy::options::StandardOptions;
use cvtransfer::policy::{ResolvedReference, StandardPolicy, TransferPolicy};
use cvtransfer::printer::{MemoryPrinter, SharedPrinter};
use cvtransfer::repository::memory::MemoryRepository;
use cvtransfer::repository::{AccessMethod, ComponentVersionAccess, Repository};
use cvtransfer::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const PROVIDER: &str = "acme";

/// Descriptor with a provider and nothing else
pub fn descriptor(name: &str, version: &str) -> ComponentDescriptor {
    let mut cd = ComponentDescriptor::new(name, version);
    cd.provider.name = PROVIDER.to_string();
    cd
}

/// Resource stored as a local blob of `repo`, with its digest
pub fn local_resource(repo: &MemoryRepository, name: &str, data: &[u8]) -> Resource {
    let access = repo.add_local_blob(data, "application/octet-stream");
    let mut resource = Resource::new(name, "blob", access);
    resource.digest = Some(DigestSpec::for_blob(data));
    resource
}

/// External OCI resource whose content `repo` can serve
pub fn oci_resource(repo: &MemoryRepository, name: &str, image: &str, data: &[u8]) -> Resource {
    let access = AccessSpec::oci(image);
    repo.register_external(&access, data, "application/vnd.oci.image.manifest.v1+json");
    let mut resource = Resource::new(name, "ociImage", access);
    resource.relation = ResourceRelation::External;
    resource.digest = Some(DigestSpec::for_blob(data));
    resource
}

/// Source stored as a local blob of `repo`
pub fn local_source(repo: &MemoryRepository, name: &str, data: &[u8]) -> Source {
    let access = repo.add_local_blob(data, "application/x-tar");
    Source::new(name, "git", access)
}

/// Reference named after the referenced component
pub fn reference(name: &str, component: &str, version: &str) -> Reference {
    Reference::new(name, component, version)
}

/// Store `cd` in `repo` and return its id string
pub fn store(repo: &MemoryRepository, cd: ComponentDescriptor) -> String {
    let id = cd.id().to_string();
    repo.add_descriptor(cd).unwrap();
    id
}

/// Open a stored version
pub fn open(repo: &MemoryRepository, name: &str, version: &str) -> Box<dyn ComponentVersionAccess> {
    repo.lookup_component_version(name, version).unwrap()
}

pub fn target_of(repo: &MemoryRepository) -> Arc<dyn Repository> {
    Arc::new(repo.clone())
}

pub fn standard(configure: impl FnOnce(&mut StandardOptions)) -> Arc<dyn TransferPolicy> {
    let mut options = StandardOptions::default();
    configure(&mut options);
    Arc::new(StandardPolicy::new(options))
}

pub fn memory_printer() -> (MemoryPrinter, SharedPrinter) {
    let memory = MemoryPrinter::new();
    let shared: SharedPrinter = Arc::new(memory.clone());
    (memory, shared)
}

/// Standard policy counting the artifact copies it performs
pub struct CountingPolicy {
    inner: StandardPolicy,
    pub resources: AtomicUsize,
    pub sources: AtomicUsize,
}

impl CountingPolicy {
    pub fn new(options: StandardOptions) -> Self {
        Self {
            inner: StandardPolicy::new(options),
            resources: AtomicUsize::new(0),
            sources: AtomicUsize::new(0),
        }
    }

    pub fn resource_copies(&self) -> usize {
        self.resources.load(Ordering::SeqCst)
    }

    pub fn source_copies(&self) -> usize {
        self.sources.load(Ordering::SeqCst)
    }
}

impl TransferPolicy for CountingPolicy {
    fn update_version(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        self.inner.update_version(src, tgt)
    }

    fn enforce_transport(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        self.inner.enforce_transport(src, tgt)
    }

    fn overwrite_version(
        &self,
        src: &dyn ComponentVersionAccess,
        tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        self.inner.overwrite_version(src, tgt)
    }

    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        src: &dyn ComponentVersionAccess,
        reference: &Reference,
        target: &Arc<dyn Repository>,
    ) -> Result<Option<ResolvedReference>> {
        self.inner.transfer_version(repo, src, reference, target)
    }

    fn transfer_resource(
        &self,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        resource: &Resource,
    ) -> Result<bool> {
        self.inner.transfer_resource(src, access, resource)
    }

    fn transfer_source(
        &self,
        src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        source: &Source,
    ) -> Result<bool> {
        self.inner.transfer_source(src, access, source)
    }

    fn handle_transfer_resource(
        &self,
        resource: &Resource,
        method: &dyn AccessMethod,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()> {
        self.resources.fetch_add(1, Ordering::SeqCst);
        self.inner
            .handle_transfer_resource(resource, method, hint, target)
    }

    fn handle_transfer_source(
        &self,
        source: &Source,
        method: &dyn AccessMethod,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()> {
        self.sources.fetch_add(1, Ordering::SeqCst);
        self.inner.handle_transfer_source(source, method, hint, target)
    }
}
