// src/repository/memory.rs

//! In-process repository
//!
//! Keeps descriptors and content-addressed blobs in memory. Cloning a
//! [`MemoryRepository`] yields another handle to the same store. Blobs of
//! non-local access specs (OCI artifacts, helm charts) can be registered as
//! "external" content so transfers by value have something to read.
//!
//! The store counts open handles and committed versions so callers can check
//! that a transfer released everything and wrote only what it had to.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{
    AccessMethod, BlobAccessMethod, ComponentAccess, ComponentVersionAccess, Repository,
    version_not_found,
};
use crate::descriptor::{
    AccessSpec, ComponentDescriptor, ComponentVersionId, RepositorySpec, Resource, Source,
};
use crate::error::{Error, Result};
use crate::hash;

/// Repository type name recorded in repository contexts
pub const MEMORY_REPOSITORY_TYPE: &str = "memory";

#[derive(Debug, Clone)]
struct StoredBlob {
    media_type: String,
    data: Arc<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Store {
    components: BTreeMap<String, BTreeMap<String, ComponentDescriptor>>,
    blobs: HashMap<String, StoredBlob>,
    external: HashMap<String, StoredBlob>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    durable: bool,
    store: Mutex<Store>,
    open_handles: AtomicUsize,
    commits: AtomicUsize,
}

/// Shared in-memory repository
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    inner: Arc<Inner>,
}

impl MemoryRepository {
    /// Create an empty durable repository
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_durability(name, true)
    }

    /// Create an empty staging repository that is not recorded in descriptors
    pub fn non_durable(name: impl Into<String>) -> Self {
        Self::with_durability(name, false)
    }

    fn with_durability(name: impl Into<String>, durable: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                durable,
                store: Mutex::new(Store::default()),
                open_handles: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
            }),
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.inner
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a descriptor directly, bypassing version handles
    pub fn add_descriptor(&self, descriptor: ComponentDescriptor) -> Result<()> {
        descriptor.validate()?;
        self.store()
            .components
            .entry(descriptor.name.clone())
            .or_default()
            .insert(descriptor.version.clone(), descriptor);
        Ok(())
    }

    /// Current stored descriptor of a version
    pub fn descriptor(&self, name: &str, version: &str) -> Option<ComponentDescriptor> {
        self.store()
            .components
            .get(name)
            .and_then(|versions| versions.get(version))
            .cloned()
    }

    /// Store a local blob and return its access spec
    pub fn add_local_blob(&self, data: &[u8], media_type: &str) -> AccessSpec {
        let key = self.put_blob(data, media_type);
        AccessSpec::local_blob(key, media_type)
    }

    fn put_blob(&self, data: &[u8], media_type: &str) -> String {
        let key = hash::blob_reference(data);
        self.store()
            .blobs
            .entry(key.clone())
            .or_insert_with(|| StoredBlob {
                media_type: media_type.to_string(),
                data: Arc::new(data.to_vec()),
            });
        key
    }

    /// Make content available behind a non-local access spec
    pub fn register_external(&self, access: &AccessSpec, data: &[u8], media_type: &str) {
        self.store().external.insert(
            access.location_key(),
            StoredBlob {
                media_type: media_type.to_string(),
                data: Arc::new(data.to_vec()),
            },
        );
    }

    /// Check whether a local blob is stored
    pub fn has_blob(&self, local_reference: &str) -> bool {
        self.store().blobs.contains_key(local_reference)
    }

    /// Number of stored local blobs
    pub fn blob_count(&self) -> usize {
        self.store().blobs.len()
    }

    /// Number of component or version handles not yet dropped
    pub fn open_handles(&self) -> usize {
        self.inner.open_handles.load(Ordering::SeqCst)
    }

    /// Number of versions committed through `add_version`
    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    fn open_handle(&self) {
        self.inner.open_handles.fetch_add(1, Ordering::SeqCst);
    }

    fn close_handle(&self) {
        self.inner.open_handles.fetch_sub(1, Ordering::SeqCst);
    }

    fn resolve(&self, access: &AccessSpec) -> Result<Box<dyn AccessMethod>> {
        let store = self.store();
        let blob = match access {
            AccessSpec::NoAccess => {
                return Err(Error::AccessError(
                    "element has no accessible content".to_string(),
                ));
            }
            AccessSpec::LocalBlob {
                local_reference, ..
            } => store
                .blobs
                .get(local_reference)
                .ok_or_else(|| Error::not_found("blob", local_reference.clone()))?,
            other => store
                .external
                .get(&other.location_key())
                .ok_or_else(|| Error::not_found("external artifact", other.location_key()))?,
        };
        Ok(Box::new(BlobAccessMethod::new(
            access.clone(),
            blob.media_type.clone(),
            Arc::clone(&blob.data),
        )))
    }
}

impl Repository for MemoryRepository {
    fn specification(&self) -> RepositorySpec {
        RepositorySpec::new(MEMORY_REPOSITORY_TYPE, self.inner.name.clone())
    }

    fn is_durable(&self) -> bool {
        self.inner.durable
    }

    fn lookup_component(&self, name: &str) -> Result<Box<dyn ComponentAccess>> {
        self.open_handle();
        Ok(Box::new(MemoryComponent {
            repo: self.clone(),
            name: name.to_string(),
        }))
    }

    fn exists_component_version(&self, name: &str, version: &str) -> Result<bool> {
        Ok(self.descriptor(name, version).is_some())
    }

    fn component_names(&self) -> Result<Vec<String>> {
        Ok(self.store().components.keys().cloned().collect())
    }
}

struct MemoryComponent {
    repo: MemoryRepository,
    name: String,
}

impl Drop for MemoryComponent {
    fn drop(&mut self) {
        self.repo.close_handle();
    }
}

impl MemoryComponent {
    fn open(&self, descriptor: ComponentDescriptor) -> Box<dyn ComponentVersionAccess> {
        self.repo.open_handle();
        Box::new(MemoryComponentVersion {
            repo: self.repo.clone(),
            id: descriptor.id(),
            descriptor: Mutex::new(descriptor),
        })
    }
}

impl ComponentAccess for MemoryComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn versions(&self) -> Result<Vec<String>> {
        Ok(self
            .repo
            .store()
            .components
            .get(&self.name)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn lookup_version(&self, version: &str) -> Result<Box<dyn ComponentVersionAccess>> {
        let descriptor = self
            .repo
            .descriptor(&self.name, version)
            .ok_or_else(|| version_not_found(&self.name, version))?;
        Ok(self.open(descriptor))
    }

    fn new_version(&self, version: &str) -> Result<Box<dyn ComponentVersionAccess>> {
        Ok(self.open(ComponentDescriptor::new(self.name.clone(), version)))
    }

    fn add_version(&self, version: &dyn ComponentVersionAccess) -> Result<()> {
        let descriptor = version.descriptor();
        if descriptor.name != self.name {
            return Err(Error::RepositoryError(format!(
                "cannot add version of {} to component {}",
                descriptor.name, self.name
            )));
        }
        self.repo.add_descriptor(descriptor)?;
        self.repo.inner.commits.fetch_add(1, Ordering::SeqCst);
        debug!("{}: committed {}", self.repo.inner.name, version.id());
        Ok(())
    }
}

struct MemoryComponentVersion {
    repo: MemoryRepository,
    id: ComponentVersionId,
    descriptor: Mutex<ComponentDescriptor>,
}

impl Drop for MemoryComponentVersion {
    fn drop(&mut self) {
        self.repo.close_handle();
    }
}

impl MemoryComponentVersion {
    fn lock(&self) -> MutexGuard<'_, ComponentDescriptor> {
        self.descriptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ComponentVersionAccess for MemoryComponentVersion {
    fn id(&self) -> ComponentVersionId {
        self.id.clone()
    }

    fn descriptor(&self) -> ComponentDescriptor {
        self.lock().clone()
    }

    fn set_descriptor(&self, descriptor: ComponentDescriptor) {
        *self.lock() = descriptor;
    }

    fn repository(&self) -> Arc<dyn Repository> {
        Arc::new(self.repo.clone())
    }

    fn access_method(&self, access: &AccessSpec) -> Result<Box<dyn AccessMethod>> {
        self.repo.resolve(access)
    }

    fn add_blob(
        &self,
        data: &[u8],
        media_type: &str,
        reference_name: Option<&str>,
        global_access: Option<AccessSpec>,
    ) -> Result<AccessSpec> {
        let key = self.repo.put_blob(data, media_type);
        Ok(AccessSpec::LocalBlob {
            local_reference: key,
            media_type: media_type.to_string(),
            reference_name: reference_name.map(str::to_string),
            global_access: global_access.map(Box::new),
        })
    }

    fn set_resource(&self, resource: Resource) -> Result<()> {
        self.lock().set_resource(resource);
        Ok(())
    }

    fn set_source(&self, source: Source) -> Result<()> {
        self.lock().set_source(source);
        Ok(())
    }
}
