// src/repository/mod.rs

//! Repository and blob access interfaces
//!
//! The transfer engine talks to storage backends only through these traits:
//!
//! - [`Repository`]: a store of components, addressed by a [`RepositorySpec`]
//! - [`ComponentAccess`]: the versions of one component
//! - [`ComponentVersionAccess`]: one version, its descriptor and local blobs
//! - [`AccessMethod`]: read access to the bytes behind an [`AccessSpec`]
//!
//! Handles are plain owned values; dropping a handle releases whatever the
//! backend holds for it, so every exit path cleans up.
//!
//! Two backends ship with the crate: [`memory::MemoryRepository`] and
//! [`filesystem::FilesystemRepository`].

pub mod filesystem;
pub mod memory;

use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::descriptor::{
    AccessSpec, ComponentDescriptor, ComponentVersionId, DigestSpec, RepositorySpec, Resource,
    Source,
};
use crate::error::{Error, Result};

/// A store of component versions
pub trait Repository: Send + Sync {
    /// Where this repository lives
    fn specification(&self) -> RepositorySpec;

    /// Durable repositories are recorded in the repository contexts of
    /// descriptors written to them; staging areas are not
    fn is_durable(&self) -> bool {
        true
    }

    /// Open a component, whether or not it has versions yet
    fn lookup_component(&self, name: &str) -> Result<Box<dyn ComponentAccess>>;

    /// Check whether a component version is stored
    fn exists_component_version(&self, name: &str, version: &str) -> Result<bool>;

    /// Names of all stored components
    fn component_names(&self) -> Result<Vec<String>>;

    /// Open a stored component version
    fn lookup_component_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Box<dyn ComponentVersionAccess>> {
        self.lookup_component(name)?.lookup_version(version)
    }
}

/// The versions of one component
pub trait ComponentAccess: Send + Sync {
    fn name(&self) -> &str;

    /// Stored versions
    fn versions(&self) -> Result<Vec<String>>;

    /// Open a stored version; `Error::NotFound` when absent
    fn lookup_version(&self, version: &str) -> Result<Box<dyn ComponentVersionAccess>>;

    /// Start a new version, not visible until added
    fn new_version(&self, version: &str) -> Result<Box<dyn ComponentVersionAccess>>;

    /// Commit a version's current descriptor
    fn add_version(&self, version: &dyn ComponentVersionAccess) -> Result<()>;
}

/// One component version of a repository
///
/// Methods take `&self`; implementations guard their descriptor with
/// interior mutability because copy tasks update resources concurrently.
pub trait ComponentVersionAccess: Send + Sync {
    fn id(&self) -> ComponentVersionId;

    /// Snapshot of the current descriptor
    fn descriptor(&self) -> ComponentDescriptor;

    /// Replace the current descriptor (uncommitted until added)
    fn set_descriptor(&self, descriptor: ComponentDescriptor);

    /// Repository this version belongs to
    fn repository(&self) -> Arc<dyn Repository>;

    /// Open the content behind an access spec, resolved in this repository
    fn access_method(&self, access: &AccessSpec) -> Result<Box<dyn AccessMethod>>;

    /// Store a blob locally and return its local access spec
    fn add_blob(
        &self,
        data: &[u8],
        media_type: &str,
        reference_name: Option<&str>,
        global_access: Option<AccessSpec>,
    ) -> Result<AccessSpec>;

    /// Insert or replace a resource by identity
    fn set_resource(&self, resource: Resource) -> Result<()>;

    /// Insert or replace a source by identity
    fn set_source(&self, source: Source) -> Result<()>;
}

/// Read access to the content behind an access spec
pub trait AccessMethod: Send {
    fn access_spec(&self) -> &AccessSpec;

    fn mime_type(&self) -> &str;

    /// Open a fresh reader over the content
    fn reader(&self) -> Result<Box<dyn Read + Send>>;

    /// Digest of the content when known without reading it
    fn digest(&self) -> Option<DigestSpec> {
        None
    }

    /// Read the whole content
    fn get(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.reader()?.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// Access method over bytes already held in memory
#[derive(Debug, Clone)]
pub struct BlobAccessMethod {
    spec: AccessSpec,
    mime_type: String,
    data: Arc<Vec<u8>>,
}

impl BlobAccessMethod {
    pub fn new(spec: AccessSpec, mime_type: impl Into<String>, data: Arc<Vec<u8>>) -> Self {
        Self {
            spec,
            mime_type: mime_type.into(),
            data,
        }
    }
}

impl AccessMethod for BlobAccessMethod {
    fn access_spec(&self) -> &AccessSpec {
        &self.spec
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data.as_ref().clone())))
    }

    fn digest(&self) -> Option<DigestSpec> {
        Some(DigestSpec::for_blob(&self.data))
    }

    fn get(&self) -> Result<Vec<u8>> {
        Ok(self.data.as_ref().clone())
    }
}

/// Media type recorded for an access spec
pub fn media_type_of(access: &AccessSpec) -> &str {
    match access {
        AccessSpec::LocalBlob { media_type, .. } => media_type,
        AccessSpec::OciArtifact { .. } => "application/vnd.oci.image.manifest.v1+json",
        AccessSpec::Helm { .. } => "application/vnd.cncf.helm.chart.content.v1.tar+gzip",
        AccessSpec::NoAccess => "application/octet-stream",
    }
}

/// Resolves component versions referenced by a descriptor
pub trait ComponentVersionResolver: Send + Sync {
    /// Look up a version, `Ok(None)` when this resolver does not know it
    fn lookup_component_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Box<dyn ComponentVersionAccess>>>;
}

/// Resolver trying a list of repositories in order
#[derive(Clone, Default)]
pub struct RepositoryResolver {
    repositories: Vec<Arc<dyn Repository>>,
}

impl RepositoryResolver {
    pub fn new(repositories: Vec<Arc<dyn Repository>>) -> Self {
        Self { repositories }
    }

    pub fn add(&mut self, repository: Arc<dyn Repository>) {
        self.repositories.push(repository);
    }
}

impl ComponentVersionResolver for RepositoryResolver {
    fn lookup_component_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Box<dyn ComponentVersionAccess>>> {
        for repo in &self.repositories {
            match repo.lookup_component_version(name, version) {
                Ok(cv) => return Ok(Some(cv)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

/// Opens repositories from their specification
///
/// Repositories registered up front are matched by specification; any other
/// `filesystem` specification is opened from disk.
#[derive(Clone, Default)]
pub struct RepositoryFactory {
    known: Vec<Arc<dyn Repository>>,
}

impl RepositoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an already opened repository available by its specification
    pub fn register(&mut self, repository: Arc<dyn Repository>) {
        self.known.push(repository);
    }

    pub fn open(&self, spec: &RepositorySpec) -> Result<Arc<dyn Repository>> {
        if let Some(repo) = self.known.iter().find(|r| r.specification() == *spec) {
            return Ok(Arc::clone(repo));
        }
        match spec.kind.as_str() {
            filesystem::FILESYSTEM_REPOSITORY_TYPE => {
                Ok(Arc::new(filesystem::FilesystemRepository::open(&spec.location)?))
            }
            other => Err(Error::RepositoryError(format!(
                "cannot open repository {} of type {}",
                spec.location, other
            ))),
        }
    }
}

/// Look up `name:version` in a repository, mapping absence to `Ok(None)`
pub fn find_component_version(
    repository: &dyn Repository,
    name: &str,
    version: &str,
) -> Result<Option<Box<dyn ComponentVersionAccess>>> {
    match repository.lookup_component_version(name, version) {
        Ok(cv) => Ok(Some(cv)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn version_not_found(name: &str, version: &str) -> Error {
    Error::not_found(
        "component version",
        ComponentVersionId::new(name, version).to_string(),
    )
}
