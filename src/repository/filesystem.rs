// src/repository/filesystem.rs

//! Directory-backed repository
//!
//! Layout below the root directory:
//!
//! ```text
//! component-descriptors/<escaped component name>/<version>.json
//! blobs/sha256.<hex>
//! external/<escaped access location>
//! ```
//!
//! Files are written through a temporary file in the target directory and
//! renamed into place, so a crashed transfer never leaves a truncated
//! descriptor or blob behind.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{
    AccessMethod, ComponentAccess, ComponentVersionAccess, Repository, media_type_of,
    version_not_found,
};
use crate::descriptor::{
    AccessSpec, ComponentDescriptor, ComponentVersionId, DigestSpec, RepositorySpec, Resource,
    Source,
};
use crate::error::{Error, Result};
use crate::hash::{self, Hash};

/// Repository type name recorded in repository contexts
pub const FILESYSTEM_REPOSITORY_TYPE: &str = "filesystem";

const DESCRIPTOR_DIR: &str = "component-descriptors";
const BLOB_DIR: &str = "blobs";
const EXTERNAL_DIR: &str = "external";

/// Escape a name so it forms a single path segment
fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(segment: &str) -> String {
    segment
        .replace("%2F", "/")
        .replace("%5C", "\\")
        .replace("%3A", ":")
        .replace("%25", "%")
}

/// Write a file atomically via a temporary sibling
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::IoError(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(dir)
        .map_err(|e| Error::IoError(format!("Failed to create {}: {e}", dir.display())))?;
    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::IoError(format!("Failed to create temp file: {e}")))?;
    temp.write_all(data)
        .map_err(|e| Error::IoError(format!("Failed to write temp file: {e}")))?;
    temp.persist(path)
        .map_err(|e| Error::IoError(format!("Failed to persist {}: {e}", path.display())))?;
    Ok(())
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
}

/// Repository stored in a local directory
#[derive(Debug, Clone)]
pub struct FilesystemRepository {
    inner: Arc<Inner>,
}

impl FilesystemRepository {
    /// Open (creating if needed) a repository rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [DESCRIPTOR_DIR, BLOB_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| Error::IoError(format!("Failed to create {}: {e}", path.display())))?;
        }
        Ok(Self {
            inner: Arc::new(Inner { root }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn descriptor_path(&self, name: &str, version: &str) -> PathBuf {
        self.inner
            .root
            .join(DESCRIPTOR_DIR)
            .join(escape(name))
            .join(format!("{}.json", escape(version)))
    }

    fn blob_path(&self, local_reference: &str) -> Result<PathBuf> {
        let hash = Hash::parse_prefixed(local_reference)
            .map_err(|e| Error::AccessError(format!("invalid local reference {}: {}", local_reference, e)))?;
        Ok(self.inner.root.join(BLOB_DIR).join(format!(
            "{}.{}",
            hash.algorithm.prefix(),
            hash.value
        )))
    }

    fn external_path(&self, access: &AccessSpec) -> PathBuf {
        self.inner
            .root
            .join(EXTERNAL_DIR)
            .join(escape(&access.location_key()))
    }

    /// Read a stored descriptor, `Ok(None)` when absent
    pub fn read_descriptor(&self, name: &str, version: &str) -> Result<Option<ComponentDescriptor>> {
        let path = self.descriptor_path(name, version);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        let descriptor = ComponentDescriptor::from_json(&text)
            .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?;
        Ok(Some(descriptor))
    }

    /// Validate and store a descriptor
    pub fn write_descriptor(&self, descriptor: &ComponentDescriptor) -> Result<()> {
        descriptor.validate()?;
        let path = self.descriptor_path(&descriptor.name, &descriptor.version);
        write_atomic(&path, descriptor.to_json()?.as_bytes())?;
        debug!("Wrote descriptor {}", path.display());
        Ok(())
    }

    /// Store a local blob and return its local reference
    pub fn put_blob(&self, data: &[u8]) -> Result<String> {
        let reference = hash::blob_reference(data);
        let path = self.blob_path(&reference)?;
        if !path.exists() {
            write_atomic(&path, data)?;
            debug!("Stored blob {}", reference);
        }
        Ok(reference)
    }

    /// Make content available behind a non-local access spec
    pub fn register_external(&self, access: &AccessSpec, data: &[u8]) -> Result<()> {
        write_atomic(&self.external_path(access), data)
    }

    fn resolve(&self, access: &AccessSpec) -> Result<Box<dyn AccessMethod>> {
        let path = match access {
            AccessSpec::NoAccess => {
                return Err(Error::AccessError(
                    "element has no accessible content".to_string(),
                ));
            }
            AccessSpec::LocalBlob {
                local_reference, ..
            } => {
                let path = self.blob_path(local_reference)?;
                if !path.exists() {
                    return Err(Error::not_found("blob", local_reference.clone()));
                }
                path
            }
            other => {
                let path = self.external_path(other);
                if !path.exists() {
                    return Err(Error::not_found("external artifact", other.location_key()));
                }
                path
            }
        };
        Ok(Box::new(FileAccessMethod {
            spec: access.clone(),
            mime_type: media_type_of(access).to_string(),
            path,
        }))
    }
}

impl Repository for FilesystemRepository {
    fn specification(&self) -> RepositorySpec {
        RepositorySpec::new(
            FILESYSTEM_REPOSITORY_TYPE,
            self.inner.root.display().to_string(),
        )
    }

    fn lookup_component(&self, name: &str) -> Result<Box<dyn ComponentAccess>> {
        Ok(Box::new(FsComponent {
            repo: self.clone(),
            name: name.to_string(),
        }))
    }

    fn exists_component_version(&self, name: &str, version: &str) -> Result<bool> {
        Ok(self.descriptor_path(name, version).exists())
    }

    fn component_names(&self) -> Result<Vec<String>> {
        let dir = self.inner.root.join(DESCRIPTOR_DIR);
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(unescape(&entry.file_name().to_string_lossy()));
            }
        }
        names.sort();
        Ok(names)
    }
}

struct FsComponent {
    repo: FilesystemRepository,
    name: String,
}

impl FsComponent {
    fn open(&self, descriptor: ComponentDescriptor) -> Box<dyn ComponentVersionAccess> {
        Box::new(FsComponentVersion {
            repo: self.repo.clone(),
            id: descriptor.id(),
            descriptor: Mutex::new(descriptor),
        })
    }
}

impl ComponentAccess for FsComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn versions(&self) -> Result<Vec<String>> {
        let dir = self.repo.inner.root.join(DESCRIPTOR_DIR).join(escape(&self.name));
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let file_name = entry?.file_name().to_string_lossy().to_string();
            if let Some(version) = file_name.strip_suffix(".json") {
                versions.push(unescape(version));
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn lookup_version(&self, version: &str) -> Result<Box<dyn ComponentVersionAccess>> {
        let descriptor = self
            .repo
            .read_descriptor(&self.name, version)?
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
        self.repo.write_descriptor(&descriptor)
    }
}

struct FsComponentVersion {
    repo: FilesystemRepository,
    id: ComponentVersionId,
    descriptor: Mutex<ComponentDescriptor>,
}

impl FsComponentVersion {
    fn lock(&self) -> MutexGuard<'_, ComponentDescriptor> {
        self.descriptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ComponentVersionAccess for FsComponentVersion {
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
        let reference = self.repo.put_blob(data)?;
        Ok(AccessSpec::LocalBlob {
            local_reference: reference,
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

/// Access method reading a file on demand
struct FileAccessMethod {
    spec: AccessSpec,
    mime_type: String,
    path: PathBuf,
}

impl AccessMethod for FileAccessMethod {
    fn access_spec(&self) -> &AccessSpec {
        &self.spec
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)
            .map_err(|e| Error::AccessError(format!("Failed to open {}: {e}", self.path.display())))?;
        Ok(Box::new(file))
    }

    fn digest(&self) -> Option<DigestSpec> {
        // local blob files are named after their digest
        match &self.spec {
            AccessSpec::LocalBlob {
                local_reference, ..
            } => Hash::parse_prefixed(local_reference).ok().map(|h| DigestSpec {
                hash_algorithm: h.algorithm.name().to_string(),
                normalisation_algorithm: crate::descriptor::GENERIC_BLOB_DIGEST.to_string(),
                value: h.value,
            }),
            _ => None,
        }
    }
}
