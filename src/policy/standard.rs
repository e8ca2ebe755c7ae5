// src/policy/standard.rs

//! Standard transfer policy driven by static flags

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::descriptor::{AccessSpec, DigestSpec, Reference, Resource, ResourceRelation, Source};
use crate::error::Result;
use crate::policy::options::{Capability, StandardOptions};
use crate::policy::registry::{HandlerFamily, PolicyOptions, STANDARD_PRIORITY};
use crate::policy::{ResolvedReference, TransferPolicy};
use crate::repository::{
    AccessMethod, ComponentVersionAccess, Repository, find_component_version, version_not_found,
};

/// Base delay between blob read attempts, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 200;

/// Policy answering every question from [`StandardOptions`]
#[derive(Debug, Clone, Default)]
pub struct StandardPolicy {
    options: StandardOptions,
}

impl StandardPolicy {
    pub fn new(options: StandardOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StandardOptions {
        &self.options
    }

    /// Is the content behind this access or of this artifact type excluded?
    pub fn omits(&self, access: &AccessSpec, artifact_type: Option<&str>) -> bool {
        self.options
            .omit_access_types
            .iter()
            .any(|t| t == access.kind())
            || artifact_type.is_some_and(|kind| self.options.omit_artifact_types.iter().any(|t| t == kind))
    }

    /// Look up a referenced version in `repo`, then in the extra resolver
    pub fn resolve_reference(
        &self,
        repo: &dyn Repository,
        reference: &Reference,
    ) -> Result<Box<dyn ComponentVersionAccess>> {
        let id = reference.target_id();
        if let Some(cv) = find_component_version(repo, &id.name, &id.version)? {
            return Ok(cv);
        }
        if let Some(resolver) = &self.options.resolver
            && let Some(cv) = resolver.lookup_component_version(&id.name, &id.version)?
        {
            return Ok(cv);
        }
        Err(version_not_found(&id.name, &id.version))
    }

    /// Read content, verifying it against `digest`, with linear backoff
    fn read_with_retries(
        &self,
        method: &dyn AccessMethod,
        digest: Option<&DigestSpec>,
        what: &str,
    ) -> Result<Vec<u8>> {
        let mut attempt: u32 = 0;
        loop {
            let result = method.get().and_then(|data| {
                if let Some(digest) = digest {
                    digest.verify_blob(&data)?;
                }
                Ok(data)
            });
            match result {
                Ok(data) => return Ok(data),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.options.retries {
                        return Err(e);
                    }
                    warn!("Reading {} attempt {} failed: {}, retrying...", what, attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    fn global_access(&self, access: &AccessSpec) -> Option<AccessSpec> {
        if !self.options.keep_global_access {
            return None;
        }
        match access {
            AccessSpec::LocalBlob { global_access, .. } => global_access.as_deref().cloned(),
            AccessSpec::NoAccess => None,
            other => Some(other.clone()),
        }
    }

    fn copy_blob(
        &self,
        method: &dyn AccessMethod,
        digest: Option<&DigestSpec>,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
        what: &str,
    ) -> Result<AccessSpec> {
        let data = self.read_with_retries(method, digest, what)?;
        debug!("copying {} ({} bytes) into {}", what, data.len(), target.id());
        target.add_blob(
            &data,
            method.mime_type(),
            hint,
            self.global_access(method.access_spec()),
        )
    }
}

impl TransferPolicy for StandardPolicy {
    fn update_version(
        &self,
        _src: &dyn ComponentVersionAccess,
        _tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        Ok(!self.options.skip_update)
    }

    fn enforce_transport(
        &self,
        _src: &dyn ComponentVersionAccess,
        _tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        Ok(self.options.enforce_transport)
    }

    fn overwrite_version(
        &self,
        _src: &dyn ComponentVersionAccess,
        _tgt: &dyn ComponentVersionAccess,
    ) -> Result<bool> {
        Ok(self.options.overwrite)
    }

    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        _src: &dyn ComponentVersionAccess,
        reference: &Reference,
        target: &Arc<dyn Repository>,
    ) -> Result<Option<ResolvedReference>> {
        if !self.options.recursive {
            return Ok(None);
        }
        let id = reference.target_id();
        if self.options.stop_on_existing_version
            && target.exists_component_version(&id.name, &id.version)?
        {
            debug!("reference {} already present in target, not descending", id);
            return Ok(None);
        }
        let cv = self.resolve_reference(repo.as_ref(), reference)?;
        Ok(Some(ResolvedReference::new(cv)))
    }

    fn transfer_resource(
        &self,
        _src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        resource: &Resource,
    ) -> Result<bool> {
        if self.omits(access, Some(&resource.kind)) {
            return Ok(false);
        }
        if resource.relation == ResourceRelation::Local && self.options.local_resources_by_value {
            return Ok(true);
        }
        Ok(self.options.resources_by_value)
    }

    fn transfer_source(
        &self,
        _src: &dyn ComponentVersionAccess,
        access: &AccessSpec,
        _source: &Source,
    ) -> Result<bool> {
        if self.omits(access, None) {
            return Ok(false);
        }
        Ok(self.options.sources_by_value)
    }

    fn handle_transfer_resource(
        &self,
        resource: &Resource,
        method: &dyn AccessMethod,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()> {
        let what = format!("resource {}", resource.identity());
        let access = self.copy_blob(method, resource.digest.as_ref(), hint, target, &what)?;
        let mut copied = resource.clone();
        copied.access = access;
        target.set_resource(copied)
    }

    fn handle_transfer_source(
        &self,
        source: &Source,
        method: &dyn AccessMethod,
        hint: Option<&str>,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()> {
        let what = format!("source {}", source.identity());
        let access = self.copy_blob(method, None, hint, target, &what)?;
        let mut copied = source.clone();
        copied.access = access;
        target.set_source(copied)
    }
}

/// Handler family of the standard policy
pub struct StandardFamily;

impl HandlerFamily for StandardFamily {
    fn name(&self) -> &str {
        "standard"
    }

    fn priority(&self) -> i32 {
        STANDARD_PRIORITY
    }

    fn accepts(&self, capability: Capability) -> bool {
        capability == Capability::Standard
    }

    fn new_options(&self) -> Box<dyn PolicyOptions> {
        Box::new(StandardOptions::default())
    }
}

impl PolicyOptions for StandardOptions {
    fn build(self: Box<Self>) -> Result<Arc<dyn TransferPolicy>> {
        Ok(Arc::new(StandardPolicy::new(*self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ComponentDescriptor;
    use crate::error::Error;
    use crate::repository::BlobAccessMethod;
    use crate::repository::memory::MemoryRepository;

    fn setup() -> (MemoryRepository, MemoryRepository) {
        let source = MemoryRepository::new("source");
        let mut cd = ComponentDescriptor::new("acme.org/app", "1.0");
        cd.references.push(Reference::new("lib", "acme.org/lib", "2.0"));
        source.add_descriptor(cd).unwrap();
        source
            .add_descriptor(ComponentDescriptor::new("acme.org/lib", "2.0"))
            .unwrap();
        (source, MemoryRepository::new("target"))
    }

    fn policy(configure: impl FnOnce(&mut StandardOptions)) -> StandardPolicy {
        let mut options = StandardOptions::default();
        configure(&mut options);
        StandardPolicy::new(options)
    }

    #[test]
    fn test_version_questions_follow_flags() {
        let (source, _) = setup();
        let cv = source.lookup_component_version("acme.org/app", "1.0").unwrap();
        let default = StandardPolicy::default();
        assert!(default.update_version(cv.as_ref(), cv.as_ref()).unwrap());
        assert!(!default.enforce_transport(cv.as_ref(), cv.as_ref()).unwrap());
        assert!(!default.overwrite_version(cv.as_ref(), cv.as_ref()).unwrap());

        let strict = policy(|o| {
            o.skip_update = true;
            o.overwrite = true;
        });
        assert!(!strict.update_version(cv.as_ref(), cv.as_ref()).unwrap());
        assert!(strict.overwrite_version(cv.as_ref(), cv.as_ref()).unwrap());
    }

    #[test]
    fn test_transfer_version_requires_recursive() {
        let (source, target) = setup();
        let src: Arc<dyn Repository> = Arc::new(source);
        let tgt: Arc<dyn Repository> = Arc::new(target);
        let cv = src.lookup_component_version("acme.org/app", "1.0").unwrap();
        let reference = cv.descriptor().references[0].clone();

        let flat = StandardPolicy::default();
        assert!(flat.transfer_version(&src, cv.as_ref(), &reference, &tgt).unwrap().is_none());

        let deep = policy(|o| o.recursive = true);
        let resolved = deep
            .transfer_version(&src, cv.as_ref(), &reference, &tgt)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.version.id().to_string(), "acme.org/lib:2.0");
        assert!(resolved.policy.is_none());
    }

    #[test]
    fn test_stop_on_existing_version() {
        let (source, target) = setup();
        target
            .add_descriptor(ComponentDescriptor::new("acme.org/lib", "2.0"))
            .unwrap();
        let src: Arc<dyn Repository> = Arc::new(source);
        let tgt: Arc<dyn Repository> = Arc::new(target);
        let cv = src.lookup_component_version("acme.org/app", "1.0").unwrap();
        let reference = cv.descriptor().references[0].clone();
        let p = policy(|o| {
            o.recursive = true;
            o.stop_on_existing_version = true;
        });
        assert!(p.transfer_version(&src, cv.as_ref(), &reference, &tgt).unwrap().is_none());
    }

    #[test]
    fn test_unresolvable_reference_is_not_found() {
        let (source, target) = setup();
        let src: Arc<dyn Repository> = Arc::new(source);
        let tgt: Arc<dyn Repository> = Arc::new(target);
        let cv = src.lookup_component_version("acme.org/app", "1.0").unwrap();
        let missing = Reference::new("gone", "acme.org/gone", "1.0");
        let p = policy(|o| o.recursive = true);
        let err = match p.transfer_version(&src, cv.as_ref(), &missing, &tgt) {
            Ok(_) => panic!("expected not found"),
            Err(e) => e,
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn test_transfer_resource_flags() {
        let (source, _) = setup();
        let cv = source.lookup_component_version("acme.org/app", "1.0").unwrap();
        let access = AccessSpec::oci("ghcr.io/acme/app:1.0");
        let mut resource = Resource::new("image", "ociImage", access.clone());

        assert!(!StandardPolicy::default().transfer_resource(cv.as_ref(), &access, &resource).unwrap());
        let by_value = policy(|o| o.resources_by_value = true);
        assert!(by_value.transfer_resource(cv.as_ref(), &access, &resource).unwrap());

        let local = policy(|o| o.local_resources_by_value = true);
        assert!(local.transfer_resource(cv.as_ref(), &access, &resource).unwrap());
        resource.relation = ResourceRelation::External;
        assert!(!local.transfer_resource(cv.as_ref(), &access, &resource).unwrap());

        let omitting = policy(|o| {
            o.resources_by_value = true;
            o.omit_artifact_types = vec!["ociImage".into()];
        });
        assert!(!omitting.transfer_resource(cv.as_ref(), &access, &resource).unwrap());
    }

    #[test]
    fn test_handle_transfer_resource_stores_local_blob() {
        let target = MemoryRepository::new("target");
        let comp = target.lookup_component("acme.org/app").unwrap();
        let tv = comp.new_version("1.0").unwrap();
        let access = AccessSpec::oci("ghcr.io/acme/app:1.0");
        let mut resource = Resource::new("image", "ociImage", access.clone());
        resource.digest = Some(DigestSpec::for_blob(b"image"));
        tv.set_resource(resource.clone()).unwrap();

        let method = BlobAccessMethod::new(access.clone(), "application/octet-stream", Arc::new(b"image".to_vec()));
        let p = policy(|o| o.keep_global_access = true);
        p.handle_transfer_resource(&resource, &method, Some("acme/app"), tv.as_ref())
            .unwrap();

        let stored = tv.descriptor().resources[0].clone();
        assert!(stored.access.is_local());
        match stored.access {
            AccessSpec::LocalBlob { global_access, reference_name, .. } => {
                assert_eq!(global_access.as_deref(), Some(&access));
                assert_eq!(reference_name.as_deref(), Some("acme/app"));
            }
            other => panic!("unexpected access {other}"),
        }
        assert_eq!(stored.digest, resource.digest);
        assert_eq!(target.blob_count(), 1);
    }

    #[test]
    fn test_handle_transfer_rejects_corrupt_content() {
        let target = MemoryRepository::new("target");
        let tv = target.lookup_component("acme.org/app").unwrap().new_version("1.0").unwrap();
        let access = AccessSpec::oci("ghcr.io/acme/app:1.0");
        let mut resource = Resource::new("image", "ociImage", access.clone());
        resource.digest = Some(DigestSpec::for_blob(b"expected"));
        let method = BlobAccessMethod::new(access, "application/octet-stream", Arc::new(b"tampered".to_vec()));
        let err = StandardPolicy::default()
            .handle_transfer_resource(&resource, &method, None, tv.as_ref())
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert_eq!(target.blob_count(), 0);
    }
}
