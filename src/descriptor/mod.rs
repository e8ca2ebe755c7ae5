// src/descriptor/mod.rs

//! Component descriptor model
//!
//! A [`ComponentDescriptor`] describes one component version: its identity,
//! provider, the resources and sources it ships, references to other
//! component versions, and the signatures covering its normalised form.
//!
//! Element identities (name plus extra identity) must be unique within each
//! list. Descriptors are serialised as camelCase JSON.

pub mod access;
pub mod equivalence;
pub mod identity;
pub mod label;
pub mod normalize;

pub use access::AccessSpec;
pub use equivalence::EqualState;
pub use identity::{ComponentVersionId, Identity};
pub use label::{Label, Labels, MergeAlgorithmSpec};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm};

/// Normalisation algorithm name for plain blob digests
pub const GENERIC_BLOB_DIGEST: &str = "genericBlobDigest/v1";

/// Normalisation algorithm name for descriptor digests
pub const JSON_NORMALISATION: &str = "jsonNormalisation/v1";

/// Digest of a blob or a normalised descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSpec {
    pub hash_algorithm: String,
    pub normalisation_algorithm: String,
    pub value: String,
}

impl DigestSpec {
    /// SHA-256 digest of raw blob content
    pub fn for_blob(data: &[u8]) -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256.name().to_string(),
            normalisation_algorithm: GENERIC_BLOB_DIGEST.to_string(),
            value: hash::sha256(data),
        }
    }

    /// Verify blob content against this digest
    ///
    /// Digests with a normalisation other than the generic blob digest cannot
    /// be recomputed from the bytes alone and are accepted as-is.
    pub fn verify_blob(&self, data: &[u8]) -> Result<()> {
        if self.normalisation_algorithm != GENERIC_BLOB_DIGEST {
            return Ok(());
        }
        let algorithm: HashAlgorithm = self
            .hash_algorithm
            .parse()
            .map_err(|e| Error::ValidationError(format!("digest of blob: {}", e)))?;
        hash::verify_bytes(data, &self.value, algorithm)?;
        Ok(())
    }
}

impl fmt::Display for DigestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}",
            self.hash_algorithm, self.normalisation_algorithm, self.value
        )
    }
}

/// Location of a repository a descriptor has been stored in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositorySpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
}

impl RepositorySpec {
    pub fn new(kind: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for RepositorySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.kind, self.location)
    }
}

/// Provider of a component
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// Metadata shared by resources, sources, and references
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

impl ElementMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Local identity of the element
    pub fn identity(&self) -> Identity {
        Identity::with_extra(&self.name, &self.extra_identity)
    }
}

/// Relation of a resource to the component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceRelation {
    /// Built by the component provider
    #[default]
    Local,
    /// Third-party artifact
    External,
}

/// Artifact delivered with a component version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(flatten)]
    pub meta: ElementMeta,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub relation: ResourceRelation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSpec>,
    pub access: AccessSpec,
}

impl Resource {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, access: AccessSpec) -> Self {
        Self {
            meta: ElementMeta::new(name),
            kind: kind.into(),
            relation: ResourceRelation::Local,
            digest: None,
            access,
        }
    }

    pub fn identity(&self) -> Identity {
        self.meta.identity()
    }
}

/// Source an artifact was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(flatten)]
    pub meta: ElementMeta,
    #[serde(rename = "type")]
    pub kind: String,
    pub access: AccessSpec,
}

impl Source {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, access: AccessSpec) -> Self {
        Self {
            meta: ElementMeta::new(name),
            kind: kind.into(),
            access,
        }
    }

    pub fn identity(&self) -> Identity {
        self.meta.identity()
    }
}

/// Pointer to another component version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(flatten)]
    pub meta: ElementMeta,
    pub component_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSpec>,
}

impl Reference {
    /// Reference named `name` to `component_name` at `version`
    pub fn new(
        name: impl Into<String>,
        component_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let mut meta = ElementMeta::new(name);
        meta.version = Some(version.into());
        Self {
            meta,
            component_name: component_name.into(),
            digest: None,
        }
    }

    pub fn identity(&self) -> Identity {
        self.meta.identity()
    }

    /// Id of the referenced component version
    pub fn target_id(&self) -> ComponentVersionId {
        ComponentVersionId::new(
            self.component_name.clone(),
            self.meta.version.clone().unwrap_or_default(),
        )
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.meta.name, self.target_id())
    }
}

/// Signature value and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSpec {
    pub algorithm: String,
    pub value: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Named signature over the normalised descriptor digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub digest: DigestSpec,
    pub signature: SignatureSpec,
}

/// Descriptor of one component version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repository_contexts: Vec<RepositorySpec>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Signature>,
}

impl ComponentDescriptor {
    /// Empty descriptor for `name:version`
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            provider: Provider::default(),
            labels: Labels::new(),
            creation_time: None,
            repository_contexts: Vec::new(),
            resources: Vec::new(),
            sources: Vec::new(),
            references: Vec::new(),
            signatures: Vec::new(),
        }
    }

    pub fn id(&self) -> ComponentVersionId {
        ComponentVersionId::new(self.name.clone(), self.version.clone())
    }

    pub fn resource_by_identity(&self, id: &Identity) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.identity() == id)
    }

    pub fn resource_by_identity_mut(&mut self, id: &Identity) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| &r.identity() == id)
    }

    pub fn source_by_identity(&self, id: &Identity) -> Option<&Source> {
        self.sources.iter().find(|s| &s.identity() == id)
    }

    pub fn source_by_identity_mut(&mut self, id: &Identity) -> Option<&mut Source> {
        self.sources.iter_mut().find(|s| &s.identity() == id)
    }

    pub fn reference_by_identity(&self, id: &Identity) -> Option<&Reference> {
        self.references.iter().find(|r| &r.identity() == id)
    }

    pub fn signature_by_name(&self, name: &str) -> Option<&Signature> {
        self.signatures.iter().find(|s| s.name == name)
    }

    /// Insert or replace a signature by name
    pub fn set_signature(&mut self, signature: Signature) {
        match self.signatures.iter_mut().find(|s| s.name == signature.name) {
            Some(existing) => *existing = signature,
            None => self.signatures.push(signature),
        }
    }

    /// Insert or replace a resource by identity
    pub fn set_resource(&mut self, resource: Resource) {
        let id = resource.identity();
        match self.resource_by_identity_mut(&id) {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    /// Insert or replace a source by identity
    pub fn set_source(&mut self, source: Source) {
        let id = source.identity();
        match self.source_by_identity_mut(&id) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    /// Check the model invariants
    ///
    /// Names must be non-empty, element identities unique per list, and
    /// label and signature names unique.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::ValidationError("component name is empty".to_string()));
        }
        if self.version.is_empty() {
            return Err(Error::ValidationError(format!(
                "component {} has no version",
                self.name
            )));
        }
        check_unique("resource", self.resources.iter().map(Resource::identity))?;
        check_unique("source", self.sources.iter().map(Source::identity))?;
        check_unique("reference", self.references.iter().map(Reference::identity))?;

        let mut label_sets: Vec<(&str, &Labels)> = vec![
            ("component", &self.labels),
            ("provider", &self.provider.labels),
        ];
        label_sets.extend(self.resources.iter().map(|r| (r.meta.name.as_str(), &r.meta.labels)));
        label_sets.extend(self.sources.iter().map(|s| (s.meta.name.as_str(), &s.meta.labels)));
        label_sets.extend(self.references.iter().map(|r| (r.meta.name.as_str(), &r.meta.labels)));
        for (owner, labels) in label_sets {
            if let Some(dup) = labels.duplicates().first() {
                return Err(Error::ValidationError(format!(
                    "duplicate label {} on {}",
                    dup, owner
                )));
            }
        }

        let mut names = HashSet::new();
        for sig in &self.signatures {
            if !names.insert(sig.name.as_str()) {
                return Err(Error::ValidationError(format!(
                    "duplicate signature {}",
                    sig.name
                )));
            }
        }
        Ok(())
    }

    /// Serialise as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

fn check_unique(kind: &str, ids: impl Iterator<Item = Identity>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.name().is_empty() {
            return Err(Error::ValidationError(format!("{} without name", kind)));
        }
        if !seen.insert(id.clone()) {
            return Err(Error::ValidationError(format!(
                "duplicate {} identity {}",
                kind, id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ComponentDescriptor {
        let mut cd = ComponentDescriptor::new("acme.org/app", "1.0.0");
        cd.provider.name = "acme".to_string();
        let mut res = Resource::new(
            "image",
            "ociImage",
            AccessSpec::oci("ghcr.io/acme/app:1.0.0"),
        );
        res.digest = Some(DigestSpec::for_blob(b"image"));
        cd.resources.push(res);
        cd.sources.push(Source::new(
            "repo",
            "git",
            AccessSpec::local_blob("sha256:00", "application/x-tar"),
        ));
        cd.references
            .push(Reference::new("lib", "acme.org/lib", "2.0.0"));
        cd
    }

    #[test]
    fn test_validate_accepts_sample() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_identity() {
        let mut cd = sample();
        let dup = cd.resources[0].clone();
        cd.resources.push(dup);
        let err = cd.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate resource identity image"));

        // extra identity makes them distinct
        cd.resources[1]
            .meta
            .extra_identity
            .insert("arch".to_string(), "arm64".to_string());
        assert!(cd.validate().is_ok());
    }

    #[test]
    fn test_json_shape() {
        let cd = sample();
        let json = serde_json::to_value(&cd).unwrap();
        assert_eq!(json["resources"][0]["type"], "ociImage");
        assert_eq!(json["resources"][0]["relation"], "local");
        assert_eq!(json["references"][0]["componentName"], "acme.org/lib");
        assert!(json.get("signatures").is_none());

        let back = ComponentDescriptor::from_json(&cd.to_json().unwrap()).unwrap();
        assert_eq!(back, cd);
    }

    #[test]
    fn test_set_resource_replaces_by_identity() {
        let mut cd = sample();
        let mut res = cd.resources[0].clone();
        res.access = AccessSpec::local_blob("sha256:11", "application/octet-stream");
        cd.set_resource(res);
        assert_eq!(cd.resources.len(), 1);
        assert!(cd.resources[0].access.is_local());
    }

    #[test]
    fn test_digest_verify_blob() {
        let digest = DigestSpec::for_blob(b"content");
        assert!(digest.verify_blob(b"content").is_ok());
        assert!(matches!(
            digest.verify_blob(b"other"),
            Err(Error::ChecksumMismatch { .. })
        ));
    }
}
