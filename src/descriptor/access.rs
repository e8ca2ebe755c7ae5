// src/descriptor/access.rs

//! Access specifications: where the bytes of a resource or source live

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access type name of [`AccessSpec::LocalBlob`]
pub const LOCAL_BLOB: &str = "localBlob";
/// Access type name of [`AccessSpec::OciArtifact`]
pub const OCI_ARTIFACT: &str = "ociArtifact";
/// Access type name of [`AccessSpec::Helm`]
pub const HELM: &str = "helm";
/// Access type name of [`AccessSpec::NoAccess`]
pub const NONE: &str = "none";

/// Polymorphic content pointer of a resource or source
///
/// Only `localBlob` is stored inside the owning repository; every other
/// variant refers to an external location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccessSpec {
    /// Blob stored in the repository owning the component version
    #[serde(rename = "localBlob", rename_all = "camelCase")]
    LocalBlob {
        /// Repository-local blob key (`sha256:<hex>`)
        local_reference: String,
        media_type: String,
        /// Name under which the blob was published, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference_name: Option<String>,
        /// External location the blob was imported from
        #[serde(default, skip_serializing_if = "Option::is_none")]
        global_access: Option<Box<AccessSpec>>,
    },

    /// OCI image or artifact in a registry
    #[serde(rename = "ociArtifact", rename_all = "camelCase")]
    OciArtifact { image_reference: String },

    /// Chart in a helm repository
    #[serde(rename = "helm", rename_all = "camelCase")]
    Helm {
        helm_repository: String,
        helm_chart: String,
    },

    /// Element without accessible content
    #[serde(rename = "none")]
    NoAccess,
}

impl AccessSpec {
    /// Local blob access without publishing hints
    pub fn local_blob(local_reference: impl Into<String>, media_type: impl Into<String>) -> Self {
        AccessSpec::LocalBlob {
            local_reference: local_reference.into(),
            media_type: media_type.into(),
            reference_name: None,
            global_access: None,
        }
    }

    /// OCI artifact access
    pub fn oci(image_reference: impl Into<String>) -> Self {
        AccessSpec::OciArtifact {
            image_reference: image_reference.into(),
        }
    }

    /// Access type name as used in descriptors
    pub fn kind(&self) -> &'static str {
        match self {
            AccessSpec::LocalBlob { .. } => LOCAL_BLOB,
            AccessSpec::OciArtifact { .. } => OCI_ARTIFACT,
            AccessSpec::Helm { .. } => HELM,
            AccessSpec::NoAccess => NONE,
        }
    }

    /// Check whether the content is stored in the owning repository
    pub fn is_local(&self) -> bool {
        matches!(self, AccessSpec::LocalBlob { .. })
    }

    /// Check whether the element has no content
    pub fn is_none(&self) -> bool {
        matches!(self, AccessSpec::NoAccess)
    }

    /// Naming hint for the artifact when it is stored by value in a target
    ///
    /// Local blobs keep their published name; external artifacts are named
    /// after their repository path (registry host stripped).
    pub fn reference_hint(&self) -> Option<String> {
        match self {
            AccessSpec::LocalBlob {
                reference_name,
                global_access,
                ..
            } => reference_name
                .clone()
                .or_else(|| global_access.as_ref().and_then(|g| g.reference_hint())),
            AccessSpec::OciArtifact { image_reference } => {
                let path = match image_reference.split_once('/') {
                    Some((host, rest)) if host.contains('.') || host.contains(':') => rest,
                    _ => image_reference.as_str(),
                };
                Some(path.to_string())
            }
            AccessSpec::Helm { helm_chart, .. } => Some(helm_chart.clone()),
            AccessSpec::NoAccess => None,
        }
    }

    /// Stable key identifying the external location of a non-local access
    pub fn location_key(&self) -> String {
        match self {
            AccessSpec::LocalBlob {
                local_reference, ..
            } => format!("{}/{}", LOCAL_BLOB, local_reference),
            AccessSpec::OciArtifact { image_reference } => {
                format!("{}/{}", OCI_ARTIFACT, image_reference)
            }
            AccessSpec::Helm {
                helm_repository,
                helm_chart,
            } => format!("{}/{}/{}", HELM, helm_repository, helm_chart),
            AccessSpec::NoAccess => NONE.to_string(),
        }
    }
}

impl fmt::Display for AccessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location_key())
    }
}
