// src/merge/mod.rs

//! Two-way merge of a source descriptor into the target's existing copy
//!
//! The merged descriptor starts from the source and pulls in state only the
//! target has:
//!
//! - signatures present only in the target are kept; for a name present on
//!   both sides the target's signature stays untouched
//! - volatile labels present only in the target are kept; labels present on
//!   both sides are merged by their declared algorithm (source wins by
//!   default); signing labels are never merged
//! - elements matched by identity keep the target's access when the digests
//!   agree, and adopt the target's digest when the source has none
//!
//! An element identity bound to different types on the two sides cannot be
//! merged and fails the whole version.

pub mod handlers;

use tracing::debug;

use crate::descriptor::{ComponentDescriptor, Labels, Signature};
use crate::error::{Error, Result};
use handlers::MergeHandlerRegistry;

/// Merge `source` into `target` with the built-in merge algorithms
pub fn prepare_descriptor(
    source: &ComponentDescriptor,
    target: &ComponentDescriptor,
) -> Result<ComponentDescriptor> {
    prepare_descriptor_with(handlers::default_registry(), source, target)
}

/// Merge `source` into `target` using the given merge algorithm registry
pub fn prepare_descriptor_with(
    registry: &MergeHandlerRegistry,
    source: &ComponentDescriptor,
    target: &ComponentDescriptor,
) -> Result<ComponentDescriptor> {
    debug!("merging {} into existing target descriptor", source.id());
    let mut merged = source.clone();

    merged.labels = merge_labels(registry, &source.labels, &target.labels)
        .map_err(|e| context(e, "component labels"))?;
    merged.provider.labels =
        merge_labels(registry, &source.provider.labels, &target.provider.labels)
            .map_err(|e| context(e, "provider labels"))?;
    merged.signatures = merge_signatures(&source.signatures, &target.signatures);

    for resource in &mut merged.resources {
        let id = resource.identity();
        let Some(existing) = target.resource_by_identity(&id) else {
            continue;
        };
        if existing.kind != resource.kind {
            return Err(Error::MergeError(format!(
                "resource {} has type {} in target but {} in source",
                id, existing.kind, resource.kind
            )));
        }
        resource.meta.labels = merge_labels(registry, &resource.meta.labels, &existing.meta.labels)
            .map_err(|e| context(e, &format!("labels of resource {}", id)))?;
        match (&resource.digest, &existing.digest) {
            (Some(s), Some(t)) if s == t => resource.access = existing.access.clone(),
            (None, Some(t)) => {
                resource.digest = Some(t.clone());
                resource.access = existing.access.clone();
            }
            // target content stays; only the digest is new
            (Some(_), None) => resource.access = existing.access.clone(),
            _ => {}
        }
    }

    for src in &mut merged.sources {
        let id = src.identity();
        let Some(existing) = target.source_by_identity(&id) else {
            continue;
        };
        if existing.kind != src.kind {
            return Err(Error::MergeError(format!(
                "source {} has type {} in target but {} in source",
                id, existing.kind, src.kind
            )));
        }
        src.meta.labels = merge_labels(registry, &src.meta.labels, &existing.meta.labels)
            .map_err(|e| context(e, &format!("labels of source {}", id)))?;
        src.access = existing.access.clone();
    }

    for reference in &mut merged.references {
        let id = reference.identity();
        let Some(existing) = target.reference_by_identity(&id) else {
            continue;
        };
        if existing.component_name != reference.component_name {
            return Err(Error::MergeError(format!(
                "reference {} points to {} in target but {} in source",
                id, existing.component_name, reference.component_name
            )));
        }
        reference.meta.labels =
            merge_labels(registry, &reference.meta.labels, &existing.meta.labels)
                .map_err(|e| context(e, &format!("labels of reference {}", id)))?;
        if reference.digest.is_none() {
            reference.digest = existing.digest.clone();
        }
    }

    Ok(merged)
}

fn context(err: Error, what: &str) -> Error {
    match err {
        Error::MergeError(msg) => Error::MergeError(format!("{}: {}", what, msg)),
        other => other,
    }
}

/// Merge label lists, `source` being the transferred side
///
/// The result keeps the source labels in order, replaces the value of each
/// volatile label the target also carries by the merged value, and appends
/// volatile labels only the target has.
pub fn merge_labels(
    registry: &MergeHandlerRegistry,
    source: &Labels,
    target: &Labels,
) -> Result<Labels> {
    let mut merged = source.clone();

    for label in target.iter() {
        if label.signing {
            continue;
        }
        match merged.get_mut(&label.name) {
            None => merged.set(label.clone()),
            Some(existing) if existing.signing => {}
            Some(existing) => {
                if existing.value == label.value {
                    continue;
                }
                let spec = existing.merge.as_ref().or(label.merge.as_ref());
                let value = registry
                    .merge(spec, &existing.value, &label.value)
                    .map_err(|e| context(e, &format!("label {}", label.name)))?;
                if existing.merge.is_none() {
                    existing.merge = label.merge.clone();
                }
                existing.value = value;
            }
        }
    }
    Ok(merged)
}

/// Union of signatures by name
///
/// Signatures keep source order; a name already signed in the target keeps
/// the target's signature; target-only signatures are appended.
pub fn merge_signatures(source: &[Signature], target: &[Signature]) -> Vec<Signature> {
    let mut merged: Vec<Signature> = source
        .iter()
        .map(|s| {
            target
                .iter()
                .find(|t| t.name == s.name)
                .unwrap_or(s)
                .clone()
        })
        .collect();
    for sig in target {
        if !merged.iter().any(|m| m.name == sig.name) {
            merged.push(sig.clone());
        }
    }
    merged
}
