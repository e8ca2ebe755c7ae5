// src/descriptor/normalize.rs

//! Signature-relevant normalisation of descriptors
//!
//! The normalised form is canonical JSON (sorted object keys, no
//! whitespace) of the projection a signature covers: component identity,
//! provider name, signing labels, and per element its identity, type,
//! relation and digest. Access specs, volatile labels, creation time,
//! repository contexts and signatures are excluded, so changing them never
//! invalidates a signature.

use serde_json::{Map, Value, json};

use super::{
    ComponentDescriptor, DigestSpec, ElementMeta, JSON_NORMALISATION, Labels, Reference,
    Resource, Source,
};
use crate::error::Result;
use crate::hash::{self, HashAlgorithm};

fn signing_labels(labels: &Labels) -> Value {
    let mut list: Vec<Value> = labels
        .signing()
        .map(|l| {
            let mut entry = Map::new();
            entry.insert("name".to_string(), Value::String(l.name.clone()));
            entry.insert("value".to_string(), l.value.clone());
            if let Some(version) = &l.version {
                entry.insert("version".to_string(), Value::String(version.clone()));
            }
            Value::Object(entry)
        })
        .collect();
    list.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Value::Array(list)
}

fn element_meta(meta: &ElementMeta) -> Map<String, Value> {
    let mut entry = Map::new();
    entry.insert("name".to_string(), Value::String(meta.name.clone()));
    if let Some(version) = &meta.version {
        entry.insert("version".to_string(), Value::String(version.clone()));
    }
    if !meta.extra_identity.is_empty() {
        entry.insert("extraIdentity".to_string(), json!(meta.extra_identity));
    }
    entry.insert("labels".to_string(), signing_labels(&meta.labels));
    entry
}

fn digest(digest: Option<&DigestSpec>) -> Value {
    match digest {
        Some(d) => json!({
            "hashAlgorithm": d.hash_algorithm,
            "normalisationAlgorithm": d.normalisation_algorithm,
            "value": d.value,
        }),
        None => Value::Null,
    }
}

fn resource(r: &Resource) -> Value {
    let mut entry = element_meta(&r.meta);
    entry.insert("type".to_string(), Value::String(r.kind.clone()));
    entry.insert("relation".to_string(), json!(r.relation));
    if !r.access.is_none() {
        entry.insert("digest".to_string(), digest(r.digest.as_ref()));
    }
    Value::Object(entry)
}

fn source(s: &Source) -> Value {
    let mut entry = element_meta(&s.meta);
    entry.insert("type".to_string(), Value::String(s.kind.clone()));
    Value::Object(entry)
}

fn reference(r: &Reference) -> Value {
    let mut entry = element_meta(&r.meta);
    entry.insert(
        "componentName".to_string(),
        Value::String(r.component_name.clone()),
    );
    entry.insert("digest".to_string(), digest(r.digest.as_ref()));
    Value::Object(entry)
}

/// Elements are ordered by identity so list order does not affect the digest
fn sorted<T>(items: &[T], key: impl Fn(&T) -> String, project: impl Fn(&T) -> Value) -> Value {
    let mut pairs: Vec<(String, Value)> = items.iter().map(|i| (key(i), project(i))).collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Value::Array(pairs.into_iter().map(|(_, v)| v).collect())
}

/// Signature-relevant projection as a JSON value
pub fn normalized_value(cd: &ComponentDescriptor) -> Value {
    json!({
        "component": {
            "name": cd.name,
            "version": cd.version,
            "provider": {
                "name": cd.provider.name,
                "labels": signing_labels(&cd.provider.labels),
            },
            "labels": signing_labels(&cd.labels),
            "resources": sorted(&cd.resources, |r| r.identity().to_string(), resource),
            "sources": sorted(&cd.sources, |s| s.identity().to_string(), source),
            "references": sorted(&cd.references, |r| r.identity().to_string(), reference),
        }
    })
}

/// Canonical byte form of the signature-relevant projection
pub fn normalize(cd: &ComponentDescriptor) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&normalized_value(cd))?)
}

/// Digest of the normalised descriptor, as recorded in signatures
pub fn normalized_digest(cd: &ComponentDescriptor) -> Result<DigestSpec> {
    let bytes = normalize(cd)?;
    Ok(DigestSpec {
        hash_algorithm: HashAlgorithm::Sha256.name().to_string(),
        normalisation_algorithm: JSON_NORMALISATION.to_string(),
        value: hash::sha256(&bytes),
    })
}
