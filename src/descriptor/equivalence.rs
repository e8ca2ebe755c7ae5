// src/descriptor/equivalence.rs

//! Equivalence classification of two descriptors
//!
//! Comparing a source descriptor with the copy already present in a target
//! yields four independent facts:
//!
//! - **equivalent**: nothing at all differs, volatile content included
//! - **local hash equal**: every signature-relevant property that is stored
//!   in the descriptor itself (identities, types, signing labels) matches
//! - **artifact detectable**: every artifact digest is known on both sides
//! - **artifact equal**: every digest known on both sides matches
//!
//! Facts are combined component-wise with [`EqualState::apply`]. Access
//! specs and repository contexts never take part: they describe where the
//! content lives, not what it is.

use std::collections::BTreeSet;

use super::{
    ComponentDescriptor, DigestSpec, ElementMeta, Identity, Labels, Reference, Resource,
    Signature, Source,
};

/// Result of comparing two descriptors or parts of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqualState {
    equivalent: bool,
    local_hash_equal: bool,
    artifact_detectable: bool,
    artifact_equal: bool,
}

impl Default for EqualState {
    fn default() -> Self {
        Self::equivalent()
    }
}

impl EqualState {
    /// All facts hold
    pub const fn equivalent() -> Self {
        Self {
            equivalent: true,
            local_hash_equal: true,
            artifact_detectable: true,
            artifact_equal: true,
        }
    }

    /// Only volatile content differs
    pub const fn not_equivalent() -> Self {
        Self {
            equivalent: false,
            ..Self::equivalent()
        }
    }

    /// Signature-relevant local content matches or not
    pub const fn local_hash_equal(equal: bool) -> Self {
        Self {
            equivalent: equal,
            local_hash_equal: equal,
            artifact_detectable: true,
            artifact_equal: true,
        }
    }

    /// An artifact digest differs; `detectable` says whether both were known
    pub const fn not_artifact_equal(detectable: bool) -> Self {
        Self {
            equivalent: false,
            local_hash_equal: true,
            artifact_detectable: detectable,
            artifact_equal: false,
        }
    }

    /// A digest is missing on at least one side
    pub const fn not_detectable() -> Self {
        Self {
            artifact_detectable: false,
            ..Self::equivalent()
        }
    }

    /// Combine with another state (component-wise AND)
    #[must_use]
    pub const fn apply(self, other: EqualState) -> Self {
        Self {
            equivalent: self.equivalent && other.equivalent,
            local_hash_equal: self.local_hash_equal && other.local_hash_equal,
            artifact_detectable: self.artifact_detectable && other.artifact_detectable,
            artifact_equal: self.artifact_equal && other.artifact_equal,
        }
    }

    /// Same facts with `equivalent` cleared
    #[must_use]
    pub const fn and_not_equivalent(self) -> Self {
        self.apply(Self::not_equivalent())
    }

    /// Nothing differs: a transfer would be a no-op
    pub const fn is_equivalent(&self) -> bool {
        self.equivalent && self.is_hash_equal()
    }

    /// Nothing that would invalidate an existing signature differs
    pub const fn is_hash_equal(&self) -> bool {
        self.local_hash_equal && self.artifact_equal
    }

    pub const fn is_local_hash_equal(&self) -> bool {
        self.local_hash_equal
    }

    pub const fn is_artifact_detectable(&self) -> bool {
        self.artifact_detectable
    }

    pub const fn is_artifact_equal(&self) -> bool {
        self.artifact_equal
    }
}

/// Compare two optional artifact digests
///
/// A digest present on one side only cannot be compared; the merge adopts
/// it, so the pair still counts as hash equal.
pub fn digest_state(a: Option<&DigestSpec>, b: Option<&DigestSpec>) -> EqualState {
    match (a, b) {
        (Some(a), Some(b)) if a == b => EqualState::equivalent(),
        (Some(_), Some(_)) => EqualState::not_artifact_equal(true),
        (Some(_), None) | (None, Some(_)) => EqualState::not_detectable().and_not_equivalent(),
        (None, None) => EqualState::not_detectable(),
    }
}

impl Labels {
    /// Compare label sets by name
    ///
    /// Differences in signing labels break local hash equality; differences
    /// in volatile labels only break equivalence.
    pub fn equivalent(&self, other: &Labels) -> EqualState {
        let names: BTreeSet<&str> = self
            .iter()
            .chain(other.iter())
            .map(|l| l.name.as_str())
            .collect();

        let mut state = EqualState::equivalent();
        for name in names {
            let (a, b) = (self.get(name), other.get(name));
            if a == b {
                continue;
            }
            let signing = a.is_some_and(|l| l.signing) || b.is_some_and(|l| l.signing);
            state = if signing {
                state.apply(EqualState::local_hash_equal(false))
            } else {
                state.and_not_equivalent()
            };
        }
        state
    }
}

impl ElementMeta {
    /// Compare identity attributes and labels
    pub fn equivalent(&self, other: &ElementMeta) -> EqualState {
        EqualState::local_hash_equal(
            self.name == other.name
                && self.version == other.version
                && self.extra_identity == other.extra_identity,
        )
        .apply(self.labels.equivalent(&other.labels))
    }
}

impl Resource {
    pub fn equivalent(&self, other: &Resource) -> EqualState {
        let mut state =
            EqualState::local_hash_equal(self.kind == other.kind && self.relation == other.relation);
        if !(self.access.is_none() && other.access.is_none()) {
            state = state.apply(digest_state(self.digest.as_ref(), other.digest.as_ref()));
        }
        state.apply(self.meta.equivalent(&other.meta))
    }

    /// State when the resource has no counterpart on the other side
    fn missing(&self) -> EqualState {
        let state = EqualState::local_hash_equal(false);
        if self.access.is_none() || self.digest.is_none() {
            state
        } else {
            state.apply(EqualState::not_artifact_equal(false))
        }
    }
}

impl Source {
    pub fn equivalent(&self, other: &Source) -> EqualState {
        EqualState::local_hash_equal(self.kind == other.kind)
            .apply(self.meta.equivalent(&other.meta))
    }
}

impl Reference {
    pub fn equivalent(&self, other: &Reference) -> EqualState {
        let mut state = EqualState::local_hash_equal(self.component_name == other.component_name);
        match (&self.digest, &other.digest) {
            (Some(a), Some(b)) => state = state.apply(digest_state(Some(a), Some(b))),
            (None, None) => {}
            _ => state = state.and_not_equivalent(),
        }
        state.apply(self.meta.equivalent(&other.meta))
    }

    fn missing(&self) -> EqualState {
        let state = EqualState::local_hash_equal(false);
        if self.digest.is_some() {
            state.apply(EqualState::not_artifact_equal(false))
        } else {
            state
        }
    }
}

/// Compare two element lists matched by identity
fn equivalent_elements<T>(
    left: &[T],
    right: &[T],
    identity: impl Fn(&T) -> Identity,
    compare: impl Fn(&T, &T) -> EqualState,
    missing: impl Fn(&T) -> EqualState,
) -> EqualState {
    let mut state = EqualState::equivalent();
    for l in left {
        let id = identity(l);
        state = match right.iter().find(|r| identity(r) == id) {
            Some(r) => state.apply(compare(l, r)),
            None => state.apply(missing(l)),
        };
    }
    for r in right {
        let id = identity(r);
        if !left.iter().any(|l| identity(l) == id) {
            state = state.apply(missing(r));
        }
    }
    state
}

fn equivalent_signatures(left: &[Signature], right: &[Signature]) -> EqualState {
    let same = left.len() == right.len()
        && left
            .iter()
            .all(|s| right.iter().any(|o| o.name == s.name && o == s));
    if same {
        EqualState::equivalent()
    } else {
        EqualState::not_equivalent()
    }
}

impl ComponentDescriptor {
    /// Classify how far `other` (usually the target copy) reflects `self`
    pub fn equivalent(&self, other: &ComponentDescriptor) -> EqualState {
        let mut state = EqualState::local_hash_equal(
            self.name == other.name
                && self.version == other.version
                && self.provider.name == other.provider.name,
        );
        state = state
            .apply(self.provider.labels.equivalent(&other.provider.labels))
            .apply(self.labels.equivalent(&other.labels));
        if self.creation_time != other.creation_time {
            state = state.and_not_equivalent();
        }

        state = state
            .apply(equivalent_elements(
                &self.resources,
                &other.resources,
                Resource::identity,
                Resource::equivalent,
                Resource::missing,
            ))
            .apply(equivalent_elements(
                &self.sources,
                &other.sources,
                Source::identity,
                Source::equivalent,
                |_| EqualState::local_hash_equal(false),
            ))
            .apply(equivalent_elements(
                &self.references,
                &other.references,
                Reference::identity,
                Reference::equivalent,
                Reference::missing,
            ));

        state.apply(equivalent_signatures(&self.signatures, &other.signatures))
    }
}
