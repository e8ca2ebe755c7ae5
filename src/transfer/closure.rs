// src/transfer/closure.rs

//! Visited set of a top-level transfer and traversal history

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::descriptor::ComponentVersionId;

/// Chain of component versions leading to the one being transferred
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History(Vec<ComponentVersionId>);

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// This history extended by `id`
    pub fn with(&self, id: ComponentVersionId) -> Self {
        let mut next = self.0.clone();
        next.push(id);
        Self(next)
    }

    pub fn contains(&self, id: &ComponentVersionId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ComponentVersionId> {
        self.0.iter()
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "->")?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}

/// First visit of a component version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    /// Order of the visit within the transfer, starting at 1
    pub generation: u64,
    pub history: History,
}

#[derive(Debug, Default)]
struct ClosureState {
    generation: u64,
    visited: HashMap<ComponentVersionId, Visit>,
}

/// Component versions already handled by one top-level transfer
///
/// A version is entered before it is decided on, so cycles and diamonds in
/// the reference graph transfer each version once.
#[derive(Debug, Default)]
pub struct TransferClosure {
    state: Mutex<ClosureState>,
}

impl TransferClosure {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClosureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enter `id` reached via `history`; false when it was entered before
    pub fn add(&self, id: &ComponentVersionId, history: &History) -> bool {
        let mut state = self.lock();
        if state.visited.contains_key(id) {
            return false;
        }
        state.generation += 1;
        let visit = Visit {
            generation: state.generation,
            history: history.clone(),
        };
        state.visited.insert(id.clone(), visit);
        true
    }

    pub fn contains(&self, id: &ComponentVersionId) -> bool {
        self.lock().visited.contains_key(id)
    }

    /// How `id` was first reached
    pub fn first_visit(&self, id: &ComponentVersionId) -> Option<Visit> {
        self.lock().visited.get(id).cloned()
    }

    /// Entered versions in visit order
    pub fn visited(&self) -> Vec<ComponentVersionId> {
        let state = self.lock();
        let mut entries: Vec<_> = state.visited.iter().collect();
        entries.sort_by_key(|(_, v)| v.generation);
        entries.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().visited.is_empty()
    }
}
