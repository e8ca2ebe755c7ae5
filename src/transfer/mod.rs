// src/transfer/mod.rs

//! Component version transfer
//!
//! Replicates a component version, and depending on the policy its
//! referenced versions, from one repository into another. For each version:
//!
//! 1. enter it into the closure (cycles and shared references are visited once)
//! 2. look it up in the target and classify an existing copy
//! 3. decide: skip, update volatile data only, overwrite, or reject
//! 4. transfer references depth-first, before the version itself
//! 5. finalize: merge or replace the descriptor, copy content, commit
//!
//! Policies decide the open questions; see [`crate::policy`]. Progress goes
//! to a [`Printer`](crate::printer::Printer), diagnostics to `tracing`.

pub mod closure;
pub mod copy;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::descriptor::{ComponentDescriptor, EqualState};
use crate::error::{Error, ErrorList, Result};
use crate::merge::prepare_descriptor;
use crate::policy::options::{OperationOptions, TransferOption};
use crate::policy::{TransferPolicy, new_transfer_handler};
use crate::printer::{self, SharedPrinter};
use crate::repository::{ComponentVersionAccess, Repository};

pub use closure::{History, TransferClosure};
pub use copy::{DEFAULT_WORKERS, WORKERS_ENV, needs_transport, parse_workers, workers_from_env};

/// Transfer session carrying the progress printer and the copy pool width
#[derive(Clone)]
pub struct Transfer {
    printer: SharedPrinter,
    workers: usize,
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transfer {
    /// Silent session with the worker count from the environment
    pub fn new() -> Self {
        Self {
            printer: printer::silent(),
            workers: workers_from_env(),
        }
    }

    pub fn with_printer(mut self, printer: SharedPrinter) -> Self {
        self.printer = printer;
        self
    }

    /// Set the copy pool width; zero keeps the current width
    pub fn with_workers(mut self, workers: usize) -> Self {
        if workers > 0 {
            self.workers = workers;
        }
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Transfer `src` into `target` with a fresh closure
    pub fn transfer_version(
        &self,
        src: &dyn ComponentVersionAccess,
        target: &Arc<dyn Repository>,
        policy: Arc<dyn TransferPolicy>,
    ) -> Result<()> {
        let closure = TransferClosure::new();
        self.transfer_version_in(&closure, src, target, policy)
    }

    /// Transfer `src` into `target`, sharing `closure` with earlier calls
    pub fn transfer_version_in(
        &self,
        closure: &TransferClosure,
        src: &dyn ComponentVersionAccess,
        target: &Arc<dyn Repository>,
        policy: Arc<dyn TransferPolicy>,
    ) -> Result<()> {
        let walker = Walker {
            printer: &self.printer,
            closure,
            workers: self.workers,
        };
        walker.transfer(&History::new(), src, target, &policy)
    }

    /// Copy the content of `src` into an opened target version
    ///
    /// The target descriptor is replaced by the source descriptor; nothing is
    /// committed.
    pub fn copy_version(
        &self,
        src: &dyn ComponentVersionAccess,
        target: &dyn ComponentVersionAccess,
        policy: &dyn TransferPolicy,
    ) -> Result<()> {
        let history = History::new().with(src.id());
        copy::copy_version_with_pool(
            &self.printer,
            &history,
            src,
            target,
            src.descriptor(),
            policy,
            self.workers,
        )
    }
}

/// Transfer `src` into `target` using `closure` to skip versions already handled
pub fn transfer_version(
    printer: &SharedPrinter,
    closure: &TransferClosure,
    src: &dyn ComponentVersionAccess,
    target: &Arc<dyn Repository>,
    policy: Arc<dyn TransferPolicy>,
) -> Result<()> {
    Transfer::new()
        .with_printer(Arc::clone(printer))
        .transfer_version_in(closure, src, target, policy)
}

/// Copy the content of `src` into an opened target version
pub fn copy_version(
    printer: &SharedPrinter,
    src: &dyn ComponentVersionAccess,
    target: &dyn ComponentVersionAccess,
    policy: &dyn TransferPolicy,
) -> Result<()> {
    Transfer::new()
        .with_printer(Arc::clone(printer))
        .copy_version(src, target, policy)
}

/// Transfer `src` into `target` with a policy built from `options`
///
/// Untagged options (printer, workers) configure the session.
pub fn transfer(
    src: &dyn ComponentVersionAccess,
    target: &Arc<dyn Repository>,
    options: &[Box<dyn TransferOption>],
) -> Result<()> {
    let policy = new_transfer_handler(options)?;
    let ops = OperationOptions::from_options(options)?;
    let mut session = Transfer::new();
    if let Some(printer) = ops.printer {
        session = session.with_printer(printer);
    }
    if let Some(workers) = ops.workers {
        session = session.with_workers(workers);
    }
    session.transfer_version(src, target, policy)
}

/// What to do with a version after classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    transport: bool,
    merge: bool,
    copy: bool,
}

impl Plan {
    const FULL: Plan = Plan {
        transport: true,
        merge: false,
        copy: true,
    };
}

/// Why an existing target version conflicts with the source
fn conflict_reason(eq: &EqualState) -> &'static str {
    match (
        eq.is_local_hash_equal(),
        eq.is_artifact_detectable(),
        eq.is_artifact_equal(),
    ) {
        (true, true, _) => "differs because some artifact digests are changed",
        (true, false, _) => "might differ, because not all artifact digests are known",
        (false, true, true) => "differs because signature relevant properties have been changed",
        (false, true, false) => {
            "differs because some artifacts and signature relevant properties have been changed"
        }
        (false, false, _) => {
            "differs because signature relevant properties have been changed (and not all artifact digests are known)"
        }
    }
}

struct Walker<'a> {
    printer: &'a SharedPrinter,
    closure: &'a TransferClosure,
    workers: usize,
}

impl Walker<'_> {
    fn print(&self, line: String) {
        self.printer.print_line(&line);
    }

    /// Classify an existing target version; `None` aborts the version
    fn classify(
        &self,
        history: &History,
        src: &dyn ComponentVersionAccess,
        source: &ComponentDescriptor,
        tv: &dyn ComponentVersionAccess,
        policy: &Arc<dyn TransferPolicy>,
    ) -> Result<Option<Plan>> {
        let id = src.id();
        let asked = |e: Error| e.within(history, "deciding on existing target version");
        if policy.enforce_transport(src, tv).map_err(asked)? {
            debug!(history = %history, "transport enforced for existing version");
            return Ok(Some(Plan::FULL));
        }

        let current = tv.descriptor();
        let eq = source.equivalent(&current);
        if eq.is_hash_equal() {
            if eq.is_equivalent() {
                if !needs_transport(policy.as_ref(), src, source, &current).map_err(asked)? {
                    self.print(format!("  version \"{}\" already present -> skip transport", id));
                    return Ok(Some(Plan {
                        transport: false,
                        ..Plan::FULL
                    }));
                }
                self.print(format!(
                    "  version \"{}\" already present -> but requires resource transport",
                    id
                ));
                return Ok(Some(Plan::FULL));
            }

            if !policy.update_version(src, tv).map_err(asked)? {
                self.print(format!(
                    "  version \"{}\" requires update of volatile data, but skipped",
                    id
                ));
                return Ok(None);
            }
            if policy.overwrite_version(src, tv).map_err(asked)? {
                self.print(format!(
                    "  warning: version \"{}\" already present, but transport enforced by overwrite option",
                    id
                ));
                return Ok(Some(Plan::FULL));
            }
            self.print(format!("  updating volatile properties of \"{}\"", id));
            return Ok(Some(Plan {
                transport: true,
                merge: true,
                copy: false,
            }));
        }

        let msg = format!(
            "version \"{}\" already present, but {}",
            id,
            conflict_reason(&eq)
        );
        if policy.overwrite_version(src, tv).map_err(asked)? {
            warn!(history = %history, "{}, overwriting", msg);
            self.print(format!(
                "  warning: {} (transport enforced by overwrite option)",
                msg
            ));
            return Ok(Some(Plan::FULL));
        }
        self.print(format!(
            "  {} -> transport aborted (use option overwrite option to enforce transport)",
            msg
        ));
        Err(Error::Conflict(id.to_string()).within(history, "checking existing target version"))
    }

    fn transfer(
        &self,
        history: &History,
        src: &dyn ComponentVersionAccess,
        target: &Arc<dyn Repository>,
        policy: &Arc<dyn TransferPolicy>,
    ) -> Result<()> {
        let id = src.id();
        if !self.closure.add(&id, history) {
            debug!(history = %history, version = %id, "version already handled");
            return Ok(());
        }
        let history = history.with(id.clone());
        info!(history = %history, version = %id, "transferring version");
        self.print(format!("transferring version \"{}\"...", id));

        let source = src.descriptor();
        let comp = target
            .lookup_component(&id.name)
            .map_err(|e| e.within(&history, "lookup target component"))?;
        let (tv, plan) = match comp.lookup_version(&id.version) {
            Ok(tv) => match self.classify(&history, src, &source, tv.as_ref(), policy)? {
                Some(plan) => (tv, plan),
                None => return Ok(()),
            },
            Err(e) if e.is_not_found() => {
                let tv = comp
                    .new_version(&id.version)
                    .map_err(|e| e.within(&history, "creating target version"))?;
                (tv, Plan::FULL)
            }
            Err(e) => return Err(e.within(&history, "lookup target version")),
        };

        let repo = src.repository();
        let mut errors = ErrorList::new(format!("component references for {}", id));
        for reference in &source.references {
            let context = format!(
                "nested component {}[{}]",
                reference.meta.name,
                reference.target_id()
            );
            match policy.transfer_version(&repo, src, reference, target) {
                Err(e) => errors.push(e.within(&history, context)),
                Ok(None) => {
                    debug!(history = %history, reference = %reference.meta.name, "reference not transferred");
                }
                Ok(Some(resolved)) => {
                    let nested = resolved.policy.unwrap_or_else(|| Arc::clone(policy));
                    let result = self.transfer(&history, resolved.version.as_ref(), target, &nested);
                    errors.add(result.map_err(|e| e.within(&history, context)));
                }
            }
        }
        errors.result()?;

        if !plan.transport {
            return Ok(());
        }

        let mut prepared = if plan.merge {
            info!(history = %history, "applying 2-way merge");
            prepare_descriptor(&source, &tv.descriptor())
                .map_err(|e| e.within(&history, "merging descriptor"))?
        } else {
            source.clone()
        };
        if target.is_durable() {
            let spec = target.specification();
            if !prepared.repository_contexts.contains(&spec) {
                prepared.repository_contexts.push(spec);
            }
        }

        if !plan.merge || plan.copy {
            copy::copy_version_with_pool(
                self.printer,
                &history,
                src,
                tv.as_ref(),
                prepared,
                policy.as_ref(),
                self.workers,
            )?;
        } else {
            tv.set_descriptor(prepared);
        }

        self.print("...adding component version...".to_string());
        info!(history = %history, "adding component version");
        comp.add_version(tv.as_ref())
            .map_err(|e| e.within(&history, "adding component version"))
    }
}
