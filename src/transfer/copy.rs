// src/transfer/copy.rs

//! Copy engine
//!
//! Copies the content of a version's resources and sources into the target
//! version on a bounded worker pool. The pool is created for one version
//! and torn down with it. Every task runs to completion; failures are
//! collected and reported together.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::descriptor::{AccessSpec, ComponentDescriptor, Resource, Source};
use crate::error::{Error, ErrorList, Result};
use crate::policy::TransferPolicy;
use crate::printer::SharedPrinter;
use crate::repository::ComponentVersionAccess;
use crate::transfer::closure::History;

/// Default width of the per-version copy pool
pub const DEFAULT_WORKERS: usize = 5;

/// Environment variable overriding the copy pool width
pub const WORKERS_ENV: &str = "CVTRANSFER_TRANSFER_WORKERS";

/// Parse a worker count; only positive integers are accepted
pub fn parse_workers(value: Option<&str>) -> Option<usize> {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
}

/// Worker count from the environment, falling back to [`DEFAULT_WORKERS`]
pub fn workers_from_env() -> usize {
    parse_workers(std::env::var(WORKERS_ENV).ok().as_deref()).unwrap_or(DEFAULT_WORKERS)
}

enum CopyTask<'a> {
    Resource(usize, &'a Resource),
    Source(usize, &'a Source),
}

/// Print the progress line for one artifact
fn notify_artifact(
    printer: &SharedPrinter,
    kind: &str,
    index: usize,
    name: &str,
    artifact_type: &str,
    hint: Option<&str>,
    msg: Option<&str>,
) {
    let suffix = msg.map_or_else(|| "...".to_string(), |m| format!(" ({})", m));
    let line = match hint {
        Some(hint) => format!("...{} {} {}[{}]({}){}", kind, index, name, artifact_type, hint, suffix),
        None => format!("...{} {} {}[{}]{}", kind, index, name, artifact_type, suffix),
    };
    printer.print_line(&line);
    debug!(
        "handle artifact {} {} {}[{}]: {}",
        kind,
        index,
        name,
        artifact_type,
        msg.unwrap_or("copying")
    );
}

/// Will the content behind `access` be copied?
///
/// Local content always travels with the version; content without access
/// never does; everything else is up to the policy.
fn resource_by_value(
    policy: &dyn TransferPolicy,
    src: &dyn ComponentVersionAccess,
    access: &AccessSpec,
    resource: &Resource,
) -> Result<bool> {
    if access.is_local() {
        return Ok(true);
    }
    if access.is_none() {
        return Ok(false);
    }
    policy.transfer_resource(src, access, resource)
}

fn source_by_value(
    policy: &dyn TransferPolicy,
    src: &dyn ComponentVersionAccess,
    access: &AccessSpec,
    source: &Source,
) -> Result<bool> {
    if access.is_local() {
        return Ok(true);
    }
    if access.is_none() {
        return Ok(false);
    }
    policy.transfer_source(src, access, source)
}

/// Does any element of `source` still need its content moved into `target`?
///
/// True when the policy would copy an element's value and the target holds
/// no local copy of it.
pub fn needs_transport(
    policy: &dyn TransferPolicy,
    src: &dyn ComponentVersionAccess,
    source: &ComponentDescriptor,
    target: &ComponentDescriptor,
) -> Result<bool> {
    for resource in &source.resources {
        if !resource_by_value(policy, src, &resource.access, resource)? {
            continue;
        }
        match target.resource_by_identity(&resource.identity()) {
            Some(existing) if existing.access.is_local() => {}
            _ => return Ok(true),
        }
    }
    for s in &source.sources {
        if !source_by_value(policy, src, &s.access, s)? {
            continue;
        }
        match target.source_by_identity(&s.identity()) {
            Some(existing) if existing.access.is_local() => {}
            _ => return Ok(true),
        }
    }
    Ok(false)
}

struct CopyContext<'a> {
    printer: &'a SharedPrinter,
    history: &'a History,
    src: &'a dyn ComponentVersionAccess,
    target: &'a dyn ComponentVersionAccess,
    policy: &'a dyn TransferPolicy,
    /// Target descriptor before the prepared one was installed
    current: &'a ComponentDescriptor,
}

impl CopyContext<'_> {
    fn run(&self, task: &CopyTask<'_>) -> Result<()> {
        match task {
            CopyTask::Resource(index, resource) => self
                .copy_resource(*index, resource)
                .map_err(|e| e.within(self.history, format!("transferring resource {}", index))),
            CopyTask::Source(index, source) => self
                .copy_source(*index, source)
                .map_err(|e| e.within(self.history, format!("transferring source {}", index))),
        }
    }

    fn copy_resource(&self, index: usize, resource: &Resource) -> Result<()> {
        let access = &resource.access;
        if !resource_by_value(self.policy, self.src, access, resource)? {
            return Ok(());
        }
        let hint = access.reference_hint();
        let old = self.current.resource_by_identity(&resource.identity());
        let changed = old.is_none_or(|o| o.digest.is_none() || o.digest != resource.digest);
        let value_needed = old.is_some_and(|o| !o.access.is_local());

        if changed || value_needed {
            let method = self.src.access_method(access)?;
            notify_artifact(
                self.printer,
                "resource",
                index,
                &resource.meta.name,
                &resource.kind,
                hint.as_deref(),
                Some("copy"),
            );
            return self.policy.handle_transfer_resource(
                resource,
                method.as_ref(),
                hint.as_deref(),
                self.target,
            );
        }
        if let Some(old) = old {
            let mut present = resource.clone();
            present.access = old.access.clone();
            self.target.set_resource(present)?;
            notify_artifact(
                self.printer,
                "resource",
                index,
                &resource.meta.name,
                &resource.kind,
                hint.as_deref(),
                Some("already present"),
            );
        }
        Ok(())
    }

    fn copy_source(&self, index: usize, source: &Source) -> Result<()> {
        let access = &source.access;
        if !source_by_value(self.policy, self.src, access, source)? {
            return Ok(());
        }
        let method = self.src.access_method(access)?;
        let hint = access.reference_hint();
        notify_artifact(
            self.printer,
            "source",
            index,
            &source.meta.name,
            &source.kind,
            hint.as_deref(),
            None,
        );
        self.policy
            .handle_transfer_source(source, method.as_ref(), hint.as_deref(), self.target)
    }
}

/// Install `prepared` as the target descriptor and copy artifact content
///
/// Resources whose digest the target already holds locally are not copied
/// again; their target access is kept.
pub fn copy_version_with_pool(
    printer: &SharedPrinter,
    history: &History,
    src: &dyn ComponentVersionAccess,
    target: &dyn ComponentVersionAccess,
    prepared: ComponentDescriptor,
    policy: &dyn TransferPolicy,
    workers: usize,
) -> Result<()> {
    let source = src.descriptor();
    let current = target.descriptor();
    target.set_descriptor(prepared);

    let tasks: Vec<CopyTask<'_>> = source
        .resources
        .iter()
        .enumerate()
        .map(|(i, r)| CopyTask::Resource(i, r))
        .chain(
            source
                .sources
                .iter()
                .enumerate()
                .map(|(i, s)| CopyTask::Source(i, s)),
        )
        .collect();
    if tasks.is_empty() {
        return Ok(());
    }

    let workers = workers.max(1);
    info!(
        "  transferring {} resources and sources of {} using {} workers",
        tasks.len(),
        src.id(),
        workers
    );
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("cvtransfer-copy-{}", i))
        .build()
        .map_err(|e| Error::IoError(format!("cannot start copy worker pool: {}", e)))?;

    let ctx = CopyContext {
        printer,
        history,
        src,
        target,
        policy,
        current: &current,
    };
    let results: Vec<Result<()>> = pool.install(|| tasks.par_iter().map(|t| ctx.run(t)).collect());

    let mut errors = ErrorList::new("transfer resources and sources");
    for result in results {
        errors.add(result);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::CopyFailed(errors))
    }
}
