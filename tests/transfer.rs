// tests/transfer.rs

//! End-to-end transfers between in-memory repositories.

mod common;

use common::*;
use cvtransfer::descriptor::{AccessSpec, Label};
use cvtransfer::policy::TransferOption;
use cvtransfer::policy::options::{Printer, Recursive, ResourcesByValue, Workers};
use cvtransfer::repository::memory::MemoryRepository;
use cvtransfer::repository::Repository;
use cvtransfer::transfer::{Transfer, TransferClosure};
use cvtransfer::Error;

const APP: &str = "acme.org/app";

fn app_with_artifacts(src: &MemoryRepository) {
    let mut cd = descriptor(APP, "1.0");
    cd.resources.push(local_resource(src, "readme", b"hello"));
    cd.resources.push(oci_resource(src, "image", "ghcr.io/acme/app:1.0", b"manifest"));
    store(src, cd);
}

#[test]
fn test_transfer_new_version() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    app_with_artifacts(&src);
    let (memory, printer) = memory_printer();

    {
        let cv = open(&src, APP, "1.0");
        Transfer::new()
            .with_printer(printer)
            .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|_| {}))
            .unwrap();
    }

    let cd = tgt.descriptor(APP, "1.0").unwrap();
    assert_eq!(cd.resources.len(), 2);
    match &cd.resources[0].access {
        AccessSpec::LocalBlob { local_reference, .. } => assert!(tgt.has_blob(local_reference)),
        other => panic!("readme should be local, got {:?}", other),
    }
    assert_eq!(cd.resources[1].access, AccessSpec::oci("ghcr.io/acme/app:1.0"));
    assert_eq!(cd.repository_contexts, vec![tgt.specification()]);
    assert_eq!(tgt.blob_count(), 1);
    assert_eq!(tgt.commits(), 1);

    let lines = memory.lines();
    assert_eq!(lines.first().unwrap(), "transferring version \"acme.org/app:1.0\"...");
    assert_eq!(lines.last().unwrap(), "...adding component version...");
    assert!(memory.contains("...resource 0 readme[blob] (copy)"));

    assert_eq!(src.open_handles(), 0);
    assert_eq!(tgt.open_handles(), 0);
}

#[test]
fn test_transfer_is_idempotent() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    app_with_artifacts(&src);
    let target = target_of(&tgt);
    let policy = standard(|o| o.resources_by_value = true);

    let cv = open(&src, APP, "1.0");
    Transfer::new()
        .transfer_version(cv.as_ref(), &target, policy.clone())
        .unwrap();
    let first = tgt.descriptor(APP, "1.0").unwrap();
    assert_eq!(tgt.blob_count(), 2);

    let (memory, printer) = memory_printer();
    Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target, policy)
        .unwrap();

    assert_eq!(tgt.commits(), 1);
    assert_eq!(tgt.descriptor(APP, "1.0").unwrap(), first);
    assert_eq!(
        memory.lines(),
        vec![
            "transferring version \"acme.org/app:1.0\"...".to_string(),
            "  version \"acme.org/app:1.0\" already present -> skip transport".to_string(),
        ]
    );
}

#[test]
fn test_value_transport_for_existing_version() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    app_with_artifacts(&src);
    let target = target_of(&tgt);
    let cv = open(&src, APP, "1.0");

    Transfer::new()
        .transfer_version(cv.as_ref(), &target, standard(|_| {}))
        .unwrap();
    assert_eq!(tgt.blob_count(), 1);

    let (memory, printer) = memory_printer();
    Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target, standard(|o| o.resources_by_value = true))
        .unwrap();

    assert!(memory.contains("already present -> but requires resource transport"));
    assert!(memory.contains("...resource 1 image[ociImage](acme/app:1.0) (copy)"));
    assert!(memory.contains("...resource 0 readme[blob] (already present)"));
    assert_eq!(tgt.blob_count(), 2);
    assert_eq!(tgt.commits(), 2);
    assert!(tgt.descriptor(APP, "1.0").unwrap().resources[1].access.is_local());
}

#[test]
fn test_cycle_is_transferred_once() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut a = descriptor("acme.org/a", "1.0");
    a.references.push(reference("b", "acme.org/b", "1.0"));
    let mut b = descriptor("acme.org/b", "1.0");
    b.references.push(reference("a", "acme.org/a", "1.0"));
    store(&src, a);
    store(&src, b);
    let (memory, printer) = memory_printer();

    {
        let cv = open(&src, "acme.org/a", "1.0");
        Transfer::new()
            .with_printer(printer)
            .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|o| o.recursive = true))
            .unwrap();
    }

    assert!(tgt.descriptor("acme.org/a", "1.0").is_some());
    assert!(tgt.descriptor("acme.org/b", "1.0").is_some());
    assert_eq!(tgt.commits(), 2);
    let visits = memory
        .lines()
        .iter()
        .filter(|l| l.starts_with("transferring version"))
        .count();
    assert_eq!(visits, 2);
    assert_eq!(src.open_handles(), 0);
    assert_eq!(tgt.open_handles(), 0);
}

#[test]
fn test_diamond_visits_shared_reference_once() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut a = descriptor("acme.org/a", "1.0");
    a.references.push(reference("b", "acme.org/b", "1.0"));
    a.references.push(reference("c", "acme.org/c", "1.0"));
    let mut b = descriptor("acme.org/b", "1.0");
    b.references.push(reference("d", "acme.org/d", "1.0"));
    let mut c = descriptor("acme.org/c", "1.0");
    c.references.push(reference("d", "acme.org/d", "1.0"));
    let mut d = descriptor("acme.org/d", "1.0");
    d.resources.push(local_resource(&src, "data", b"shared"));
    for cd in [a, b, c, d] {
        store(&src, cd);
    }

    let closure = TransferClosure::new();
    {
        let cv = open(&src, "acme.org/a", "1.0");
        Transfer::new()
            .transfer_version_in(&closure, cv.as_ref(), &target_of(&tgt), standard(|o| o.recursive = true))
            .unwrap();
    }

    assert_eq!(tgt.commits(), 4);
    assert_eq!(closure.len(), 4);
    let visited: Vec<String> = closure.visited().iter().map(|id| id.to_string()).collect();
    assert_eq!(
        visited,
        vec!["acme.org/a:1.0", "acme.org/b:1.0", "acme.org/d:1.0", "acme.org/c:1.0"]
    );
    let d_visit = closure
        .first_visit(&cvtransfer::ComponentVersionId::new("acme.org/d", "1.0"))
        .unwrap();
    assert_eq!(d_visit.history.to_string(), "acme.org/a:1.0->acme.org/b:1.0");
    assert_eq!(src.open_handles(), 0);
    assert_eq!(tgt.open_handles(), 0);
}

#[test]
fn test_references_not_followed_without_recursion() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut a = descriptor("acme.org/a", "1.0");
    a.references.push(reference("b", "acme.org/b", "1.0"));
    store(&src, a);
    store(&src, descriptor("acme.org/b", "1.0"));

    let cv = open(&src, "acme.org/a", "1.0");
    Transfer::new()
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|_| {}))
        .unwrap();

    assert!(tgt.descriptor("acme.org/a", "1.0").is_some());
    assert!(tgt.descriptor("acme.org/b", "1.0").is_none());
}

#[test]
fn test_stop_on_existing_version() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut a = descriptor("acme.org/a", "1.0");
    a.references.push(reference("b", "acme.org/b", "1.0"));
    store(&src, a);
    store(&src, descriptor("acme.org/b", "1.0"));
    store(&tgt, descriptor("acme.org/b", "1.0"));
    let (memory, printer) = memory_printer();

    let cv = open(&src, "acme.org/a", "1.0");
    Transfer::new()
        .with_printer(printer)
        .transfer_version(
            cv.as_ref(),
            &target_of(&tgt),
            standard(|o| {
                o.recursive = true;
                o.stop_on_existing_version = true;
            }),
        )
        .unwrap();

    assert!(!memory.contains("acme.org/b:1.0"));
    assert_eq!(tgt.commits(), 1);
}

#[test]
fn test_conflict_leaves_target_unchanged() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut source = descriptor(APP, "1.0");
    source.resources.push(local_resource(&src, "readme", b"new"));
    store(&src, source);
    let mut existing = descriptor(APP, "1.0");
    existing.resources.push(local_resource(&tgt, "readme", b"old"));
    store(&tgt, existing.clone());
    let (memory, printer) = memory_printer();

    let cv = open(&src, APP, "1.0");
    let err = Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|_| {}))
        .unwrap_err();

    assert!(err.is_conflict());
    match &err {
        Error::Traversal { history, .. } => assert_eq!(history, "acme.org/app:1.0"),
        other => panic!("expected traversal error, got {}", other),
    }
    assert_eq!(tgt.descriptor(APP, "1.0").unwrap(), existing);
    assert_eq!(tgt.commits(), 0);
    assert!(memory.contains(
        "  version \"acme.org/app:1.0\" already present, but differs because some artifact digests are changed -> transport aborted (use option overwrite option to enforce transport)"
    ));
}

#[test]
fn test_overwrite_replaces_diverging_version() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut source = descriptor(APP, "1.0");
    source.resources.push(local_resource(&src, "readme", b"new"));
    let expected_digest = source.resources[0].digest.clone();
    store(&src, source);
    let mut existing = descriptor(APP, "1.0");
    existing.resources.push(local_resource(&tgt, "readme", b"old"));
    store(&tgt, existing);
    let (memory, printer) = memory_printer();

    let cv = open(&src, APP, "1.0");
    Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|o| o.overwrite = true))
        .unwrap();

    let cd = tgt.descriptor(APP, "1.0").unwrap();
    assert_eq!(cd.resources[0].digest, expected_digest);
    assert_eq!(tgt.commits(), 1);
    assert!(memory.contains("(transport enforced by overwrite option)"));
    assert!(memory.contains("...resource 0 readme[blob] (copy)"));
}

#[test]
fn test_enforce_transport_rewrites_identical_version() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    app_with_artifacts(&src);
    let target = target_of(&tgt);
    let cv = open(&src, APP, "1.0");
    Transfer::new()
        .transfer_version(cv.as_ref(), &target, standard(|_| {}))
        .unwrap();

    let (memory, printer) = memory_printer();
    Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target, standard(|o| o.enforce_transport = true))
        .unwrap();

    assert_eq!(tgt.commits(), 2);
    assert!(memory.contains("...resource 0 readme[blob] (already present)"));
    assert!(!memory.contains("skip transport"));
}

fn volatile_setup() -> (MemoryRepository, MemoryRepository) {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut source = descriptor(APP, "1.0");
    source.labels.set(Label::new("build", "42"));
    source.labels.set(Label::signing("purpose", "prod"));
    store(&src, source);
    let mut existing = descriptor(APP, "1.0");
    existing.labels.set(Label::new("audit", "passed"));
    existing.labels.set(Label::signing("purpose", "prod"));
    store(&tgt, existing);
    (src, tgt)
}

#[test]
fn test_volatile_update_merges_labels() {
    let (src, tgt) = volatile_setup();
    let (memory, printer) = memory_printer();

    let cv = open(&src, APP, "1.0");
    Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|_| {}))
        .unwrap();

    assert!(memory.contains("  updating volatile properties of \"acme.org/app:1.0\""));
    let cd = tgt.descriptor(APP, "1.0").unwrap();
    assert_eq!(cd.labels.get("build").unwrap().value, "42");
    assert_eq!(cd.labels.get("audit").unwrap().value, "passed");
    assert!(cd.labels.get("purpose").unwrap().signing);
    assert_eq!(tgt.commits(), 1);
}

#[test]
fn test_overwrite_replaces_volatile_differences() {
    let (src, tgt) = volatile_setup();
    let (memory, printer) = memory_printer();

    let cv = open(&src, APP, "1.0");
    Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|o| o.overwrite = true))
        .unwrap();

    assert!(memory.contains(
        "  warning: version \"acme.org/app:1.0\" already present, but transport enforced by overwrite option"
    ));
    assert!(!memory.contains("updating volatile properties"));
    let cd = tgt.descriptor(APP, "1.0").unwrap();
    assert_eq!(cd.labels.get("build").unwrap().value, "42");
    assert!(cd.labels.get("audit").is_none());
    assert_eq!(tgt.commits(), 1);
}

#[test]
fn test_volatile_update_adopts_digest_and_keeps_target_content() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut source = descriptor(APP, "1.0");
    source.resources.push(oci_resource(&src, "image", "ghcr.io/acme/app:1.0", b"manifest"));
    let digest = source.resources[0].digest.clone();
    let mut existing = source.clone();
    store(&src, source);
    let local = tgt.add_local_blob(b"manifest", "application/octet-stream");
    existing.resources[0].access = local.clone();
    existing.resources[0].digest = None;
    store(&tgt, existing);
    let (memory, printer) = memory_printer();

    let cv = open(&src, APP, "1.0");
    Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|_| {}))
        .unwrap();

    assert!(memory.contains("  updating volatile properties of \"acme.org/app:1.0\""));
    assert!(!memory.contains("...resource"));
    let cd = tgt.descriptor(APP, "1.0").unwrap();
    assert_eq!(cd.resources[0].digest, digest);
    assert_eq!(cd.resources[0].access, local);
    assert_eq!(tgt.blob_count(), 1);
    assert_eq!(tgt.commits(), 1);
}

#[test]
fn test_skip_update_keeps_volatile_differences() {
    let (src, tgt) = volatile_setup();
    let before = tgt.descriptor(APP, "1.0").unwrap();
    let (memory, printer) = memory_printer();

    let cv = open(&src, APP, "1.0");
    Transfer::new()
        .with_printer(printer)
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|o| o.skip_update = true))
        .unwrap();

    assert!(memory.contains("requires update of volatile data, but skipped"));
    assert_eq!(tgt.descriptor(APP, "1.0").unwrap(), before);
    assert_eq!(tgt.commits(), 0);
}

#[test]
fn test_non_durable_target_not_recorded() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::non_durable("staging");
    app_with_artifacts(&src);

    let cv = open(&src, APP, "1.0");
    Transfer::new()
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|_| {}))
        .unwrap();

    assert!(tgt.descriptor(APP, "1.0").unwrap().repository_contexts.is_empty());
}

#[test]
fn test_failed_reference_blocks_parent() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut a = descriptor("acme.org/a", "1.0");
    a.references.push(reference("missing", "acme.org/missing", "1.0"));
    a.references.push(reference("c", "acme.org/c", "1.0"));
    store(&src, a);
    store(&src, descriptor("acme.org/c", "1.0"));

    let err = {
        let cv = open(&src, "acme.org/a", "1.0");
        Transfer::new()
            .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|o| o.recursive = true))
            .unwrap_err()
    };

    assert!(err.is_not_found());
    assert!(err.to_string().contains("acme.org/missing:1.0"));
    // the sibling is still transferred, the parent is not
    assert!(tgt.descriptor("acme.org/c", "1.0").is_some());
    assert!(tgt.descriptor("acme.org/a", "1.0").is_none());
    assert_eq!(tgt.commits(), 1);
    assert_eq!(src.open_handles(), 0);
    assert_eq!(tgt.open_handles(), 0);
}

#[test]
fn test_transfer_with_options() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let mut a = descriptor("acme.org/a", "1.0");
    a.references.push(reference("b", "acme.org/b", "1.0"));
    store(&src, a);
    let mut b = descriptor("acme.org/b", "1.0");
    b.resources.push(oci_resource(&src, "image", "ghcr.io/acme/b:1.0", b"b-manifest"));
    store(&src, b);
    let (memory, printer) = memory_printer();

    let options: Vec<Box<dyn TransferOption>> = vec![
        Box::new(Recursive(true)),
        Box::new(ResourcesByValue(true)),
        Box::new(Workers(2)),
        Box::new(Printer(printer)),
    ];
    let cv = open(&src, "acme.org/a", "1.0");
    cvtransfer::transfer(cv.as_ref(), &target_of(&tgt), &options).unwrap();

    assert_eq!(tgt.commits(), 2);
    assert!(tgt.descriptor("acme.org/b", "1.0").unwrap().resources[0].access.is_local());
    assert!(memory.contains("transferring version \"acme.org/b:1.0\"..."));
}
