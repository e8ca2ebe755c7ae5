// tests/copy_engine.rs

//! Copy engine behaviour for different worker pool widths.

mod common;

use common::*;
use cvtransfer::descriptor::{AccessSpec, Resource};
use cvtransfer::policy::options::StandardOptions;
use cvtransfer::repository::memory::MemoryRepository;
use cvtransfer::repository::{ComponentAccess, Repository};
use cvtransfer::transfer::Transfer;
use cvtransfer::Error;

const APP: &str = "acme.org/app";
const RESOURCES: usize = 7;
const SOURCES: usize = 3;

fn populated_source() -> MemoryRepository {
    let src = MemoryRepository::new("src");
    let mut cd = descriptor(APP, "1.0");
    for i in 0..RESOURCES {
        let data = format!("resource-{}", i);
        cd.resources.push(local_resource(&src, &format!("r{}", i), data.as_bytes()));
    }
    for i in 0..SOURCES {
        let data = format!("source-{}", i);
        cd.sources.push(local_source(&src, &format!("s{}", i), data.as_bytes()));
    }
    store(&src, cd);
    src
}

#[test]
fn test_every_artifact_copied_once_for_any_width() {
    for workers in [1, 2, 5, 16] {
        let src = populated_source();
        let tgt = MemoryRepository::new("tgt");
        let policy = CountingPolicy::new(StandardOptions::default());

        let cv = open(&src, APP, "1.0");
        let comp = tgt.lookup_component(APP).unwrap();
        let tv = comp.new_version("1.0").unwrap();
        Transfer::new()
            .with_workers(workers)
            .copy_version(cv.as_ref(), tv.as_ref(), &policy)
            .unwrap();

        assert_eq!(policy.resource_copies(), RESOURCES, "width {}", workers);
        assert_eq!(policy.source_copies(), SOURCES, "width {}", workers);
        assert_eq!(tgt.blob_count(), RESOURCES + SOURCES, "width {}", workers);

        let copied = tv.descriptor();
        assert_eq!(copied.resources.len(), RESOURCES);
        assert!(copied.resources.iter().all(|r| r.access.is_local()));
        assert!(copied.sources.iter().all(|s| s.access.is_local()));
        // copy_version never commits
        assert!(!tgt.exists_component_version(APP, "1.0").unwrap());
    }
}

#[test]
fn test_failures_are_aggregated() {
    let src = populated_source();
    let mut cd = src.descriptor(APP, "1.0").unwrap();
    for name in ["broken-a", "broken-b"] {
        let access = AccessSpec::oci(format!("ghcr.io/acme/{}:1", name));
        cd.resources.push(Resource::new(name, "ociImage", access));
    }
    src.add_descriptor(cd).unwrap();

    let tgt = MemoryRepository::new("tgt");
    let policy = CountingPolicy::new(StandardOptions {
        resources_by_value: true,
        ..Default::default()
    });
    let cv = open(&src, APP, "1.0");
    let comp = tgt.lookup_component(APP).unwrap();
    let tv = comp.new_version("1.0").unwrap();
    let err = Transfer::new()
        .with_workers(3)
        .copy_version(cv.as_ref(), tv.as_ref(), &policy)
        .unwrap_err();

    match err {
        Error::CopyFailed(list) => {
            assert_eq!(list.len(), 2);
            assert!(list.errors().iter().all(|e| e.is_not_found()));
        }
        other => panic!("expected CopyFailed, got {}", other),
    }
    // all other tasks still ran
    assert_eq!(policy.resource_copies(), RESOURCES);
    assert_eq!(policy.source_copies(), SOURCES);
}

#[test]
fn test_checksum_mismatch_fails_copy() {
    let src = MemoryRepository::new("src");
    let mut cd = descriptor(APP, "1.0");
    let mut tampered = local_resource(&src, "readme", b"hello");
    tampered.digest = Some(cvtransfer::DigestSpec::for_blob(b"something else"));
    cd.resources.push(tampered);
    store(&src, cd);

    let tgt = MemoryRepository::new("tgt");
    let cv = open(&src, APP, "1.0");
    let err = Transfer::new()
        .transfer_version(cv.as_ref(), &target_of(&tgt), standard(|_| {}))
        .unwrap_err();

    assert!(matches!(err, Error::CopyFailed(_)));
    assert!(tgt.descriptor(APP, "1.0").is_none());
    assert_eq!(tgt.blob_count(), 0);
}
