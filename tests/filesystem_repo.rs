// tests/filesystem_repo.rs

//! Transfers between directory-backed repositories.

mod common;

use common::*;
use cvtransfer::descriptor::{AccessSpec, DigestSpec, Resource};
use cvtransfer::repository::filesystem::FilesystemRepository;
use cvtransfer::repository::{AccessMethod, Repository, find_component_version};
use cvtransfer::signing::{SigningKeyPair, verify_descriptor};
use cvtransfer::transfer::Transfer;
use std::sync::Arc;
use tempfile::TempDir;

const APP: &str = "acme.org/app";
const LIB: &str = "acme.org/lib";

fn populate(repo: &FilesystemRepository) {
    let data = b"#!/bin/sh\necho hello\n";
    let blob = repo.put_blob(data).unwrap();
    let access = AccessSpec::local_blob(blob, "text/x-shellscript");
    let mut script = Resource::new("script", "executable", access);
    script.digest = Some(DigestSpec::for_blob(data));

    let image = AccessSpec::oci("ghcr.io/acme/lib:2.1");
    repo.register_external(&image, b"lib-manifest").unwrap();
    let mut lib_image = Resource::new("image", "ociImage", image);
    lib_image.digest = Some(DigestSpec::for_blob(b"lib-manifest"));

    let mut app = descriptor(APP, "1.0");
    app.resources.push(script);
    app.references.push(reference("lib", LIB, "2.1"));
    repo.write_descriptor(&app).unwrap();

    let mut lib = descriptor(LIB, "2.1");
    lib.resources.push(lib_image);
    repo.write_descriptor(&lib).unwrap();
}

fn transfer(src: &FilesystemRepository, tgt: &FilesystemRepository) {
    let cv = find_component_version(src, APP, "1.0").unwrap().unwrap();
    let target: Arc<dyn Repository> = Arc::new(tgt.clone());
    Transfer::new()
        .with_workers(2)
        .transfer_version(
            cv.as_ref(),
            &target,
            standard(|o| {
                o.recursive = true;
                o.resources_by_value = true;
            }),
        )
        .unwrap();
}

#[test]
fn test_recursive_transfer_between_directories() {
    let src_dir = TempDir::new().unwrap();
    let tgt_dir = TempDir::new().unwrap();
    let src = FilesystemRepository::open(src_dir.path()).unwrap();
    let tgt = FilesystemRepository::open(tgt_dir.path()).unwrap();
    populate(&src);

    transfer(&src, &tgt);

    let reopened = FilesystemRepository::open(tgt_dir.path()).unwrap();
    assert_eq!(reopened.component_names().unwrap(), vec![APP.to_string(), LIB.to_string()]);

    let lib = reopened.read_descriptor(LIB, "2.1").unwrap().unwrap();
    let AccessSpec::LocalBlob { local_reference, reference_name, .. } = &lib.resources[0].access else {
        panic!("image should be stored locally");
    };
    assert_eq!(reference_name.as_deref(), Some("acme/lib:2.1"));
    let cv = reopened.lookup_component_version(LIB, "2.1").unwrap();
    let method = cv.access_method(&lib.resources[0].access).unwrap();
    assert_eq!(method.get().unwrap(), b"lib-manifest");
    assert!(local_reference.starts_with("sha256:"));

    let app = reopened.read_descriptor(APP, "1.0").unwrap().unwrap();
    assert_eq!(app.repository_contexts, vec![tgt.specification()]);
    assert!(tgt_dir.path().join("blobs").read_dir().unwrap().count() >= 2);
}

#[test]
fn test_signature_survives_repeated_transfer() {
    let src_dir = TempDir::new().unwrap();
    let tgt_dir = TempDir::new().unwrap();
    let src = FilesystemRepository::open(src_dir.path()).unwrap();
    let tgt = FilesystemRepository::open(tgt_dir.path()).unwrap();
    populate(&src);
    transfer(&src, &tgt);

    let key = SigningKeyPair::generate().with_key_id("release");
    let mut app = tgt.read_descriptor(APP, "1.0").unwrap().unwrap();
    key.sign_descriptor(&mut app, "release").unwrap();
    tgt.write_descriptor(&app).unwrap();

    transfer(&src, &tgt);

    let app = tgt.read_descriptor(APP, "1.0").unwrap().unwrap();
    assert_eq!(app.signatures.len(), 1);
    verify_descriptor(&app, "release", &key.verifying_key()).unwrap();
}
