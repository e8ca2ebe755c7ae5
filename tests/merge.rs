// tests/merge.rs

//! Volatile updates of existing target versions: signature and label merge.

mod common;

use common::*;
use cvtransfer::descriptor::{ComponentDescriptor, Label, MergeAlgorithmSpec};
use cvtransfer::repository::memory::MemoryRepository;
use cvtransfer::signing::{SigningKeyPair, verify_descriptor};
use cvtransfer::transfer::Transfer;
use cvtransfer::Error;
use serde_json::json;

const APP: &str = "acme.org/app";

fn base(repo: &MemoryRepository) -> ComponentDescriptor {
    let mut cd = descriptor(APP, "1.0");
    cd.resources.push(local_resource(repo, "readme", b"hello"));
    cd.labels.set(Label::signing("purpose", "prod"));
    cd
}

fn run(src: &MemoryRepository, tgt: &MemoryRepository) -> cvtransfer::Result<()> {
    let cv = open(src, APP, "1.0");
    Transfer::new().transfer_version(cv.as_ref(), &target_of(tgt), standard(|_| {}))
}

#[test]
fn test_signatures_and_labels_are_merged() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let ci = SigningKeyPair::generate().with_key_id("ci");
    let release = SigningKeyPair::generate().with_key_id("release");

    let mut source = base(&src);
    source.labels.set(
        Label::new("tags", json!(["a", "b"]))
            .with_merge(MergeAlgorithmSpec::new("simpleListMerge")),
    );
    ci.sign_descriptor(&mut source, "ci").unwrap();
    store(&src, source);

    let mut existing = base(&tgt);
    existing.labels.set(Label::new("tags", json!(["b", "c"])));
    existing.labels.set(Label::new("audit", "passed"));
    release.sign_descriptor(&mut existing, "release").unwrap();
    store(&tgt, existing);

    run(&src, &tgt).unwrap();

    let merged = tgt.descriptor(APP, "1.0").unwrap();
    let names: Vec<&str> = merged.signatures.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["ci", "release"]);
    verify_descriptor(&merged, "ci", &ci.verifying_key()).unwrap();
    verify_descriptor(&merged, "release", &release.verifying_key()).unwrap();

    assert_eq!(merged.labels.get("tags").unwrap().value, json!(["b", "c", "a"]));
    assert_eq!(merged.labels.get("audit").unwrap().value, "passed");
    assert_eq!(tgt.commits(), 1);
}

#[test]
fn test_target_signature_wins_for_same_name() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    let source_key = SigningKeyPair::generate();
    let target_key = SigningKeyPair::generate();

    let mut source = base(&src);
    source_key.sign_descriptor(&mut source, "acme").unwrap();
    store(&src, source);

    let mut existing = base(&tgt);
    target_key.sign_descriptor(&mut existing, "acme").unwrap();
    let kept = existing.signatures[0].clone();
    store(&tgt, existing);

    run(&src, &tgt).unwrap();

    let merged = tgt.descriptor(APP, "1.0").unwrap();
    assert_eq!(merged.signatures, vec![kept]);
    verify_descriptor(&merged, "acme", &target_key.verifying_key()).unwrap();
    assert!(verify_descriptor(&merged, "acme", &source_key.verifying_key()).is_err());
}

#[test]
fn test_label_merge_failure_keeps_target() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");

    let mut source = base(&src);
    source.labels.set(
        Label::new("config", json!({"replicas": 1}))
            .with_merge(MergeAlgorithmSpec::new("simpleMapMerge")),
    );
    store(&src, source);
    let mut existing = base(&tgt);
    existing.labels.set(Label::new("config", json!({"replicas": 3})));
    store(&tgt, existing.clone());

    let err = run(&src, &tgt).unwrap_err();

    assert!(matches!(err, Error::Traversal { .. }));
    assert!(err.to_string().contains("merging descriptor"));
    assert_eq!(tgt.descriptor(APP, "1.0").unwrap(), existing);
    assert_eq!(tgt.commits(), 0);
}

#[test]
fn test_signing_label_change_is_a_conflict() {
    let src = MemoryRepository::new("src");
    let tgt = MemoryRepository::new("tgt");
    store(&src, base(&src));
    let mut existing = base(&tgt);
    existing.labels.set(Label::signing("purpose", "test"));
    store(&tgt, existing);

    let err = run(&src, &tgt).unwrap_err();
    assert!(err.is_conflict());
}
