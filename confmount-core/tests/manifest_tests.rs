//! Manifest loading and reference parsing against a real store layout.

use assert_fs::prelude::*;
use confmount_core::{
    manifest::{load_snapshot, manifest_path},
    namespace::resolve_namespace_with,
    ResourceError, ResourceKind, ResourceRef,
};
use predicates::prelude::*;
use rstest::rstest;

fn never() -> String {
    panic!("fallback must not be consulted")
}

// ---------------------------------------------------------------------------
// 1. Reference parsing
// ---------------------------------------------------------------------------

#[rstest]
#[case("cfg", "cfg", "ambient")]
#[case("cfg.ns", "cfg", "ns")]
#[case(" cfg.ns ", "cfg", "ns")]
#[case("cfg.a.b", "cfg", "a.b")]
fn parse_reference(#[case] input: &str, #[case] name: &str, #[case] namespace: &str) {
    let r = ResourceRef::parse(ResourceKind::ConfigMap, input, || "ambient".to_string())
        .expect("parse");
    assert_eq!(r.name, name);
    assert_eq!(r.namespace, namespace);
}

#[test]
fn explicit_namespace_skips_fallback() {
    let r = ResourceRef::parse(ResourceKind::Secret, "db.prod", never).expect("parse");
    assert_eq!(r.key(), "prod/db");
}

#[test]
fn namespace_file_is_read_when_env_absent() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("namespace");
    file.write_str("team-a\n").expect("write");
    assert_eq!(resolve_namespace_with(None, file.path()), "team-a");
}

// ---------------------------------------------------------------------------
// 2. Loading from the store
// ---------------------------------------------------------------------------

#[test]
fn load_configmap_from_store() {
    let store = assert_fs::TempDir::new().expect("tempdir");
    let resource = ResourceRef::new(ResourceKind::ConfigMap, "cfg", "ns");
    store
        .child("ns/cfg.yaml")
        .write_str("kind: ConfigMap\ndata:\n  app.conf: x=1\n")
        .expect("write");

    let path = manifest_path(store.path(), &resource);
    let snap = load_snapshot(&path, &resource, || "v0".into()).expect("load");
    assert_eq!(snap.data["app.conf"], b"x=1");
    assert_eq!(snap.resource_version, "v0");
}

#[test]
fn load_secret_decodes_base64_and_string_data_overrides() {
    let store = assert_fs::TempDir::new().expect("tempdir");
    let resource = ResourceRef::new(ResourceKind::Secret, "creds", "ns");
    // "c2VjcmV0" = "secret"
    store
        .child("ns/creds.yaml")
        .write_str(
            "kind: Secret\ndata:\n  password: c2VjcmV0\n  user: Ym9i\nstringData:\n  user: alice\n",
        )
        .expect("write");

    let path = manifest_path(store.path(), &resource);
    let snap = load_snapshot(&path, &resource, || "v0".into()).expect("load");
    assert_eq!(snap.data["password"], b"secret");
    assert_eq!(snap.data["user"], b"alice");
}

#[test]
fn missing_manifest_is_not_found() {
    let store = assert_fs::TempDir::new().expect("tempdir");
    let resource = ResourceRef::new(ResourceKind::ConfigMap, "cfg", "ns");
    let path = manifest_path(store.path(), &resource);
    let err = load_snapshot(&path, &resource, || "v0".into()).unwrap_err();
    assert!(err.is_not_found(), "got: {err}");
    assert!(predicate::str::contains("ns/cfg").eval(&err.to_string()));
}

#[test]
fn corrupt_manifest_reports_path() {
    let store = assert_fs::TempDir::new().expect("tempdir");
    let resource = ResourceRef::new(ResourceKind::ConfigMap, "cfg", "ns");
    store
        .child("ns/cfg.yaml")
        .write_str("data: [unclosed")
        .expect("write");

    let path = manifest_path(store.path(), &resource);
    let err = load_snapshot(&path, &resource, || "v0".into()).unwrap_err();
    assert!(matches!(err, ResourceError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("cfg.yaml"));
}

#[test]
fn bad_base64_names_the_key() {
    let store = assert_fs::TempDir::new().expect("tempdir");
    let resource = ResourceRef::new(ResourceKind::Secret, "creds", "ns");
    store
        .child("ns/creds.yaml")
        .write_str("data:\n  token: '!!not base64!!'\n")
        .expect("write");

    let path = manifest_path(store.path(), &resource);
    let err = load_snapshot(&path, &resource, || "v0".into()).unwrap_err();
    assert!(matches!(err, ResourceError::Decode { ref key, .. } if key == "token"));
}
