// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::declcfg::{self, DeclarativeConfig, Meta};
use crate::errors::Error;
use crate::property::Property;
use camino::Utf8PathBuf;
use pretty_assertions::assert_eq;
use std::fs;

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir creates");
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("UTF-8 temp path");
    (tmp, path)
}

#[test]
fn dir_round_trip() {
    let cfg = fixtures::foo_catalog();
    let (_tmp, root) = temp_root();
    let target = root.join("catalog");

    declcfg::write_dir(&cfg, &target).expect("write_dir succeeds");
    assert!(target.join("foo/foo.json").is_file());

    let loaded = declcfg::load_fs(&target).expect("load_fs succeeds");
    assert_eq!(loaded, cfg);
}

#[test]
fn write_dir_refuses_non_empty_target() {
    let cfg = fixtures::foo_catalog();
    let (_tmp, root) = temp_root();
    fs::write(root.join("existing"), "x").expect("seed file writes");

    match declcfg::write_dir(&cfg, &root) {
        Err(Error::Configuration(msg)) => assert!(msg.contains("not empty"), "message: {}", msg),
        other => panic!("expected configuration error, got {:?}", other),
    }
}

#[test]
fn json_stream_round_trip() {
    let mut cfg = fixtures::foo_catalog();
    cfg.others.push(
        Meta::from_value(serde_json::json!({
            "schema": "olm.deprecations",
            "message": "deprecated <soon> & gone",
        }))
        .expect("meta parses")
        .expect("schema is present"),
    );

    let mut buf = Vec::new();
    declcfg::write_json(&cfg, &mut buf).expect("write_json succeeds");
    let text = String::from_utf8(buf).expect("JSON output is UTF-8");
    // No HTML escaping in the output.
    assert!(text.contains("deprecated <soon> & gone"));

    let loaded = declcfg::load_reader(text.as_bytes()).expect("load_reader succeeds");
    assert_eq!(loaded, cfg);
}

#[test]
fn yaml_stream_round_trip() {
    let cfg = fixtures::foo_catalog();
    let mut buf = Vec::new();
    declcfg::write_yaml(&cfg, &mut buf).expect("write_yaml succeeds");
    let text = String::from_utf8(buf).expect("YAML output is UTF-8");
    assert!(text.starts_with("---\n"));

    let loaded = declcfg::load_reader(text.as_bytes()).expect("load_reader succeeds");
    assert_eq!(loaded, cfg);
}

#[test]
fn unicode_escapes_rewritten_before_parsing() {
    let doc = r#"{"schema": "olm.custom", "value": "\u003cb\u003e \u0026 more"}"#;
    let cfg = declcfg::load_reader(doc.as_bytes()).expect("load_reader succeeds");
    assert_eq!(cfg.others.len(), 1);
    assert_eq!(
        cfg.others[0].blob["value"],
        serde_json::json!("<b> & more")
    );
}

#[test]
fn missing_schema_is_strict_error_and_lenient_skip() {
    let cfg = fixtures::foo_catalog();
    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    fixtures::write_dc_dir(&cfg, &target);
    fs::write(target.join("stray.json"), r#"{"kind": "NotACatalogDoc"}"#)
        .expect("stray file writes");

    match declcfg::load_fs(&target) {
        Err(Error::Format(msg)) => {
            assert!(msg.contains("missing root schema"), "message: {}", msg)
        }
        other => panic!("expected format error, got {:?}", other.map(|_| ())),
    }

    let loaded = declcfg::load_fs_lenient(&target).expect("lenient load succeeds");
    assert_eq!(loaded, cfg);
}

#[test]
fn indexignore_excludes_files() {
    let cfg = fixtures::foo_catalog();
    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    fixtures::write_dc_dir(&cfg, &target);
    // Without the ignore file this schema-less document would fail the
    // strict load.
    fs::write(target.join("notes.json"), r#"{"not": "a catalog document"}"#)
        .expect("stray file writes");
    fs::write(target.join(".indexignore"), "notes.json\n").expect("ignore file writes");

    let loaded = declcfg::load_fs(&target).expect("load_fs succeeds with ignore file");
    assert_eq!(loaded, cfg);
}

#[test]
fn object_refs_resolve_and_round_trip() {
    let object = r#"{"kind":"ConfigMap","metadata":{"name":"cm"}}"#;
    let csv = r#"{"kind":"ClusterServiceVersion","metadata":{"name":"foo.v0.1.0"}}"#;

    let mut cfg = DeclarativeConfig {
        packages: vec![fixtures::package("foo", "stable")],
        bundles: vec![fixtures::bundle("foo", "foo.v0.1.0", "0.1.0", &[("stable", "")])],
        others: Vec::new(),
    };
    let bundle = &mut cfg.bundles[0];
    bundle
        .properties
        .push(Property::bundle_object_ref("objects/csv.json"));
    bundle
        .properties
        .push(Property::bundle_object_ref("objects/cm.json"));
    bundle.objects = vec![csv.to_string(), object.to_string()];
    bundle.csv_json = Some(csv.to_string());

    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    declcfg::write_dir(&cfg, &target).expect("write_dir succeeds");
    assert!(target.join("foo/objects/cm.json").is_file());
    assert!(target.join("foo/objects/csv.json").is_file());

    let loaded = declcfg::load_fs(&target).expect("load_fs succeeds");
    assert_eq!(loaded.bundles[0].objects, cfg.bundles[0].objects);
    assert_eq!(loaded.bundles[0].csv_json.as_deref(), Some(csv));
    assert_eq!(loaded, cfg);
}

#[test]
fn object_ref_escaping_root_is_rejected() {
    let doc = serde_json::json!({
        "schema": "olm.bundle",
        "name": "foo.v0.1.0",
        "package": "foo",
        "image": "reg.example.com/foo",
        "properties": [
            Property::package("foo", "0.1.0"),
            Property::channel("stable", ""),
            Property::bundle_object_ref("../../etc/passwd"),
        ],
    });
    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    fs::create_dir_all(target.join("foo")).expect("package dir creates");
    fs::write(
        target.join("foo/foo.json"),
        serde_json::to_string(&doc).expect("doc serializes"),
    )
    .expect("bundle doc writes");

    match declcfg::load_fs(&target) {
        Err(Error::Format(msg)) => {
            assert!(msg.contains("invalid object reference"), "message: {}", msg)
        }
        other => panic!("expected format error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn global_others_write_to_global_file() {
    let mut cfg = fixtures::foo_catalog();
    cfg.others.push(
        Meta::from_value(serde_json::json!({"schema": "olm.global", "note": "hello"}))
            .expect("meta parses")
            .expect("schema is present"),
    );

    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    declcfg::write_dir(&cfg, &target).expect("write_dir succeeds");
    assert!(target.join(declcfg::GLOBAL_FILE).is_file());

    let loaded = declcfg::load_fs(&target).expect("load_fs succeeds");
    assert_eq!(loaded, cfg);
}

#[test]
fn write_json_orders_packages_then_bundles() {
    let mut cfg = fixtures::foo_catalog();
    cfg.extend(fixtures::etcd_catalog());

    let mut buf = Vec::new();
    declcfg::write_json(&cfg, &mut buf).expect("write_json succeeds");
    let text = String::from_utf8(buf).expect("JSON output is UTF-8");

    let order: Vec<usize> = [
        "\"name\": \"etcd\"",
        "\"name\": \"etcd.v0.9.1\"",
        "\"name\": \"etcd.v0.9.2\"",
        "\"name\": \"foo\"",
        "\"name\": \"foo.v0.1.0\"",
        "\"name\": \"foo.v0.2.0\"",
    ]
    .iter()
    .map(|needle| text.find(needle).unwrap_or_else(|| panic!("{} missing", needle)))
    .collect();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(order, sorted, "documents are ordered by package, then name");
}

#[test]
fn untouched_files_are_walked_deterministically() {
    // Two loads of the same tree must produce identical document order.
    let mut cfg = fixtures::foo_catalog();
    cfg.extend(fixtures::etcd_catalog());
    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    fixtures::write_dc_dir(&cfg, &target);

    let first = declcfg::load_fs(&target).expect("first load succeeds");
    let second = declcfg::load_fs(&target).expect("second load succeeds");
    assert_eq!(first, second);
    assert_eq!(
        first.packages.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        vec!["etcd", "foo"]
    );
}
