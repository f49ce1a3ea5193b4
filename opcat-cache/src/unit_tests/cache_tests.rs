// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{Backend, Cache, Error, DIGEST_FILE};
use camino::Utf8PathBuf;
use opcat::property::Property;
use opcat::query::{CatalogQuery, ModelQuery};
use pretty_assertions::assert_eq;
use std::fs;

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir creates");
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("UTF-8 temp path");
    (tmp, path)
}

fn combined_catalog() -> opcat::declcfg::DeclarativeConfig {
    let mut cfg = fixtures::foo_catalog();
    cfg.extend(fixtures::etcd_catalog());
    cfg
}

fn built_cache<B: Backend>(cache: Cache<B>, root: &Utf8PathBuf) -> Cache<B> {
    let fbc = root.join("fbc");
    cache.build(&fbc).expect("cache builds");
    cache.load().expect("cache loads");
    cache
}

fn seeded_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let (tmp, root) = temp_root();
    fixtures::write_dc_dir(&combined_catalog(), root.join("fbc"));
    (tmp, root)
}

fn assert_matches_model_query<B: Backend>(cache: &Cache<B>) {
    let model_query = ModelQuery::new(fixtures::to_model(&combined_catalog()));

    assert_eq!(
        cache.list_packages().expect("cache lists packages"),
        model_query.list_packages().expect("model lists packages"),
    );
    for name in cache.list_packages().expect("cache lists packages") {
        assert_eq!(
            cache.get_package(&name).expect("cache package exists"),
            model_query.get_package(&name).expect("model package exists"),
        );
    }
    assert_eq!(
        cache.list_bundles().expect("cache lists bundles"),
        model_query.list_bundles().expect("model lists bundles"),
    );

    let (group, version, kind) = fixtures::etcd_gvk();
    assert_eq!(
        cache
            .get_channel_entries_that_provide(group, version, kind)
            .expect("cache providers exist"),
        model_query
            .get_channel_entries_that_provide(group, version, kind)
            .expect("model providers exist"),
    );
    assert_eq!(
        cache
            .get_latest_channel_entries_that_provide(group, version, kind)
            .expect("cache latest providers exist"),
        model_query
            .get_latest_channel_entries_that_provide(group, version, kind)
            .expect("model latest providers exist"),
    );
    assert_eq!(
        cache
            .get_default_bundle_that_provides(group, version, kind)
            .expect("cache default provider exists"),
        model_query
            .get_default_bundle_that_provides(group, version, kind)
            .expect("model default provider exists"),
    );
    assert_eq!(
        cache
            .get_bundle_that_replaces("foo.v0.1.0", "foo", "stable")
            .expect("cache replacer exists"),
        model_query
            .get_bundle_that_replaces("foo.v0.1.0", "foo", "stable")
            .expect("model replacer exists"),
    );
    assert_eq!(
        cache
            .get_bundle_for_channel("etcd", "stable")
            .expect("cache head exists"),
        model_query
            .get_bundle_for_channel("etcd", "stable")
            .expect("model head exists"),
    );
}

#[test]
fn json_cache_answers_like_the_model() {
    let (_tmp, root) = seeded_root();
    let cache = built_cache(Cache::json(root.join("cache")), &root);
    assert_matches_model_query(&cache);
}

#[test]
fn sqlite_cache_answers_like_the_model() {
    let (_tmp, root) = seeded_root();
    let cache = built_cache(Cache::sqlite(root.join("cache")), &root);
    assert_matches_model_query(&cache);
}

#[test]
fn digest_is_deterministic() {
    let (_tmp, root) = seeded_root();
    let fbc = root.join("fbc");

    let a = Cache::json(root.join("cache-a"));
    a.build(&fbc).expect("first cache builds");
    let b = Cache::json(root.join("cache-b"));
    b.build(&fbc).expect("second cache builds");

    let digest_a =
        fs::read_to_string(root.join("cache-a").join(DIGEST_FILE)).expect("digest a reads");
    let digest_b =
        fs::read_to_string(root.join("cache-b").join(DIGEST_FILE)).expect("digest b reads");
    assert_eq!(digest_a, digest_b);
}

#[test]
fn s6_catalog_change_fails_integrity_and_rebuild_recovers() {
    let (_tmp, root) = seeded_root();
    let fbc = root.join("fbc");
    let cache = Cache::json(root.join("cache"));
    cache.build(&fbc).expect("cache builds");
    cache.check_integrity(&fbc).expect("fresh cache is intact");
    let old_digest =
        fs::read_to_string(root.join("cache").join(DIGEST_FILE)).expect("digest reads");

    // Change one bundle's image reference in the catalog.
    let pkg_file = fbc.join("foo/foo.json");
    let text = fs::read_to_string(&pkg_file).expect("package file reads");
    let modified = text.replace(
        "reg.example.com/operators/foo.v0.1.0",
        "reg.example.com/operators/foo.v0.1.0-rebuilt",
    );
    assert_ne!(text, modified, "fixture contains the expected image ref");
    fs::write(&pkg_file, modified).expect("package file rewrites");

    match cache.check_integrity(&fbc) {
        Err(Error::Integrity { .. }) => {}
        other => panic!("expected integrity error, got {:?}", other.map(|_| ())),
    }

    cache.load_or_rebuild(&fbc).expect("rebuild recovers");
    cache.check_integrity(&fbc).expect("rebuilt cache is intact");
    let new_digest =
        fs::read_to_string(root.join("cache").join(DIGEST_FILE)).expect("digest reads");
    assert_ne!(old_digest, new_digest, "content change moves the digest");
}

#[test]
fn body_tamper_fails_integrity() {
    let (_tmp, root) = seeded_root();
    let fbc = root.join("fbc");
    let cache = Cache::json(root.join("cache"));
    cache.build(&fbc).expect("cache builds");

    let index_path = root.join("cache/packages.json");
    let mut text = fs::read_to_string(&index_path).expect("index reads");
    text.push(' ');
    fs::write(&index_path, text).expect("index rewrites");

    match cache.check_integrity(&fbc) {
        Err(Error::Integrity { .. }) => {}
        other => panic!("expected integrity error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_digest_fails_integrity() {
    let (_tmp, root) = seeded_root();
    let fbc = root.join("fbc");
    let cache = Cache::json(root.join("cache"));
    cache.build(&fbc).expect("cache builds");

    fs::remove_file(root.join("cache").join(DIGEST_FILE)).expect("digest removes");
    match cache.check_integrity(&fbc) {
        Err(Error::Integrity { stored: None, .. }) => {}
        other => panic!("expected integrity error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn queries_before_load_fail() {
    let (_tmp, root) = seeded_root();
    let cache = Cache::json(root.join("cache"));
    cache.build(&root.join("fbc")).expect("cache builds");

    assert!(
        cache.list_packages().is_err(),
        "queries require an explicit load"
    );
}

#[test]
fn heavy_payload_loads_lazily_for_imageless_bundles() {
    let csv = r#"{"kind":"ClusterServiceVersion","metadata":{"name":"obj.v0.1.0"}}"#;
    let mut bundle = fixtures::bundle("obj", "obj.v0.1.0", "0.1.0", &[("stable", "")]);
    bundle.image = String::new();
    bundle
        .properties
        .push(Property::bundle_object_data(csv.as_bytes()));
    let cfg = opcat::declcfg::DeclarativeConfig {
        packages: vec![fixtures::package("obj", "stable")],
        bundles: vec![bundle],
        others: Vec::new(),
    };

    let (_tmp, root) = temp_root();
    fixtures::write_dc_dir(&cfg, root.join("fbc"));
    let cache = Cache::sqlite(root.join("cache"));
    cache.build(&root.join("fbc")).expect("cache builds");
    cache.load().expect("cache loads");

    let bundles = cache.list_bundles().expect("bundles list");
    assert_eq!(bundles.len(), 1);
    assert_eq!(
        bundles[0].csv_json, csv,
        "imageless bundles keep their payload"
    );

    let full = cache
        .get_bundle("obj", "stable", "obj.v0.1.0")
        .expect("bundle loads");
    assert_eq!(full.objects, vec![csv.to_string()]);
}
