// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::Error;
use crate::model::Model;
use crate::property::Property;
use crate::query::{CatalogQuery, ModelQuery};
use pretty_assertions::assert_eq;
use semver::Version;

fn combined_query() -> ModelQuery {
    let mut cfg = fixtures::foo_catalog();
    cfg.extend(fixtures::etcd_catalog());
    ModelQuery::new(fixtures::to_model(&cfg))
}

#[test]
fn list_packages_is_sorted() {
    let query = combined_query();
    assert_eq!(
        query.list_packages().expect("list_packages succeeds"),
        vec!["etcd", "foo"]
    );
}

#[test]
fn get_package_reports_channel_heads() {
    let query = combined_query();
    let pkg = query.get_package("foo").expect("package exists");
    assert_eq!(pkg.name, "foo");
    assert_eq!(pkg.default_channel_name, "stable");

    let channels: Vec<(&str, &str)> = pkg
        .channels
        .iter()
        .map(|c| (c.name.as_str(), c.csv_name.as_str()))
        .collect();
    assert_eq!(
        channels,
        vec![("fast", "foo.v0.2.0-alpha.1"), ("stable", "foo.v0.2.0")]
    );

    match query.get_package("missing") {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected not-found error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn get_bundle_returns_wire_form() {
    let query = combined_query();
    let bundle = query
        .get_bundle("foo", "stable", "foo.v0.2.0")
        .expect("bundle exists");
    assert_eq!(bundle.csv_name, "foo.v0.2.0");
    assert_eq!(bundle.package_name, "foo");
    assert_eq!(bundle.channel_name, "stable");
    assert_eq!(bundle.version, "0.2.0");
    assert_eq!(bundle.replaces, "foo.v0.1.0");
    assert_eq!(bundle.bundle_path, "reg.example.com/operators/foo.v0.2.0");

    match query.get_bundle("foo", "stable", "foo.v9.9.9") {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected not-found error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn get_bundle_for_channel_returns_head() {
    let query = combined_query();
    let head = query
        .get_bundle_for_channel("etcd", "stable")
        .expect("channel exists");
    assert_eq!(head.csv_name, "etcd.v0.9.2");
}

#[test]
fn s4_get_bundle_that_replaces() {
    let query = combined_query();
    let bundle = query
        .get_bundle_that_replaces("foo.v0.1.0", "foo", "stable")
        .expect("replacer exists");
    assert_eq!(bundle.csv_name, "foo.v0.2.0");

    match query.get_bundle_that_replaces("foo.v0.2.0", "foo", "stable") {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected not-found error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn s4_ambiguous_replacer_is_a_conflict() {
    let mut cfg = fixtures::foo_catalog();
    cfg.bundles.push(fixtures::bundle(
        "foo",
        "foo.v0.1.1",
        "0.1.1",
        &[("stable", "foo.v0.1.0")],
    ));
    // Two replacers make the channel head ambiguous too, so skip validation
    // and build the model directly.
    let mut model = Model::default();
    for bundle in &cfg.bundles {
        let props = crate::property::parse(&bundle.properties).expect("fixture props parse");
        for ch in &props.channels {
            model.add_bundle(crate::model::Bundle {
                package: bundle.package.clone(),
                channel: ch.name.clone(),
                name: bundle.name.clone(),
                image: bundle.image.clone(),
                replaces: ch.replaces.clone(),
                properties: bundle.properties.clone(),
                version: Version::parse(&props.packages[0].version).expect("version parses"),
                ..Default::default()
            });
        }
    }

    let query = ModelQuery::new(model);
    match query.get_bundle_that_replaces("foo.v0.1.0", "foo", "stable") {
        Err(Error::Conflict(msg)) => {
            assert!(msg.contains("multiple bundles replace"), "message: {}", msg)
        }
        other => panic!("expected conflict error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn channel_entries_that_replace_walk_replaces_edges_only() {
    let mut cfg = fixtures::foo_catalog();
    // A skips edge pointing at foo.v0.1.0 must not make alpha.1 a replacer.
    let alpha = cfg
        .bundles
        .iter_mut()
        .find(|b| b.name == "foo.v0.2.0-alpha.1")
        .expect("fixture bundle exists");
    alpha.properties.push(Property::skips("foo.v0.1.0"));
    // Keep the graph valid: v0.1.0 lives in stable, alpha.1 in fast.
    let query = ModelQuery::new(fixtures::to_model(&cfg));

    let entries = query
        .get_channel_entries_that_replace("foo.v0.1.0")
        .expect("entries exist");
    let names: Vec<&str> = entries.iter().map(|e| e.bundle_name.as_str()).collect();
    assert_eq!(names, vec!["foo.v0.2.0"]);

    match query.get_channel_entries_that_replace("nonexistent") {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected not-found error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn channel_entries_that_provide() {
    let query = combined_query();
    let (group, version, kind) = fixtures::etcd_gvk();

    let entries = query
        .get_channel_entries_that_provide(group, version, kind)
        .expect("providers exist");
    let names: Vec<&str> = entries.iter().map(|e| e.bundle_name.as_str()).collect();
    assert_eq!(names, vec!["etcd.v0.9.1", "etcd.v0.9.2"]);
}

#[test]
fn latest_channel_entries_that_provide() {
    let query = combined_query();
    let (group, version, kind) = fixtures::etcd_gvk();

    let entries = query
        .get_latest_channel_entries_that_provide(group, version, kind)
        .expect("providers exist");
    assert_eq!(entries.len(), 1, "one entry per (package, channel)");
    assert_eq!(entries[0].bundle_name, "etcd.v0.9.2");
    assert_eq!(entries[0].replaces, "etcd.v0.9.1");
}

#[test]
fn default_bundle_that_provides() {
    let query = combined_query();
    let (group, version, kind) = fixtures::etcd_gvk();

    let bundle = query
        .get_default_bundle_that_provides(group, version, kind)
        .expect("a default-channel head provides the API");
    assert_eq!(bundle.csv_name, "etcd.v0.9.2");

    match query.get_default_bundle_that_provides("none.example.com", "v1", "Nothing") {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected not-found error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn list_bundles_is_sorted_and_stripped() {
    let query = combined_query();
    let bundles = query.list_bundles().expect("list_bundles succeeds");

    let keys: Vec<(&str, &str, &str)> = bundles
        .iter()
        .map(|b| {
            (
                b.channel_name.as_str(),
                b.package_name.as_str(),
                b.csv_name.as_str(),
            )
        })
        .collect();
    assert_eq!(
        keys,
        vec![
            ("fast", "foo", "foo.v0.2.0-alpha.0"),
            ("fast", "foo", "foo.v0.2.0-alpha.1"),
            ("stable", "etcd", "etcd.v0.9.1"),
            ("stable", "etcd", "etcd.v0.9.2"),
            ("stable", "foo", "foo.v0.1.0"),
            ("stable", "foo", "foo.v0.2.0"),
        ]
    );

    for bundle in &bundles {
        assert!(
            bundle.csv_json.is_empty() && bundle.objects.is_empty(),
            "bundles with an image reference are stripped"
        );
    }
}
