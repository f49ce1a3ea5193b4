// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::declcfg::DeclarativeConfig;
use crate::diff::{diff, DiffConfig, DiffIncludeChannel, DiffIncludeConfig, DiffIncludePackage, NonHeadPolicy};
use crate::errors::Error;
use crate::model::Model;
use crate::property::Property;
use pretty_assertions::assert_eq;
use semver::Version;

fn skip_deps() -> DiffConfig {
    DiffConfig {
        skip_dependencies: true,
        ..Default::default()
    }
}

fn with_deps() -> DiffConfig {
    DiffConfig::default()
}

fn merged(a: &DeclarativeConfig, b: &DeclarativeConfig) -> Model {
    let mut cfg = a.clone();
    cfg.extend(b.clone());
    fixtures::to_model(&cfg)
}

fn with_requirement(bundle_name: &str, pkg: &str, range: &str) -> DeclarativeConfig {
    let mut cfg = fixtures::foo_catalog();
    let bundle = cfg
        .bundles
        .iter_mut()
        .find(|b| b.name == bundle_name)
        .expect("bundle exists in fixture");
    bundle
        .properties
        .push(Property::package_required(pkg, range));
    cfg
}

fn bundle_names(model: &Model, pkg: &str, channel: &str) -> Vec<String> {
    model.packages[pkg].channels[channel]
        .bundles
        .keys()
        .cloned()
        .collect()
}

fn include_package(name: &str) -> DiffIncludeConfig {
    DiffIncludeConfig {
        packages: vec![DiffIncludePackage {
            name: name.to_string(),
            channels: Vec::new(),
        }],
    }
}

fn include_version(pkg: &str, channel: &str, version: &str) -> DiffIncludeConfig {
    DiffIncludeConfig {
        packages: vec![DiffIncludePackage {
            name: pkg.to_string(),
            channels: vec![DiffIncludeChannel {
                name: channel.to_string(),
                versions: vec![Version::parse(version).expect("test version parses")],
            }],
        }],
    }
}

#[test]
fn diff_of_identical_models_is_empty() {
    let model = fixtures::to_model(&fixtures::foo_catalog());
    let out = diff(&model, &model, &skip_deps()).expect("diff succeeds");
    assert!(out.is_empty());
}

#[test]
fn heads_only_extracts_channel_heads() {
    let model = fixtures::to_model(&fixtures::foo_catalog());
    let out = diff(&Model::default(), &model, &skip_deps()).expect("diff succeeds");

    assert_eq!(out.packages.len(), 1);
    let pkg = &out.packages["foo"];
    assert_eq!(pkg.default_channel, "stable");
    assert_eq!(bundle_names(&out, "foo", "stable"), vec!["foo.v0.2.0"]);
    assert_eq!(
        bundle_names(&out, "foo", "fast"),
        vec!["foo.v0.2.0-alpha.1"]
    );
}

#[test]
fn latest_mode_returns_exactly_the_added_bundles() {
    let old = fixtures::to_model(&fixtures::foo_catalog());
    let new = merged(&fixtures::foo_catalog(), &fixtures::etcd_catalog());

    let out = diff(&old, &new, &skip_deps()).expect("diff succeeds");
    assert_eq!(
        out.packages.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["etcd"],
        "untouched packages are dropped"
    );
    assert_eq!(
        bundle_names(&out, "etcd", "stable"),
        vec!["etcd.v0.9.1", "etcd.v0.9.2"]
    );
}

#[test]
fn s2_dependency_closure_selects_latest_in_range() {
    let new = merged(
        &with_requirement("foo.v0.1.0", "etcd", ">=0.9.0"),
        &fixtures::etcd_catalog(),
    );

    let out = diff(&Model::default(), &new, &with_deps()).expect("diff succeeds");
    let etcd = bundle_names(&out, "etcd", "stable");
    assert!(etcd.contains(&"etcd.v0.9.2".to_string()), "etcd: {:?}", etcd);
    assert!(
        !etcd.contains(&"etcd.v0.9.1".to_string()),
        "only the latest in-range bundle is pulled: {:?}",
        etcd
    );
}

#[test]
fn dependency_closure_pulls_non_head_when_range_excludes_head() {
    let new = merged(
        &with_requirement("foo.v0.2.0", "etcd", ">=0.9.0, <0.9.2"),
        &fixtures::etcd_catalog(),
    );

    let out = diff(&Model::default(), &new, &with_deps()).expect("diff succeeds");
    let etcd = bundle_names(&out, "etcd", "stable");
    assert!(
        etcd.contains(&"etcd.v0.9.1".to_string()),
        "the in-range non-head bundle is pulled: {:?}",
        etcd
    );
}

#[test]
fn enabling_dependencies_only_adds_bundles() {
    let new = merged(
        &with_requirement("foo.v0.2.0", "etcd", ">=0.9.0, <0.9.2"),
        &fixtures::etcd_catalog(),
    );

    let without = diff(&Model::default(), &new, &skip_deps()).expect("diff succeeds");
    let with = diff(&Model::default(), &new, &with_deps()).expect("diff succeeds");

    for pkg in without.packages.values() {
        for channel in pkg.channels.values() {
            for name in channel.bundles.keys() {
                assert!(
                    with.packages[&pkg.name].channels[&channel.name]
                        .bundles
                        .contains_key(name),
                    "dependency closure removed {}/{}/{}",
                    pkg.name,
                    channel.name,
                    name
                );
            }
        }
    }
}

#[test]
fn s3_latest_mode_includes_modified_bundle_and_new_dependency_package() {
    let old = fixtures::to_model(&fixtures::foo_catalog());

    let mut etcd_v1_only = fixtures::etcd_catalog();
    etcd_v1_only.bundles.retain(|b| b.name == "etcd.v0.9.1");
    let new = merged(&with_requirement("foo.v0.1.0", "etcd", ">=0.9.0"), &etcd_v1_only);

    let out = diff(&old, &new, &with_deps()).expect("diff succeeds");
    assert_eq!(
        bundle_names(&out, "foo", "stable"),
        vec!["foo.v0.1.0"],
        "the modified bundle is included"
    );
    assert_eq!(
        bundle_names(&out, "etcd", "stable"),
        vec!["etcd.v0.9.1"],
        "the new dependency package is included in full"
    );
}

#[test]
fn dependencies_satisfied_by_old_catalog_are_not_pulled() {
    let old = merged(&fixtures::foo_catalog(), &fixtures::etcd_catalog());
    let new = merged(
        &with_requirement("foo.v0.1.0", "etcd", ">=0.9.0"),
        &fixtures::etcd_catalog(),
    );

    let out = diff(&old, &new, &with_deps()).expect("diff succeeds");
    assert_eq!(
        out.packages.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["foo"],
        "requirements satisfied by the old catalog add nothing"
    );
}

#[test]
fn non_additive_include_restricts_output() {
    let old = fixtures::to_model(&fixtures::foo_catalog());
    let new = merged(&fixtures::foo_catalog(), &fixtures::etcd_catalog());

    let config = DiffConfig {
        skip_dependencies: true,
        include: Some(include_package("etcd")),
        ..Default::default()
    };
    let out = diff(&old, &new, &config).expect("diff succeeds");
    assert_eq!(out.packages.keys().map(String::as_str).collect::<Vec<_>>(), vec!["etcd"]);
    assert_eq!(
        bundle_names(&out, "etcd", "stable"),
        vec!["etcd.v0.9.1", "etcd.v0.9.2"]
    );
}

#[test]
fn additive_include_unions_with_heads() {
    let new = merged(&fixtures::foo_catalog(), &fixtures::etcd_catalog());

    let config = DiffConfig {
        skip_dependencies: true,
        include: Some(include_version("etcd", "stable", "0.9.1")),
        include_additive: true,
        ..Default::default()
    };
    let out = diff(&Model::default(), &new, &config).expect("diff succeeds");
    assert_eq!(
        bundle_names(&out, "etcd", "stable"),
        vec!["etcd.v0.9.1", "etcd.v0.9.2"],
        "the named non-head bundle joins the head output"
    );
    assert_eq!(bundle_names(&out, "foo", "stable"), vec!["foo.v0.2.0"]);
}

#[test]
fn non_head_include_requires_explicit_policy() {
    let new = merged(&fixtures::foo_catalog(), &fixtures::etcd_catalog());

    let mut config = DiffConfig {
        skip_dependencies: true,
        include: Some(include_version("etcd", "stable", "0.9.1")),
        ..Default::default()
    };

    match diff(&Model::default(), &new, &config) {
        Err(Error::Configuration(msg)) => {
            assert!(msg.contains("non-head policy is required"), "message: {}", msg)
        }
        other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
    }

    config.non_head_policy = Some(NonHeadPolicy::Reject);
    match diff(&Model::default(), &new, &config) {
        Err(Error::Configuration(msg)) => {
            assert!(msg.contains("refused by policy"), "message: {}", msg)
        }
        other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
    }

    config.non_head_policy = Some(NonHeadPolicy::Include);
    let out = diff(&Model::default(), &new, &config).expect("diff succeeds");
    assert_eq!(out.packages.keys().map(String::as_str).collect::<Vec<_>>(), vec!["etcd"]);
    assert_eq!(bundle_names(&out, "etcd", "stable"), vec!["etcd.v0.9.1"]);
}

#[test]
fn include_of_unknown_version_fails() {
    let new = merged(&fixtures::foo_catalog(), &fixtures::etcd_catalog());

    let config = DiffConfig {
        skip_dependencies: true,
        include: Some(include_version("etcd", "stable", "9.9.9")),
        non_head_policy: Some(NonHeadPolicy::Include),
        ..Default::default()
    };
    match diff(&Model::default(), &new, &config) {
        Err(Error::NotFound(msg)) => {
            assert!(msg.contains("9.9.9"), "message: {}", msg)
        }
        other => panic!("expected not-found error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn empty_default_channel_is_reattached() {
    let old = fixtures::to_model(&fixtures::foo_catalog());
    let mut new_cfg = fixtures::foo_catalog();
    new_cfg.bundles.push(fixtures::bundle(
        "foo",
        "foo.v0.2.0-alpha.2",
        "0.2.0-alpha.2",
        &[("fast", "foo.v0.2.0-alpha.1")],
    ));
    let new = fixtures::to_model(&new_cfg);

    let out = diff(&old, &new, &skip_deps()).expect("diff succeeds");
    let pkg = &out.packages["foo"];
    assert_eq!(
        bundle_names(&out, "foo", "fast"),
        vec!["foo.v0.2.0-alpha.2"]
    );
    assert!(
        pkg.channels["stable"].bundles.is_empty(),
        "the default channel is attached even though empty"
    );
}
