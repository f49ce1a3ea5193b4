// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::Error;
use crate::property::{self, Property};
use pretty_assertions::assert_eq;

#[test]
fn parse_groups_by_type() {
    let props = vec![
        Property::package("foo", "0.1.0"),
        Property::channel("stable", "foo.v0.0.9"),
        Property::channel("fast", ""),
        Property::gvk("example.com", "v1", "Widget"),
        Property::gvk_required("other.com", "v1", "Gadget"),
        Property::package_required("etcd", ">=0.9.0"),
        Property::skips("foo.v0.0.8"),
        Property::skip_range("<0.1.0"),
    ];

    let parsed = property::parse(&props).expect("known properties parse");
    assert_eq!(parsed.packages.len(), 1);
    assert_eq!(parsed.packages[0].package_name, "foo");
    assert_eq!(parsed.packages[0].version, "0.1.0");
    assert_eq!(parsed.channels.len(), 2);
    assert_eq!(parsed.channels[0].replaces, "foo.v0.0.9");
    assert_eq!(parsed.channels[1].replaces, "");
    assert_eq!(parsed.gvks.len(), 1);
    assert_eq!(parsed.gvks_required.len(), 1);
    assert_eq!(parsed.packages_required[0].version_range, ">=0.9.0");
    assert_eq!(parsed.skips, vec!["foo.v0.0.8".to_string()]);
    assert_eq!(parsed.skip_ranges, vec!["<0.1.0".to_string()]);
    assert!(parsed.others.is_empty());
}

#[test]
fn unknown_types_preserved() {
    let unknown = Property {
        type_: "olm.custom".to_string(),
        value: serde_json::json!({"x": [1, 2, 3]}),
    };
    let parsed = property::parse(&[unknown.clone()]).expect("unknown properties parse");
    assert_eq!(parsed.others, vec![unknown]);
}

#[test]
fn bad_shape_is_format_error() {
    let bad = Property {
        type_: "olm.package".to_string(),
        value: serde_json::json!({"packageName": 42}),
    };
    match property::parse(&[bad]) {
        Err(Error::Format(msg)) => assert!(msg.contains("olm.package"), "message: {}", msg),
        other => panic!("expected format error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn bundle_object_data_round_trips() {
    let prop = Property::bundle_object_data(b"{\"kind\":\"ConfigMap\"}");
    let parsed = property::parse(std::slice::from_ref(&prop)).expect("object parses");
    let object = &parsed.bundle_objects[0];
    assert!(!object.is_ref());
    assert_eq!(object.decoded_data().expect("data decodes"), b"{\"kind\":\"ConfigMap\"}");
}
