// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::Error;
use crate::property::{self, Property};
use crate::render::{ImageSource, RefMask, RefType, Render, DB_LABEL};
use camino::Utf8PathBuf;
use fixtures::{FakeImage, InMemoryImageSource};
use pretty_assertions::assert_eq;

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir creates");
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("UTF-8 temp path");
    (tmp, path)
}

fn no_images() -> InMemoryImageSource {
    InMemoryImageSource::default()
}

#[test]
fn ref_mask_dispatch() {
    assert!(RefMask::ALL.allows(RefType::DcDir));
    assert!(RefMask::ALL.allows(RefType::DbImage));
    let dirs_only = RefMask::DC_DIR;
    assert!(dirs_only.allows(RefType::DcDir));
    assert!(!dirs_only.allows(RefType::BundleImage));
    let diff_mask = RefMask::DC_DIR | RefMask::DC_IMAGE;
    assert!(!diff_mask.allows(RefType::BundleImage));
}

#[test]
fn renders_dc_directory() {
    let cfg = fixtures::foo_catalog();
    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    fixtures::write_dc_dir(&cfg, &target);

    let source = no_images();
    let render = Render {
        refs: vec![target.to_string()],
        allowed_ref_mask: RefMask::ALL,
        image_source: &source,
    };
    let out = render.run().expect("render succeeds");
    assert_eq!(out, cfg);
}

#[test]
fn disallowed_ref_kind_is_rejected() {
    let cfg = fixtures::foo_catalog();
    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    fixtures::write_dc_dir(&cfg, &target);

    let source = no_images();
    let render = Render {
        refs: vec![target.to_string()],
        allowed_ref_mask: RefMask::DC_IMAGE,
        image_source: &source,
    };
    match render.run() {
        Err(Error::Configuration(msg)) => {
            assert!(msg.contains("not allowed"), "message: {}", msg)
        }
        other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn renders_catalog_image() {
    let cfg = fixtures::foo_catalog();
    let source = InMemoryImageSource::new([(
        "reg.example.com/catalog:latest".to_string(),
        FakeImage::catalog(&cfg),
    )]);

    let render = Render {
        refs: vec!["reg.example.com/catalog:latest".to_string()],
        allowed_ref_mask: RefMask::ALL,
        image_source: &source,
    };
    let out = render.run().expect("render succeeds");
    assert_eq!(out, cfg);
}

#[test]
fn renders_bundle_image() {
    let csv = fixtures::csv_manifest("foo.v0.3.0", "0.3.0", "foo.v0.2.0");
    let source = InMemoryImageSource::new([(
        "reg.example.com/operators/foo:v0.3.0".to_string(),
        FakeImage::bundle("foo", "stable", &[("foo.csv.yaml", &csv)]),
    )]);

    let render = Render {
        refs: vec!["reg.example.com/operators/foo:v0.3.0".to_string()],
        allowed_ref_mask: RefMask::ALL,
        image_source: &source,
    };
    let out = render.run().expect("render succeeds");

    assert!(out.packages.is_empty(), "a bundle render has no package doc");
    assert_eq!(out.bundles.len(), 1);
    let bundle = &out.bundles[0];
    assert_eq!(bundle.name, "foo.v0.3.0");
    assert_eq!(bundle.package, "foo");
    assert_eq!(bundle.image, "reg.example.com/operators/foo:v0.3.0");
    assert!(bundle.csv_json.is_some());
    assert_eq!(bundle.objects.len(), 1);

    let props = property::parse(&bundle.properties).expect("rendered properties parse");
    assert_eq!(props.packages[0].package_name, "foo");
    assert_eq!(props.packages[0].version, "0.3.0");
    assert_eq!(props.channels.len(), 1);
    assert_eq!(props.channels[0].name, "stable");
    assert_eq!(props.channels[0].replaces, "foo.v0.2.0");
    assert_eq!(props.bundle_objects.len(), 1, "objects are inlined");
    assert!(!props.bundle_objects[0].is_ref());
}

#[test]
fn database_image_is_rejected() {
    let mut image = FakeImage::default();
    image
        .labels
        .insert(DB_LABEL.to_string(), "/database/index.db".to_string());
    let source = InMemoryImageSource::new([("reg.example.com/legacy:latest".to_string(), image)]);

    let render = Render {
        refs: vec!["reg.example.com/legacy:latest".to_string()],
        allowed_ref_mask: RefMask::ALL,
        image_source: &source,
    };
    match render.run() {
        Err(Error::Configuration(msg)) => {
            assert!(msg.contains("not supported"), "message: {}", msg)
        }
        other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn render_inlines_object_refs() {
    let object = r#"{"kind":"ConfigMap","metadata":{"name":"cm"}}"#;
    let mut cfg = fixtures::foo_catalog();
    let bundle = &mut cfg.bundles[0];
    bundle
        .properties
        .push(Property::bundle_object_ref("objects/cm.json"));
    bundle.objects = vec![object.to_string()];

    let (_tmp, root) = temp_root();
    let target = root.join("catalog");
    fixtures::write_dc_dir(&cfg, &target);

    let source = no_images();
    let render = Render {
        refs: vec![target.to_string()],
        allowed_ref_mask: RefMask::ALL,
        image_source: &source,
    };
    let out = render.run().expect("render succeeds");

    let rendered = out
        .bundles
        .iter()
        .find(|b| b.name == "foo.v0.1.0")
        .expect("bundle is rendered");
    let props = property::parse(&rendered.properties).expect("rendered properties parse");
    assert_eq!(props.bundle_objects.len(), 1);
    assert!(
        !props.bundle_objects[0].is_ref(),
        "object refs are converted to inline data"
    );
    assert_eq!(
        props.bundle_objects[0].decoded_data().expect("data decodes"),
        object.as_bytes()
    );
}

#[test]
fn unknown_image_fails_with_source_error() {
    let source = no_images();
    let render = Render {
        refs: vec!["reg.example.com/missing:latest".to_string()],
        allowed_ref_mask: RefMask::ALL,
        image_source: &source,
    };
    match render.run() {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected not-found error, got {:?}", other.map(|_| ())),
    }
}

/// The trait object is usable through a plain reference, the way the CLI
/// holds it.
#[test]
fn image_source_is_object_safe() {
    let source: &dyn ImageSource = &no_images();
    assert!(matches!(
        source.labels("nope"),
        Err(Error::NotFound(_))
    ));
}
