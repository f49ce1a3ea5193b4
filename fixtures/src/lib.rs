// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canned catalogs and builders for opcat's test suites.

use camino::Utf8Path;
use opcat::declcfg::{self, Bundle, DeclarativeConfig, Package};
use opcat::errors::Error;
use opcat::model::Model;
use opcat::property::Property;
use opcat::render::{ImageSource, BUNDLE_CHANNELS_LABEL, BUNDLE_PACKAGE_LABEL, CONFIGS_LABEL};
use std::collections::BTreeMap;
use std::fs;

/// Builds a package document.
pub fn package(name: &str, default_channel: &str) -> Package {
    Package::new(name, default_channel)
}

/// Builds a bundle document with its package property and one channel
/// property per `(channel, replaces)` pair.
pub fn bundle(pkg: &str, name: &str, version: &str, channels: &[(&str, &str)]) -> Bundle {
    let mut properties = vec![Property::package(pkg, version)];
    for (channel, replaces) in channels {
        properties.push(Property::channel(*channel, *replaces));
    }
    Bundle {
        schema: declcfg::SCHEMA_BUNDLE.to_string(),
        name: name.to_string(),
        package: pkg.to_string(),
        image: format!("reg.example.com/operators/{}", name),
        properties,
        ..Default::default()
    }
}

/// The `foo` package: channel `stable` upgrades `foo.v0.1.0 -> foo.v0.2.0`,
/// channel `fast` upgrades `foo.v0.2.0-alpha.0 -> foo.v0.2.0-alpha.1`, and
/// `stable` is the default.
pub fn foo_catalog() -> DeclarativeConfig {
    DeclarativeConfig {
        packages: vec![package("foo", "stable")],
        bundles: vec![
            bundle("foo", "foo.v0.1.0", "0.1.0", &[("stable", "")]),
            bundle("foo", "foo.v0.2.0", "0.2.0", &[("stable", "foo.v0.1.0")]),
            bundle("foo", "foo.v0.2.0-alpha.0", "0.2.0-alpha.0", &[("fast", "")]),
            bundle(
                "foo",
                "foo.v0.2.0-alpha.1",
                "0.2.0-alpha.1",
                &[("fast", "foo.v0.2.0-alpha.0")],
            ),
        ],
        others: Vec::new(),
    }
}

/// The group/version/kind provided by the etcd bundles.
pub fn etcd_gvk() -> (&'static str, &'static str, &'static str) {
    ("etcd.database.coreos.com", "v1beta2", "EtcdCluster")
}

/// The `etcd` package: channel `stable` upgrades
/// `etcd.v0.9.1 -> etcd.v0.9.2`; both provide [`etcd_gvk`].
pub fn etcd_catalog() -> DeclarativeConfig {
    let (group, version, kind) = etcd_gvk();
    let mut v1 = bundle("etcd", "etcd.v0.9.1", "0.9.1", &[("stable", "")]);
    v1.properties.push(Property::gvk(group, version, kind));
    let mut v2 = bundle("etcd", "etcd.v0.9.2", "0.9.2", &[("stable", "etcd.v0.9.1")]);
    v2.properties.push(Property::gvk(group, version, kind));
    DeclarativeConfig {
        packages: vec![package("etcd", "stable")],
        bundles: vec![v1, v2],
        others: Vec::new(),
    }
}

/// Converts a config to its validated model, panicking on failure.
pub fn to_model(cfg: &DeclarativeConfig) -> Model {
    cfg.to_model().expect("fixture catalog is valid")
}

/// Writes a config as a DC directory tree, panicking on failure.
pub fn write_dc_dir(cfg: &DeclarativeConfig, dir: impl AsRef<Utf8Path>) {
    declcfg::write_dir(cfg, dir).expect("fixture catalog writes cleanly");
}

/// An image for [`InMemoryImageSource`]: labels plus files keyed by
/// image-relative path.
#[derive(Clone, Debug, Default)]
pub struct FakeImage {
    /// The image's labels.
    pub labels: BTreeMap<String, String>,
    /// The image's filesystem content.
    pub files: BTreeMap<String, String>,
}

impl FakeImage {
    /// A catalog image carrying the given config under `/configs`.
    pub fn catalog(cfg: &DeclarativeConfig) -> Self {
        let mut json = Vec::new();
        declcfg::write_json(cfg, &mut json).expect("fixture catalog serializes");
        let mut image = FakeImage::default();
        image
            .labels
            .insert(CONFIGS_LABEL.to_string(), "/configs".to_string());
        image.files.insert(
            "configs/catalog.json".to_string(),
            String::from_utf8(json).expect("JSON is UTF-8"),
        );
        image
    }

    /// A bundle image with the given package, channels and manifest files.
    pub fn bundle(pkg: &str, channels: &str, manifests: &[(&str, &str)]) -> Self {
        let mut image = FakeImage::default();
        image
            .labels
            .insert(BUNDLE_PACKAGE_LABEL.to_string(), pkg.to_string());
        image
            .labels
            .insert(BUNDLE_CHANNELS_LABEL.to_string(), channels.to_string());
        image.files.insert(
            "metadata/annotations.yaml".to_string(),
            format!(
                "annotations:\n  {}: {}\n  {}: {}\n",
                BUNDLE_PACKAGE_LABEL, pkg, BUNDLE_CHANNELS_LABEL, channels
            ),
        );
        for (name, content) in manifests {
            image
                .files
                .insert(format!("manifests/{}", name), content.to_string());
        }
        image
    }
}

/// An in-memory [`ImageSource`] serving [`FakeImage`]s by ref.
#[derive(Clone, Debug, Default)]
pub struct InMemoryImageSource {
    images: BTreeMap<String, FakeImage>,
}

impl InMemoryImageSource {
    /// Creates a source serving the given images.
    pub fn new(images: impl IntoIterator<Item = (String, FakeImage)>) -> Self {
        Self {
            images: images.into_iter().collect(),
        }
    }
}

impl ImageSource for InMemoryImageSource {
    fn labels(&self, image_ref: &str) -> Result<BTreeMap<String, String>, Error> {
        self.images
            .get(image_ref)
            .map(|image| image.labels.clone())
            .ok_or_else(|| Error::NotFound(format!("image {:?}", image_ref)))
    }

    fn unpack(&self, image_ref: &str, into: &Utf8Path) -> Result<(), Error> {
        let image = self
            .images
            .get(image_ref)
            .ok_or_else(|| Error::NotFound(format!("image {:?}", image_ref)))?;
        for (path, content) in &image.files {
            let dest = into.join(path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| Error::Format(format!("create {}: {}", parent, err)))?;
            }
            fs::write(&dest, content)
                .map_err(|err| Error::Format(format!("write {}: {}", dest, err)))?;
        }
        Ok(())
    }
}

/// A minimal ClusterServiceVersion manifest for bundle-image fixtures.
pub fn csv_manifest(name: &str, version: &str, replaces: &str) -> String {
    let mut spec = serde_json::json!({ "version": version });
    if !replaces.is_empty() {
        spec["replaces"] = serde_json::Value::String(replaces.to_string());
    }
    serde_json::json!({
        "apiVersion": "operators.coreos.com/v1alpha1",
        "kind": "ClusterServiceVersion",
        "metadata": { "name": name },
        "spec": spec,
    })
    .to_string()
}
