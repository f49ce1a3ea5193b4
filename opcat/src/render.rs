// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The renderer: materializes a heterogeneous list of refs into a single
//! declarative config.
//!
//! A ref can be a DC directory on disk, a catalog image, or a single bundle
//! image; the image kinds are distinguished by their labels and fetched
//! through an [`ImageSource`], the out-of-core image client. Refs render
//! concurrently on the rayon pool and concatenate in argument order.

use crate::declcfg::{self, Bundle, DeclarativeConfig, SCHEMA_BUNDLE};
use crate::errors::Error;
use crate::property::{self, Property, TYPE_BUNDLE_OBJECT};
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::ops::BitOr;
use std::time::Duration;
use tracing::warn;

const IMAGE_RETRY_ATTEMPTS: u32 = 3;
const IMAGE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Label carried by catalog images whose content is a DC directory; the
/// value is the directory's path inside the image.
pub const CONFIGS_LABEL: &str = "operators.operatorframework.io.index.configs.v1";
/// Label carried by legacy catalog images backed by a SQLite database.
pub const DB_LABEL: &str = "operators.operatorframework.io.index.database.v1";
/// Label carried by bundle images; the value is the bundle's package name.
pub const BUNDLE_PACKAGE_LABEL: &str = "operators.operatorframework.io.bundle.package.v1";
/// Label naming a bundle image's channel memberships, comma-separated.
pub const BUNDLE_CHANNELS_LABEL: &str = "operators.operatorframework.io.bundle.channels.v1";

/// The kinds of refs the renderer can materialize.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefType {
    /// A declarative config directory on disk.
    DcDir,
    /// A catalog image carrying a declarative config.
    DcImage,
    /// A legacy catalog image carrying a SQLite database.
    DbImage,
    /// A single bundle image.
    BundleImage,
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefType::DcDir => "declarative config directory",
            RefType::DcImage => "catalog image",
            RefType::DbImage => "database image",
            RefType::BundleImage => "bundle image",
        };
        write!(f, "{}", name)
    }
}

/// A set of allowed [`RefType`]s. Callers that cannot accept certain ref
/// kinds (the diff driver disallows raw bundle refs, for instance) restrict
/// the renderer with a mask.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RefMask(u8);

impl RefMask {
    /// Allows DC directory refs.
    pub const DC_DIR: RefMask = RefMask(1);
    /// Allows catalog image refs.
    pub const DC_IMAGE: RefMask = RefMask(1 << 1);
    /// Allows legacy database image refs.
    pub const DB_IMAGE: RefMask = RefMask(1 << 2);
    /// Allows bundle image refs.
    pub const BUNDLE_IMAGE: RefMask = RefMask(1 << 3);
    /// Allows every ref kind.
    pub const ALL: RefMask = RefMask(0b1111);

    /// Returns true if the mask allows the given ref kind.
    pub fn allows(self, kind: RefType) -> bool {
        self.0 & RefMask::from(kind).0 != 0
    }
}

impl From<RefType> for RefMask {
    fn from(kind: RefType) -> Self {
        match kind {
            RefType::DcDir => RefMask::DC_DIR,
            RefType::DcImage => RefMask::DC_IMAGE,
            RefType::DbImage => RefMask::DB_IMAGE,
            RefType::BundleImage => RefMask::BUNDLE_IMAGE,
        }
    }
}

impl BitOr for RefMask {
    type Output = RefMask;

    fn bitor(self, rhs: RefMask) -> RefMask {
        RefMask(self.0 | rhs.0)
    }
}

/// The out-of-core image client: resolves image labels and unpacks image
/// filesystems. Implementations own registry transport, TLS settings and
/// retry schedules.
pub trait ImageSource: Send + Sync {
    /// Returns the labels of the given image.
    fn labels(&self, image_ref: &str) -> Result<BTreeMap<String, String>, Error>;

    /// Unpacks the image's filesystem under the given directory.
    fn unpack(&self, image_ref: &str, into: &Utf8Path) -> Result<(), Error>;
}

/// A render request: refs plus the kinds the caller accepts.
pub struct Render<'a> {
    /// The refs to materialize, in output order.
    pub refs: Vec<String>,
    /// The ref kinds this caller accepts.
    pub allowed_ref_mask: RefMask,
    /// The image client used for image refs.
    pub image_source: &'a dyn ImageSource,
}

impl Render<'_> {
    /// Materializes every ref and concatenates the results into one
    /// self-contained declarative config.
    pub fn run(&self) -> Result<DeclarativeConfig, Error> {
        let configs: Vec<DeclarativeConfig> = self
            .refs
            .par_iter()
            .map(|r| self.render_ref(r))
            .collect::<Result<_, _>>()?;

        let mut combined = DeclarativeConfig::default();
        for cfg in configs {
            combined.extend(cfg);
        }
        inline_objects(&mut combined);
        Ok(combined)
    }

    fn render_ref(&self, r: &str) -> Result<DeclarativeConfig, Error> {
        if Utf8Path::new(r).is_dir() {
            self.check_allowed(r, RefType::DcDir)?;
            return declcfg::load_fs(Utf8Path::new(r));
        }

        let labels = with_retries(|| self.image_source.labels(r))?;
        if let Some(configs_path) = labels.get(CONFIGS_LABEL) {
            self.check_allowed(r, RefType::DcImage)?;
            let tmp = unpack_dir()?;
            with_retries(|| self.image_source.unpack(r, tmp.path()))?;
            declcfg::load_fs(tmp.path().join(configs_path.trim_start_matches('/')))
        } else if labels.contains_key(DB_LABEL) {
            self.check_allowed(r, RefType::DbImage)?;
            Err(Error::Configuration(format!(
                "ref {:?} is a legacy database image, which is not supported",
                r
            )))
        } else if labels.contains_key(BUNDLE_PACKAGE_LABEL) {
            self.check_allowed(r, RefType::BundleImage)?;
            let tmp = unpack_dir()?;
            with_retries(|| self.image_source.unpack(r, tmp.path()))?;
            let bundle = render_bundle_image(r, tmp.path())?;
            Ok(DeclarativeConfig {
                bundles: vec![bundle],
                ..Default::default()
            })
        } else {
            Err(Error::Format(format!(
                "could not determine the type of ref {:?}",
                r
            )))
        }
    }

    fn check_allowed(&self, r: &str, kind: RefType) -> Result<(), Error> {
        if self.allowed_ref_mask.allows(kind) {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "{} ref {:?} is not allowed in this context",
                kind, r
            )))
        }
    }
}

/// Runs an image client call, retrying transient I/O failures a bounded
/// number of times on a fixed interval. Other error kinds surface
/// immediately.
fn with_retries<T>(mut f: impl FnMut() -> Result<T, Error>) -> Result<T, Error> {
    let mut attempt = 1;
    loop {
        match f() {
            Err(err @ Error::Io { .. }) if attempt < IMAGE_RETRY_ATTEMPTS => {
                warn!(attempt, error = %err, "transient image client failure, retrying");
                std::thread::sleep(IMAGE_RETRY_INTERVAL);
                attempt += 1;
            }
            other => return other,
        }
    }
}

struct UnpackDir {
    _tmp: tempfile::TempDir,
    path: Utf8PathBuf,
}

impl UnpackDir {
    fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn unpack_dir() -> Result<UnpackDir, Error> {
    let tmp = tempfile::tempdir().map_err(|err| Error::io("create unpack directory", err))?;
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .map_err(|path| Error::Format(format!("non-UTF-8 temp path: {}", path.display())))?;
    Ok(UnpackDir { _tmp: tmp, path })
}

/// Rewrites by-reference object properties to inline data so the rendered
/// config does not depend on sibling files.
fn inline_objects(cfg: &mut DeclarativeConfig) {
    for bundle in &mut cfg.bundles {
        let Ok(props) = property::parse(&bundle.properties) else {
            continue;
        };
        if props.bundle_objects.iter().all(|obj| !obj.is_ref()) {
            continue;
        }
        if props.bundle_objects.len() != bundle.objects.len() {
            continue;
        }
        let mut objects = bundle.objects.iter();
        bundle.properties = bundle
            .properties
            .iter()
            .map(|prop| {
                if prop.type_ == TYPE_BUNDLE_OBJECT {
                    let content = objects.next().expect("object list is aligned");
                    Property::bundle_object_data(content.as_bytes())
                } else {
                    prop.clone()
                }
            })
            .collect();
    }
}

#[derive(Deserialize)]
struct AnnotationsFile {
    annotations: BTreeMap<String, String>,
}

#[derive(Default, Deserialize)]
struct CsvSpec {
    #[serde(default)]
    version: String,
    #[serde(default)]
    replaces: String,
    #[serde(default)]
    skips: Vec<String>,
    #[serde(default, rename = "relatedImages")]
    related_images: Vec<declcfg::RelatedImage>,
    #[serde(default, rename = "customresourcedefinitions")]
    crds: CsvCrds,
}

#[derive(Default, Deserialize)]
struct CsvCrds {
    #[serde(default)]
    owned: Vec<CsvCrd>,
    #[serde(default)]
    required: Vec<CsvCrd>,
}

#[derive(Deserialize)]
struct CsvCrd {
    name: String,
    version: String,
    kind: String,
}

impl CsvCrd {
    /// The CRD name is `<plural>.<group>`; everything past the first dot is
    /// the API group.
    fn group(&self) -> &str {
        self.name.split_once('.').map(|(_, g)| g).unwrap_or("")
    }
}

#[derive(Deserialize)]
struct DependenciesFile {
    #[serde(default)]
    dependencies: Vec<DependencyEntry>,
}

#[derive(Deserialize)]
struct DependencyEntry {
    #[serde(rename = "type")]
    type_: String,
    value: serde_json::Value,
}

/// Synthesizes a single-bundle declarative config from an unpacked bundle
/// image: `metadata/annotations.yaml` names the package and channels, and
/// `manifests/` holds the objects, including the CSV.
fn render_bundle_image(image_ref: &str, root: &Utf8Path) -> Result<Bundle, Error> {
    let annotations_path = root.join("metadata/annotations.yaml");
    let annotations_text = fs::read_to_string(&annotations_path)
        .map_err(|err| Error::io(format!("read {}", annotations_path), err))?;
    let annotations: AnnotationsFile = serde_yaml::from_str(&annotations_text)?;
    let package = annotations
        .annotations
        .get(BUNDLE_PACKAGE_LABEL)
        .cloned()
        .ok_or_else(|| {
            Error::Format(format!(
                "bundle image {:?} has no package annotation",
                image_ref
            ))
        })?;
    let channels = annotations
        .annotations
        .get(BUNDLE_CHANNELS_LABEL)
        .map(|s| s.as_str())
        .unwrap_or("");

    let mut objects = Vec::new();
    let mut csv: Option<(String, String, CsvSpec)> = None;

    let manifests = root.join("manifests");
    let mut entries: Vec<Utf8PathBuf> = Vec::new();
    for entry in manifests
        .read_dir_utf8()
        .map_err(|err| Error::io(format!("read {}", manifests), err))?
    {
        let entry = entry.map_err(|err| Error::io(format!("read {}", manifests), err))?;
        if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            entries.push(entry.into_path());
        }
    }
    entries.sort();

    for path in entries {
        let text = fs::read_to_string(&path)
            .map_err(|err| Error::io(format!("read {}", path), err))?;
        for de in serde_yaml::Deserializer::from_str(&text) {
            let doc = serde_json::Value::deserialize(de)?;
            if doc.is_null() {
                continue;
            }
            let encoded = serde_json::to_string(&doc)?;
            if doc.get("kind").and_then(|k| k.as_str()) == Some("ClusterServiceVersion") {
                let name = doc
                    .pointer("/metadata/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let skip_range = doc
                    .pointer("/metadata/annotations/olm.skipRange")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let spec: CsvSpec = doc
                    .get("spec")
                    .map(|s| serde_json::from_value(s.clone()))
                    .transpose()?
                    .unwrap_or_default();
                csv = Some((name, skip_range, spec));
            }
            objects.push(encoded);
        }
    }

    let (csv_name, skip_range, spec) = csv.ok_or_else(|| {
        Error::Format(format!(
            "bundle image {:?} has no ClusterServiceVersion manifest",
            image_ref
        ))
    })?;

    let mut properties = vec![Property::package(package.as_str(), spec.version.as_str())];
    for channel in channels.split(',').filter(|c| !c.is_empty()) {
        properties.push(Property::channel(channel, spec.replaces.as_str()));
    }
    for crd in &spec.crds.owned {
        properties.push(Property::gvk(crd.group(), crd.version.as_str(), crd.kind.as_str()));
    }
    for crd in &spec.crds.required {
        properties.push(Property::gvk_required(
            crd.group(),
            crd.version.as_str(),
            crd.kind.as_str(),
        ));
    }
    for skip in &spec.skips {
        properties.push(Property::skips(skip.as_str()));
    }
    if !skip_range.is_empty() {
        properties.push(Property::skip_range(skip_range.as_str()));
    }

    let dependencies_path = root.join("metadata/dependencies.yaml");
    if let Ok(text) = fs::read_to_string(&dependencies_path) {
        let file: DependenciesFile = serde_yaml::from_str(&text)?;
        for dep in file.dependencies {
            match dep.type_.as_str() {
                "olm.gvk" => {
                    let gvk: property::GroupVersionKind = serde_json::from_value(dep.value)?;
                    properties.push(Property::gvk_required(gvk.group, gvk.version, gvk.kind));
                }
                "olm.package" => {
                    let pkg_dep: BTreeMap<String, String> = serde_json::from_value(dep.value)?;
                    properties.push(Property::package_required(
                        pkg_dep.get("packageName").cloned().unwrap_or_default(),
                        pkg_dep.get("version").cloned().unwrap_or_default(),
                    ));
                }
                other => {
                    return Err(Error::Format(format!(
                        "bundle image {:?} has unknown dependency type {:?}",
                        image_ref, other
                    )))
                }
            }
        }
    }

    for object in &objects {
        properties.push(Property::bundle_object_data(object.as_bytes()));
    }

    let csv_json = objects
        .iter()
        .find(|o| {
            serde_json::from_str::<serde_json::Value>(o)
                .ok()
                .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(|k| k == "ClusterServiceVersion"))
                .unwrap_or(false)
        })
        .cloned();

    Ok(Bundle {
        schema: SCHEMA_BUNDLE.to_string(),
        name: csv_name,
        package,
        image: image_ref.to_string(),
        properties,
        related_images: spec.related_images,
        csv_json,
        objects,
    })
}
