// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Writing declarative configs as JSON streams, YAML streams or directory
//! trees.
//!
//! All writers emit documents in the same order: per-package groups sorted
//! by package name, with the package document first, bundles sorted by name,
//! then other schemas sorted by schema; documents that carry no `package`
//! field come last, sorted by schema.

use crate::declcfg::{Bundle, DeclarativeConfig, Meta, Package, GLOBAL_FILE};
use crate::errors::Error;
use crate::property;
use camino::Utf8Path;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

/// Writes the config as a stream of indented JSON documents.
///
/// HTML-relevant characters (`<`, `>`, `&`) are not escaped, so output
/// produced here round-trips byte-stably through [`load_reader`].
///
/// [`load_reader`]: crate::declcfg::load_reader
pub fn write_json(cfg: &DeclarativeConfig, w: &mut dyn Write) -> Result<(), Error> {
    for_each_document(cfg, &mut |doc| {
        let text = to_json_doc(doc)?;
        w.write_all(text.as_bytes())
            .map_err(|err| Error::io("write declarative config", err))
    })
}

/// Writes the config as a stream of `---`-separated YAML documents.
pub fn write_yaml(cfg: &DeclarativeConfig, w: &mut dyn Write) -> Result<(), Error> {
    for_each_document(cfg, &mut |doc| {
        let text = doc.to_yaml()?;
        w.write_all(b"---\n")
            .and_then(|_| w.write_all(text.as_bytes()))
            .map_err(|err| Error::io("write declarative config", err))
    })
}

/// Writes the config as a directory tree: one subdirectory per package
/// containing `<package>.json` plus any referenced bundle object files at
/// their relative paths, and a `__global.json` for non-packaged documents.
///
/// Fails if `root` exists and is not empty.
pub fn write_dir(cfg: &DeclarativeConfig, root: impl AsRef<Utf8Path>) -> Result<(), Error> {
    let root = root.as_ref();
    if let Ok(mut entries) = fs::read_dir(root) {
        if entries.next().is_some() {
            return Err(Error::Configuration(format!(
                "target directory {} exists and is not empty",
                root
            )));
        }
    }
    fs::create_dir_all(root).map_err(|err| Error::io(format!("create {}", root), err))?;

    let grouped = group_by_package(cfg);
    for (pkg_name, group) in &grouped.packages {
        let pkg_dir = root.join(pkg_name);
        fs::create_dir_all(&pkg_dir)
            .map_err(|err| Error::io(format!("create {}", pkg_dir), err))?;

        let path = pkg_dir.join(format!("{}.json", pkg_name));
        let mut file = fs::File::create(&path)
            .map_err(|err| Error::io(format!("create {}", path), err))?;
        let sub = DeclarativeConfig {
            packages: group.package.iter().map(|&p| p.clone()).collect(),
            bundles: group.bundles.iter().map(|&b| b.clone()).collect(),
            others: group.others.iter().map(|&m| m.clone()).collect(),
        };
        write_json(&sub, &mut file)?;

        let mut ref_paths = Vec::new();
        for bundle in &group.bundles {
            ref_paths.extend(write_object_refs(bundle, &pkg_dir)?);
        }
        // Object files are not documents; an ignore file keeps the loader's
        // walker away from them while refs still resolve by path.
        if !ref_paths.is_empty() {
            ref_paths.sort_unstable();
            ref_paths.dedup();
            let path = pkg_dir.join(crate::declcfg::load::INDEX_IGNORE);
            fs::write(&path, ref_paths.join("\n") + "\n")
                .map_err(|err| Error::io(format!("write {}", path), err))?;
        }
    }

    if !grouped.global.is_empty() {
        let path = root.join(GLOBAL_FILE);
        let mut file = fs::File::create(&path)
            .map_err(|err| Error::io(format!("create {}", path), err))?;
        let sub = DeclarativeConfig {
            others: grouped.global.iter().map(|&m| m.clone()).collect(),
            ..Default::default()
        };
        write_json(&sub, &mut file)?;
    }
    Ok(())
}

/// Writes a bundle's by-reference object files under the package directory
/// and returns the relative paths written.
///
/// Object contents are only known when the bundle was loaded from a
/// directory source (the `objects` list is aligned with its object
/// properties); otherwise reference files are skipped.
fn write_object_refs(bundle: &Bundle, pkg_dir: &Utf8Path) -> Result<Vec<String>, Error> {
    let props = match property::parse(&bundle.properties) {
        Ok(props) => props,
        Err(_) => return Ok(Vec::new()),
    };
    if props.bundle_objects.len() != bundle.objects.len() {
        return Ok(Vec::new());
    }
    let mut written = Vec::new();
    for (obj, content) in props.bundle_objects.iter().zip(&bundle.objects) {
        if !obj.is_ref() {
            continue;
        }
        let ref_path = Utf8Path::new(&obj.ref_);
        if ref_path.is_absolute()
            || ref_path.components().any(|c| c.as_str() == "..")
        {
            return Err(Error::Format(format!(
                "bundle {:?} has invalid object reference {:?}",
                bundle.name, obj.ref_
            )));
        }
        let path = pkg_dir.join(ref_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io(format!("create {}", parent), err))?;
        }
        fs::write(&path, content.as_bytes())
            .map_err(|err| Error::io(format!("write {}", path), err))?;
        written.push(obj.ref_.clone());
    }
    Ok(written)
}

/// A document reference in writer order.
enum Document<'a> {
    Package(&'a Package),
    Bundle(&'a Bundle),
    Other(&'a Meta),
}

impl Document<'_> {
    fn to_yaml(&self) -> Result<String, Error> {
        let text = match self {
            Document::Package(p) => serde_yaml::to_string(p)?,
            Document::Bundle(b) => serde_yaml::to_string(b)?,
            Document::Other(m) => serde_yaml::to_string(m)?,
        };
        Ok(text)
    }
}

impl Serialize for Document<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Document::Package(p) => p.serialize(serializer),
            Document::Bundle(b) => b.serialize(serializer),
            Document::Other(m) => m.serialize(serializer),
        }
    }
}

#[derive(Default)]
struct PackageGroup<'a> {
    package: Option<&'a Package>,
    bundles: Vec<&'a Bundle>,
    others: Vec<&'a Meta>,
}

struct Grouped<'a> {
    packages: BTreeMap<&'a str, PackageGroup<'a>>,
    global: Vec<&'a Meta>,
}

fn group_by_package(cfg: &DeclarativeConfig) -> Grouped<'_> {
    let mut packages: BTreeMap<&str, PackageGroup<'_>> = BTreeMap::new();
    let mut global = Vec::new();

    for pkg in &cfg.packages {
        packages.entry(&pkg.name).or_default().package = Some(pkg);
    }
    for bundle in &cfg.bundles {
        packages.entry(&bundle.package).or_default().bundles.push(bundle);
    }
    for other in &cfg.others {
        if other.package.is_empty() {
            global.push(other);
        } else {
            packages.entry(&other.package).or_default().others.push(other);
        }
    }

    for group in packages.values_mut() {
        group.bundles.sort_by(|a, b| a.name.cmp(&b.name));
        group.others.sort_by(|a, b| a.schema.cmp(&b.schema));
    }
    global.sort_by(|a, b| a.schema.cmp(&b.schema));

    Grouped { packages, global }
}

fn for_each_document(
    cfg: &DeclarativeConfig,
    f: &mut dyn FnMut(&Document<'_>) -> Result<(), Error>,
) -> Result<(), Error> {
    let grouped = group_by_package(cfg);
    for group in grouped.packages.values() {
        if let Some(pkg) = group.package {
            f(&Document::Package(pkg))?;
        }
        for bundle in &group.bundles {
            f(&Document::Bundle(bundle))?;
        }
        for other in &group.others {
            f(&Document::Other(other))?;
        }
    }
    for other in &grouped.global {
        f(&Document::Other(other))?;
    }
    Ok(())
}

fn to_json_doc(doc: &Document<'_>) -> Result<String, Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    doc.serialize(&mut ser)?;
    let mut text = String::from_utf8(buf).expect("serde_json emits UTF-8");
    text.push('\n');
    Ok(text)
}
