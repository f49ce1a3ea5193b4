// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loading declarative configs from directories, files and streams.

use crate::declcfg::{Bundle, DeclarativeConfig, Meta, Package, SCHEMA_BUNDLE, SCHEMA_PACKAGE};
use crate::errors::Error;
use crate::property;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::fs;
use std::io::Read;

/// File name of ignore files, in gitignore syntax. Ignore files apply to
/// their own directory and everything below it.
pub const INDEX_IGNORE: &str = ".indexignore";

/// Loads a declarative config from a directory tree.
///
/// All files under `root` are decoded, except files excluded by
/// `.indexignore` files. Discovery is depth-first and lexicographic, so the
/// result is deterministic. Documents without a `schema` field are an error.
pub fn load_fs(root: impl AsRef<Utf8Path>) -> Result<DeclarativeConfig, Error> {
    load_fs_inner(root.as_ref(), true)
}

/// Like [`load_fs`], but silently ignores documents without a `schema`
/// field. This mirrors the lenient behavior of legacy loaders that tolerated
/// non-catalog files mixed into the tree.
pub fn load_fs_lenient(root: impl AsRef<Utf8Path>) -> Result<DeclarativeConfig, Error> {
    load_fs_inner(root.as_ref(), false)
}

/// Loads a declarative config from a single stream of JSON or YAML
/// documents.
///
/// Inline `olm.bundle.object` data is decoded into the bundles' object
/// lists; object references cannot be resolved without a directory source
/// and are left unresolved.
pub fn load_reader(mut r: impl Read) -> Result<DeclarativeConfig, Error> {
    let mut buf = String::new();
    r.read_to_string(&mut buf)
        .map_err(|err| Error::io("read declarative config stream", err))?;

    let mut cfg = DeclarativeConfig::default();
    for doc in parse_documents(&buf)? {
        add_document(&mut cfg, doc, true, "<stream>")?;
    }
    for bundle in &mut cfg.bundles {
        resolve_objects(bundle, None)?;
    }
    Ok(cfg)
}

fn load_fs_inner(root: &Utf8Path, strict: bool) -> Result<DeclarativeConfig, Error> {
    let mut cfg = DeclarativeConfig::default();
    // Parallel to cfg.bundles: the directory each bundle was declared in,
    // relative to the root. Object refs resolve against it.
    let mut bundle_dirs: Vec<Utf8PathBuf> = Vec::new();

    for path in walk_files(root)? {
        let text = read_to_string(&path)?;
        let rel_dir = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .unwrap_or_else(|| Utf8Path::new(""))
            .to_owned();
        for doc in parse_documents(&text)
            .map_err(|err| Error::Format(format!("{}: {}", path, err)))?
        {
            let bundles_before = cfg.bundles.len();
            add_document(&mut cfg, doc, strict, path.as_str())?;
            for _ in bundles_before..cfg.bundles.len() {
                bundle_dirs.push(rel_dir.clone());
            }
        }
    }

    for (bundle, dir) in cfg.bundles.iter_mut().zip(&bundle_dirs) {
        resolve_objects(bundle, Some((root, dir.as_path())))?;
    }
    Ok(cfg)
}

/// Returns all candidate files under `root`, honoring `.indexignore` files,
/// in a deterministic depth-first lexicographic order.
fn walk_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, Error> {
    let mut builder = ignore::WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .add_custom_ignore_filename(INDEX_IGNORE);
    builder.sort_by_file_name(|a, b| a.cmp(b));

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry =
            entry.map_err(|err| Error::Format(format!("walk {}: {}", root, err)))?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if entry.file_name() == INDEX_IGNORE {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(entry.into_path())
            .map_err(|path| Error::Format(format!("non-UTF-8 path: {}", path.display())))?;
        files.push(path);
    }
    Ok(files)
}

fn read_to_string(path: &Utf8Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|err| Error::io(format!("read {}", path), err))
}

/// Splits a file's contents into decoded documents.
///
/// A file is either a stream of concatenated JSON objects or a
/// `---`-separated YAML multi-document file. Unicode escapes for `<`, `>`
/// and `&` are rewritten before structural parsing so that JSON emitted by
/// HTML-escaping encoders round-trips byte-stably.
fn parse_documents(text: &str) -> Result<Vec<serde_json::Value>, Error> {
    let text = rewrite_escapes(text);
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut docs = Vec::new();
    if trimmed.starts_with('{') {
        for doc in serde_json::Deserializer::from_str(&text).into_iter::<serde_json::Value>() {
            docs.push(doc?);
        }
    } else {
        for de in serde_yaml::Deserializer::from_str(&text) {
            let doc = serde_json::Value::deserialize(de)?;
            if doc.is_null() {
                // An empty YAML document decodes to null; skip it.
                continue;
            }
            docs.push(doc);
        }
    }
    Ok(docs)
}

fn rewrite_escapes(text: &str) -> String {
    text.replace("\\u003c", "<")
        .replace("\\u003e", ">")
        .replace("\\u0026", "&")
}

fn add_document(
    cfg: &mut DeclarativeConfig,
    doc: serde_json::Value,
    strict: bool,
    source: &str,
) -> Result<(), Error> {
    let meta = match Meta::from_value(doc)? {
        Some(meta) => meta,
        None if strict => {
            return Err(Error::Format(format!(
                "{}: document is missing root schema field",
                source
            )))
        }
        None => return Ok(()),
    };

    match meta.schema.as_str() {
        SCHEMA_PACKAGE => {
            let pkg: Package = serde_json::from_value(meta.blob)
                .map_err(|err| Error::Format(format!("{}: parse package: {}", source, err)))?;
            cfg.packages.push(pkg);
        }
        SCHEMA_BUNDLE => {
            let bundle: Bundle = serde_json::from_value(meta.blob)
                .map_err(|err| Error::Format(format!("{}: parse bundle: {}", source, err)))?;
            cfg.bundles.push(bundle);
        }
        _ => cfg.others.push(meta),
    }
    Ok(())
}

/// Populates a bundle's `objects` and `csv_json` from its
/// `olm.bundle.object` properties.
///
/// When `dirs` is `None` (stream loading), only inline data objects are
/// resolved.
fn resolve_objects(
    bundle: &mut Bundle,
    dirs: Option<(&Utf8Path, &Utf8Path)>,
) -> Result<(), Error> {
    let props = property::parse(&bundle.properties).map_err(|err| {
        Error::Format(format!(
            "parse properties of bundle {:?}: {}",
            bundle.name, err
        ))
    })?;

    let mut objects = Vec::new();
    for obj in &props.bundle_objects {
        if obj.is_ref() {
            let (root, dir) = match dirs {
                Some(dirs) => dirs,
                None => continue,
            };
            let rel = normalize_ref(dir, Utf8Path::new(&obj.ref_)).ok_or_else(|| {
                Error::Format(format!(
                    "bundle {:?} has invalid object reference {:?}",
                    bundle.name, obj.ref_
                ))
            })?;
            let path = root.join(rel);
            objects.push(read_to_string(&path)?);
        } else {
            let data = obj.decoded_data().map_err(|err| {
                Error::Format(format!("bundle {:?}: {}", bundle.name, err))
            })?;
            let text = String::from_utf8(data).map_err(|err| {
                Error::Format(format!(
                    "bundle {:?} has non-UTF-8 object data: {}",
                    bundle.name, err
                ))
            })?;
            objects.push(text);
        }
    }

    bundle.csv_json = objects.iter().find(|o| is_csv(o)).cloned();
    bundle.objects = objects;
    Ok(())
}

fn is_csv(object: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(object)
        .ok()
        .and_then(|v| {
            v.get("kind")
                .and_then(|k| k.as_str())
                .map(|k| k == "ClusterServiceVersion")
        })
        .unwrap_or(false)
}

/// Lexically joins an object reference onto the bundle's directory,
/// refusing references that escape the config root.
fn normalize_ref(dir: &Utf8Path, ref_: &Utf8Path) -> Option<Utf8PathBuf> {
    if ref_.is_absolute() {
        return None;
    }
    let mut parts: Vec<&str> = dir.components().map(|c| c.as_str()).collect();
    for component in ref_.components() {
        match component.as_str() {
            "." => {}
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }
    Some(parts.iter().collect())
}
