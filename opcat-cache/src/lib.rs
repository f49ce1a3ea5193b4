// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed on-disk cache for opcat catalogs.
//!
//! A [`Cache`] sits beside a declarative-config directory and holds a
//! read-optimized copy of it: a package index for cheap queries plus one
//! blob per bundle for the heavy payloads. The cache is addressed by an
//! FNV-64a digest over the catalog bytes and the cache body; a stale or
//! tampered cache fails its integrity check and is rebuilt atomically (all
//! body files first, the digest marker last).
//!
//! Reads are safe from any number of threads. A rebuild takes the cache's
//! write lock, so readers block for the duration of the swap rather than
//! observing a half-written cache.

#![warn(missing_docs)]

mod backend;
mod digest;
pub mod errors;
mod index;
mod json_backend;
mod sqlite_backend;
#[cfg(test)]
mod unit_tests;

pub use backend::Backend;
pub use digest::DIGEST_FILE;
pub use errors::Error;
pub use index::{BundleBlob, CacheIndex, ChannelIndex, PackageIndex};
pub use json_backend::JsonDirBackend;
pub use sqlite_backend::SqliteBackend;

use crate::errors::to_query_error;
use camino::{Utf8Path, Utf8PathBuf};
use opcat::api;
use opcat::query::CatalogQuery;
use semver::Version;
use std::fs;
use std::sync::RwLock;
use tracing::{debug, info};

/// An on-disk cache over a declarative-config directory.
///
/// The type parameter selects the storage backend; see [`JsonDirBackend`]
/// and [`SqliteBackend`].
pub struct Cache<B> {
    dir: Utf8PathBuf,
    backend: B,
    index: RwLock<Option<CacheIndex>>,
}

impl Cache<JsonDirBackend> {
    /// Creates a JSON-backed cache rooted at the given directory.
    pub fn json(dir: impl Into<Utf8PathBuf>) -> Self {
        let dir = dir.into();
        let backend = JsonDirBackend::new(dir.clone());
        Self::new(dir, backend)
    }
}

impl Cache<SqliteBackend> {
    /// Creates a SQLite-backed cache rooted at the given directory.
    pub fn sqlite(dir: impl Into<Utf8PathBuf>) -> Self {
        let dir = dir.into();
        let backend = SqliteBackend::new(&dir);
        Self::new(dir, backend)
    }
}

impl<B: Backend> Cache<B> {
    /// Creates a cache with an explicit backend.
    pub fn new(dir: impl Into<Utf8PathBuf>, backend: B) -> Self {
        Self {
            dir: dir.into(),
            backend,
            index: RwLock::new(None),
        }
    }

    /// The cache's root directory.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Rebuilds the cache from the given catalog directory.
    ///
    /// The cache directory is cleared first; body files are written before
    /// the digest marker, which commits the rebuild. Readers are blocked
    /// for the duration.
    pub fn build(&self, fbc_root: &Utf8Path) -> Result<(), Error> {
        let mut guard = self.index.write().expect("cache lock poisoned");
        *guard = None;
        self.backend.close();

        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .map_err(|err| Error::io(format!("clear {}", self.dir), err))?;
        }
        fs::create_dir_all(&self.dir)
            .map_err(|err| Error::io(format!("create {}", self.dir), err))?;
        self.backend.open()?;

        let (index, blobs) = CacheIndex::from_fbc(fbc_root)?;
        for ((package, bundle), blob) in &blobs {
            self.backend.put_blob(package, bundle, blob)?;
        }
        self.backend.put_index(&index)?;
        self.backend.close();

        make_world_readable(&self.dir)?;
        let digest = digest::compute(fbc_root, &self.dir)?;
        let digest_path = self.dir.join(DIGEST_FILE);
        fs::write(&digest_path, format!("{}\n", digest))
            .map_err(|err| Error::io(format!("write {}", digest_path), err))?;
        make_world_readable(&digest_path)?;
        debug!(digest = %digest, dir = %self.dir, "cache rebuilt");
        Ok(())
    }

    /// Recomputes the digest of the catalog plus the cache body and
    /// compares it with the stored digest.
    pub fn check_integrity(&self, fbc_root: &Utf8Path) -> Result<(), Error> {
        let computed = digest::compute(fbc_root, &self.dir)?;
        let stored = fs::read_to_string(self.dir.join(DIGEST_FILE))
            .ok()
            .map(|s| s.trim().to_string());
        match stored {
            Some(stored) if stored == computed => Ok(()),
            stored => Err(Error::Integrity { stored, computed }),
        }
    }

    /// Loads the package index into memory. Bundle payloads stay on disk
    /// and load lazily, per query.
    pub fn load(&self) -> Result<(), Error> {
        let index = self.backend.get_index()?;
        *self.index.write().expect("cache lock poisoned") = Some(index);
        Ok(())
    }

    /// Checks integrity, rebuilds on mismatch, then loads.
    pub fn load_or_rebuild(&self, fbc_root: &Utf8Path) -> Result<(), Error> {
        match self.check_integrity(fbc_root) {
            Ok(()) => {}
            Err(Error::Integrity { stored, computed }) => {
                info!(
                    stored = stored.as_deref().unwrap_or("<none>"),
                    computed = %computed,
                    "cache digest mismatch, rebuilding"
                );
                self.build(fbc_root)?;
            }
            Err(err) => return Err(err),
        }
        self.load()
    }

    /// Streams every bundle into `sink`, ordered by (channel, package,
    /// bundle). Bundles with an image reference are stripped of their
    /// heavy payloads.
    pub fn send_bundles(
        &self,
        sink: &mut dyn FnMut(api::Bundle) -> Result<(), opcat::Error>,
    ) -> Result<(), opcat::Error> {
        let keys = self.with_index(|index| {
            let mut keys: Vec<(String, String, String)> = Vec::new();
            for pkg in index.packages.values() {
                for channel in pkg.channels.values() {
                    for name in channel.entries.keys() {
                        keys.push((channel.name.clone(), pkg.name.clone(), name.clone()));
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })?;

        for (channel, package, bundle) in keys {
            let entry = self.get_entry(&package, &channel, &bundle)?;
            let full = if entry.bundle_path.is_empty() {
                self.assemble(entry)?
            } else {
                entry
            };
            sink(full)?;
        }
        Ok(())
    }

    fn with_index<T>(
        &self,
        f: impl FnOnce(&CacheIndex) -> Result<T, opcat::Error>,
    ) -> Result<T, opcat::Error> {
        let guard = self.index.read().expect("cache lock poisoned");
        match guard.as_ref() {
            Some(index) => f(index),
            None => Err(to_query_error(Error::NotLoaded)),
        }
    }

    /// Attaches a bundle's heavy payload from its blob.
    fn assemble(&self, mut entry: api::Bundle) -> Result<api::Bundle, opcat::Error> {
        let blob = self
            .backend
            .get_blob(&entry.package_name, &entry.csv_name)
            .map_err(to_query_error)?;
        entry.csv_json = blob.csv_json;
        entry.objects = blob.objects;
        Ok(entry)
    }

    fn get_entry(
        &self,
        pkg: &str,
        channel: &str,
        bundle: &str,
    ) -> Result<api::Bundle, opcat::Error> {
        self.with_index(|index| {
            let pkg_index = index
                .packages
                .get(pkg)
                .ok_or_else(|| opcat::Error::NotFound(format!("package {:?}", pkg)))?;
            let channel_index = pkg_index.channels.get(channel).ok_or_else(|| {
                opcat::Error::NotFound(format!("channel {:?} in package {:?}", channel, pkg))
            })?;
            channel_index.entries.get(bundle).cloned().ok_or_else(|| {
                opcat::Error::NotFound(format!(
                    "bundle {:?} in channel {:?} of package {:?}",
                    bundle, channel, pkg
                ))
            })
        })
    }
}

impl<B: Backend> CatalogQuery for Cache<B> {
    fn list_packages(&self) -> Result<Vec<String>, opcat::Error> {
        self.with_index(|index| Ok(index.packages.keys().cloned().collect()))
    }

    fn get_package(&self, name: &str) -> Result<api::Package, opcat::Error> {
        self.with_index(|index| {
            let pkg = index
                .packages
                .get(name)
                .ok_or_else(|| opcat::Error::NotFound(format!("package {:?}", name)))?;
            Ok(api::Package {
                name: pkg.name.clone(),
                default_channel_name: pkg.default_channel.clone(),
                channels: pkg
                    .channels
                    .values()
                    .map(|ch| api::Channel {
                        name: ch.name.clone(),
                        csv_name: ch.head.clone(),
                    })
                    .collect(),
            })
        })
    }

    fn get_bundle(&self, pkg: &str, channel: &str, csv: &str) -> Result<api::Bundle, opcat::Error> {
        let entry = self.get_entry(pkg, channel, csv)?;
        self.assemble(entry)
    }

    fn get_bundle_for_channel(&self, pkg: &str, channel: &str) -> Result<api::Bundle, opcat::Error> {
        let head = self.with_index(|index| {
            let pkg_index = index
                .packages
                .get(pkg)
                .ok_or_else(|| opcat::Error::NotFound(format!("package {:?}", pkg)))?;
            let channel_index = pkg_index.channels.get(channel).ok_or_else(|| {
                opcat::Error::NotFound(format!("channel {:?} in package {:?}", channel, pkg))
            })?;
            Ok(channel_index.head.clone())
        })?;
        self.get_bundle(pkg, channel, &head)
    }

    fn get_bundle_that_replaces(
        &self,
        name: &str,
        pkg: &str,
        channel: &str,
    ) -> Result<api::Bundle, opcat::Error> {
        let replacer = self.with_index(|index| {
            let pkg_index = index
                .packages
                .get(pkg)
                .ok_or_else(|| opcat::Error::NotFound(format!("package {:?}", pkg)))?;
            let channel_index = pkg_index.channels.get(channel).ok_or_else(|| {
                opcat::Error::NotFound(format!("channel {:?} in package {:?}", channel, pkg))
            })?;
            let mut replacers = channel_index
                .entries
                .values()
                .filter(|entry| entry.replaces == name);
            match (replacers.next(), replacers.next()) {
                (Some(entry), None) => Ok(entry.clone()),
                (None, _) => Err(opcat::Error::NotFound(format!(
                    "no bundle replaces {:?} in channel {:?}",
                    name, channel
                ))),
                (Some(_), Some(_)) => Err(opcat::Error::Conflict(format!(
                    "multiple bundles replace {:?} in channel {:?}",
                    name, channel
                ))),
            }
        })?;
        self.assemble(replacer)
    }

    fn get_channel_entries_that_replace(
        &self,
        name: &str,
    ) -> Result<Vec<api::ChannelEntry>, opcat::Error> {
        self.with_index(|index| {
            let mut entries: Vec<api::ChannelEntry> = all_entries(index)
                .filter(|entry| entry.replaces == name)
                .map(channel_entry)
                .collect();
            entries.sort();
            if entries.is_empty() {
                return Err(opcat::Error::NotFound(format!(
                    "no channel entries found that replace {:?}",
                    name
                )));
            }
            Ok(entries)
        })
    }

    fn get_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<api::ChannelEntry>, opcat::Error> {
        self.with_index(|index| {
            let mut entries: Vec<api::ChannelEntry> = all_entries(index)
                .filter(|entry| provides(entry, group, version, kind))
                .map(channel_entry)
                .collect();
            entries.sort();
            if entries.is_empty() {
                return Err(opcat::Error::NotFound(format!(
                    "no channel entries found that provide {}/{}/{}",
                    group, version, kind
                )));
            }
            Ok(entries)
        })
    }

    fn get_latest_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<api::ChannelEntry>, opcat::Error> {
        self.with_index(|index| {
            let mut entries = Vec::new();
            for pkg in index.packages.values() {
                for channel in pkg.channels.values() {
                    let latest = channel
                        .entries
                        .values()
                        .filter(|entry| provides(entry, group, version, kind))
                        .max_by_key(|entry| {
                            (Version::parse(&entry.version).ok(), entry.csv_name.clone())
                        });
                    if let Some(entry) = latest {
                        entries.push(channel_entry(entry));
                    }
                }
            }
            entries.sort();
            if entries.is_empty() {
                return Err(opcat::Error::NotFound(format!(
                    "no channel entries found that provide {}/{}/{}",
                    group, version, kind
                )));
            }
            Ok(entries)
        })
    }

    fn get_default_bundle_that_provides(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<api::Bundle, opcat::Error> {
        let head = self.with_index(|index| {
            for pkg in index.packages.values() {
                let head = pkg
                    .channels
                    .get(&pkg.default_channel)
                    .and_then(|channel| channel.entries.get(&channel.head));
                if let Some(entry) = head {
                    if provides(entry, group, version, kind) {
                        return Ok(Some(entry.clone()));
                    }
                }
            }
            Ok(None)
        })?;
        match head {
            Some(entry) => {
                let mut bundle = self.assemble(entry)?;
                bundle.strip_objects();
                Ok(bundle)
            }
            None => Err(opcat::Error::NotFound(format!(
                "no default-channel head provides {}/{}/{}",
                group, version, kind
            ))),
        }
    }

    fn list_bundles(&self) -> Result<Vec<api::Bundle>, opcat::Error> {
        let mut bundles = Vec::new();
        self.send_bundles(&mut |bundle| {
            bundles.push(bundle);
            Ok(())
        })?;
        Ok(bundles)
    }
}

fn all_entries(index: &CacheIndex) -> impl Iterator<Item = &api::Bundle> {
    index
        .packages
        .values()
        .flat_map(|pkg| pkg.channels.values())
        .flat_map(|channel| channel.entries.values())
}

fn channel_entry(entry: &api::Bundle) -> api::ChannelEntry {
    api::ChannelEntry {
        package_name: entry.package_name.clone(),
        channel_name: entry.channel_name.clone(),
        bundle_name: entry.csv_name.clone(),
        replaces: entry.replaces.clone(),
    }
}

fn provides(entry: &api::Bundle, group: &str, version: &str, kind: &str) -> bool {
    entry
        .provided_apis
        .iter()
        .any(|gvk| gvk.group == group && gvk.version == version && gvk.kind == kind)
}

#[cfg(unix)]
fn make_world_readable(path: &Utf8Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let chmod = |path: &std::path::Path, mode: u32| -> Result<(), Error> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|err| {
            Error::io(format!("set permissions on {}", path.display()), err)
        })
    };

    if path.is_file() {
        return chmod(path.as_std_path(), 0o644);
    }
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(|err| {
            Error::io(
                format!("walk {}", path),
                err.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk failed")
                }),
            )
        })?;
        let mode = if entry.file_type().is_dir() { 0o755 } else { 0o644 };
        chmod(entry.path(), mode)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_world_readable(_path: &Utf8Path) -> Result<(), Error> {
    Ok(())
}
