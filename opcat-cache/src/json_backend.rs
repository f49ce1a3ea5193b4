// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The file-per-bundle JSON backend: `packages.json` plus one blob file per
//! bundle under `bundles/<package>/<bundle>.json`.

use crate::backend::Backend;
use crate::errors::Error;
use crate::index::{BundleBlob, CacheIndex};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;

/// Name of the index file at the backend root.
const INDEX_FILE: &str = "packages.json";

/// A [`Backend`] storing each bundle blob as its own JSON file.
#[derive(Clone, Debug)]
pub struct JsonDirBackend {
    dir: Utf8PathBuf,
}

impl JsonDirBackend {
    /// Creates a backend rooted at the given cache directory.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn blob_path(&self, package: &str, bundle: &str) -> Utf8PathBuf {
        self.dir
            .join("bundles")
            .join(package)
            .join(format!("{}.json", bundle))
    }
}

impl Backend for JsonDirBackend {
    fn open(&self) -> Result<(), Error> {
        fs::create_dir_all(self.dir.join("bundles"))
            .map_err(|err| Error::io(format!("create {}", self.dir), err))
    }

    fn close(&self) {}

    fn put_blob(&self, package: &str, bundle: &str, blob: &BundleBlob) -> Result<(), Error> {
        let path = self.blob_path(package, bundle);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io(format!("create {}", parent), err))?;
        }
        let data = serde_json::to_vec(blob)?;
        fs::write(&path, data).map_err(|err| Error::io(format!("write {}", path), err))
    }

    fn get_blob(&self, package: &str, bundle: &str) -> Result<BundleBlob, Error> {
        let path = self.blob_path(package, bundle);
        let data = read_file(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn put_index(&self, index: &CacheIndex) -> Result<(), Error> {
        let path = self.dir.join(INDEX_FILE);
        let data = serde_json::to_vec(index)?;
        fs::write(&path, data).map_err(|err| Error::io(format!("write {}", path), err))
    }

    fn get_index(&self) -> Result<CacheIndex, Error> {
        let data = read_file(&self.dir.join(INDEX_FILE))?;
        Ok(serde_json::from_slice(&data)?)
    }
}

fn read_file(path: &Utf8Path) -> Result<Vec<u8>, Error> {
    fs::read(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            Error::Catalog(opcat::Error::NotFound(format!("cache file {}", path)))
        } else {
            Error::io(format!("read {}", path), err)
        }
    })
}
