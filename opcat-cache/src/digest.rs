// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The cache digest: FNV-64a over a canonical tar stream of the catalog
//! content and the cache body.
//!
//! The stream is canonical so that the digest depends only on file paths
//! and contents: entries are emitted in sorted order with zeroed ownership
//! and timestamps. Building two caches from the same catalog bytes yields
//! identical digests.

use crate::errors::Error;
use camino::Utf8Path;
use fnv::FnvHasher;
use std::fs;
use std::hash::Hasher;
use std::io::{self, Write};
use walkdir::WalkDir;

/// Name of the digest marker file at the cache root. It is written last
/// during a rebuild and excluded from the digest itself.
pub const DIGEST_FILE: &str = "digest";

/// Computes the digest of a catalog tree plus a cache body.
///
/// `cache_dir` may not exist yet (during a first build); the digest then
/// covers only the catalog content.
pub fn compute(fbc_root: &Utf8Path, cache_dir: &Utf8Path) -> Result<String, Error> {
    let mut hasher = FnvWriter(FnvHasher::default());
    {
        let mut builder = tar::Builder::new(&mut hasher);
        append_tree(&mut builder, fbc_root, "fbc", cache_dir)?;
        if cache_dir.exists() {
            append_tree(&mut builder, cache_dir, "cache", cache_dir)?;
        }
        builder
            .finish()
            .map_err(|err| Error::io("finish digest stream", err))?;
    }
    Ok(format!("{:016x}", hasher.0.finish()))
}

/// Appends every file under `root` to the tar stream, sorted, under the
/// given path prefix. The cache's own digest marker and anything under the
/// cache directory are excluded when walking the catalog tree.
fn append_tree(
    builder: &mut tar::Builder<impl Write>,
    root: &Utf8Path,
    prefix: &str,
    cache_dir: &Utf8Path,
) -> Result<(), Error> {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            Error::io(
                format!("walk {}", root),
                err.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8Path::from_path(entry.path())
            .ok_or_else(|| Error::io(
                format!("walk {}", root),
                io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 path"),
            ))?;
        if path.starts_with(cache_dir) {
            let rel = path.strip_prefix(cache_dir).expect("prefix checked");
            if prefix == "fbc" || rel == Utf8Path::new(DIGEST_FILE) {
                continue;
            }
        }
        let rel = path.strip_prefix(root).expect("walk stays under root");

        let data = fs::read(path).map_err(|err| Error::io(format!("read {}", path), err))?;
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", prefix, rel), data.as_slice())
            .map_err(|err| Error::io(format!("digest {}", path), err))?;
    }
    Ok(())
}

struct FnvWriter(FnvHasher);

impl Write for FnvWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
