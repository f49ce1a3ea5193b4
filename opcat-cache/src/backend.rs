// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The storage backend contract for the cache body.
//!
//! Two interchangeable backends are provided: a file-per-bundle JSON layout
//! ([`JsonDirBackend`]) and an embedded SQLite database
//! ([`SqliteBackend`]). Both live entirely under the cache directory; the
//! digest marker beside them is owned by the cache itself.
//!
//! [`JsonDirBackend`]: crate::json_backend::JsonDirBackend
//! [`SqliteBackend`]: crate::sqlite_backend::SqliteBackend

use crate::errors::Error;
use crate::index::{BundleBlob, CacheIndex};

/// A cache storage backend.
///
/// Implementations must be safe for concurrent reads; the cache serializes
/// rebuilds externally.
pub trait Backend: Send + Sync {
    /// Opens the backend, creating its body layout if needed.
    fn open(&self) -> Result<(), Error>;

    /// Closes the backend, releasing any file handles.
    fn close(&self);

    /// Stores the heavy payload of a bundle.
    fn put_blob(&self, package: &str, bundle: &str, blob: &BundleBlob) -> Result<(), Error>;

    /// Loads the heavy payload of a bundle.
    fn get_blob(&self, package: &str, bundle: &str) -> Result<BundleBlob, Error>;

    /// Stores the package index.
    fn put_index(&self, index: &CacheIndex) -> Result<(), Error>;

    /// Loads the package index.
    fn get_index(&self) -> Result<CacheIndex, Error>;
}
