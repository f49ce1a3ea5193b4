// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The SQLite backend: one row per bundle blob in an embedded database
//! file, plus the package index as a metadata row.

use crate::backend::Backend;
use crate::errors::Error;
use crate::index::{BundleBlob, CacheIndex};
use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

/// Name of the database file at the backend root.
const DB_FILE: &str = "index.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS blobs (
    package TEXT NOT NULL,
    name    TEXT NOT NULL,
    data    TEXT NOT NULL,
    PRIMARY KEY (package, name)
);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// A [`Backend`] storing bundle blobs in an embedded SQLite database.
///
/// The connection is serialized through a mutex: reads are concurrency-safe
/// from the caller's perspective, writes happen only during rebuilds, which
/// the cache already serializes.
pub struct SqliteBackend {
    path: Utf8PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteBackend {
    /// Creates a backend rooted at the given cache directory.
    pub fn new(dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            path: dir.as_ref().join(DB_FILE),
            conn: Mutex::new(None),
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut guard = self.conn.lock().expect("cache database lock poisoned");
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        f(guard.as_ref().expect("connection was just opened"))
    }

    fn connect(&self) -> Result<Connection, Error> {
        let conn = Connection::open(&self.path)?;
        // Plain rollback journaling keeps the database a single file, so
        // the cache digest covers all backend state.
        conn.pragma_update(None, "journal_mode", "DELETE")?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }
}

impl Backend for SqliteBackend {
    fn open(&self) -> Result<(), Error> {
        self.with_conn(|_| Ok(()))
    }

    fn close(&self) {
        let mut guard = self.conn.lock().expect("cache database lock poisoned");
        *guard = None;
    }

    fn put_blob(&self, package: &str, bundle: &str, blob: &BundleBlob) -> Result<(), Error> {
        let data = serde_json::to_string(blob)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO blobs (package, name, data) VALUES (?1, ?2, ?3)",
                params![package, bundle, data],
            )?;
            Ok(())
        })
    }

    fn get_blob(&self, package: &str, bundle: &str) -> Result<BundleBlob, Error> {
        let data: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT data FROM blobs WHERE package = ?1 AND name = ?2",
                    params![package, bundle],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        match data {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(Error::Catalog(opcat::Error::NotFound(format!(
                "cache blob for bundle {:?} of package {:?}",
                bundle, package
            )))),
        }
    }

    fn put_index(&self, index: &CacheIndex) -> Result<(), Error> {
        let data = serde_json::to_string(index)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('packages', ?1)",
                params![data],
            )?;
            Ok(())
        })
    }

    fn get_index(&self) -> Result<CacheIndex, Error> {
        let data: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM meta WHERE key = 'packages'",
                    [],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        match data {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(Error::Catalog(opcat::Error::NotFound(
                "cache package index".to_string(),
            ))),
        }
    }
}
