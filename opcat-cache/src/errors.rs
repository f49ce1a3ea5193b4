// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains types that describe errors that `opcat-cache` methods can
//! return.

use std::error;
use std::fmt;
use std::io;

use Error::*;

/// Error type describing the sorts of errors `opcat-cache` can return.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The cache's stored digest does not match its content. Always
    /// recoverable by rebuilding.
    Integrity {
        /// The digest stored in the cache, or `None` if no digest exists.
        stored: Option<String>,
        /// The digest computed from the current content.
        computed: String,
    },
    /// The cache has not been loaded yet.
    NotLoaded,
    /// An error from the catalog core while loading or converting the
    /// declarative config.
    Catalog(opcat::Error),
    /// An error occurred while reading or writing cache content.
    Io {
        /// Human-readable description of the operation that failed.
        context: String,
        /// The underlying I/O error.
        err: io::Error,
    },
    /// An error occurred while encoding or decoding cache metadata.
    Json(serde_json::Error),
    /// An error from the SQLite backend.
    Sqlite(rusqlite::Error),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, err: io::Error) -> Self {
        Io {
            context: context.into(),
            err,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Integrity { stored, computed } => match stored {
                Some(stored) => write!(
                    f,
                    "cache integrity check failed: stored digest {} does not match computed digest {}",
                    stored, computed
                ),
                None => write!(
                    f,
                    "cache integrity check failed: no stored digest (computed {})",
                    computed
                ),
            },
            NotLoaded => write!(f, "cache has not been loaded"),
            Catalog(err) => write!(f, "{}", err),
            Io { context, err } => write!(f, "{}: {}", context, err),
            Json(err) => write!(f, "cache metadata error: {}", err),
            Sqlite(err) => write!(f, "cache database error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Catalog(err) => Some(err),
            Io { err, .. } => Some(err),
            Json(err) => Some(err),
            Sqlite(err) => Some(err),
            Integrity { .. } | NotLoaded => None,
        }
    }
}

impl From<opcat::Error> for Error {
    fn from(err: opcat::Error) -> Self {
        Catalog(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Json(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Sqlite(err)
    }
}

/// Maps a cache error onto the query surface's error type: query-visible
/// kinds pass through, everything else surfaces as an I/O failure of the
/// backend.
pub(crate) fn to_query_error(err: Error) -> opcat::Error {
    match err {
        Catalog(err) => err,
        other => opcat::Error::Io {
            context: "cache backend".to_string(),
            err: io::Error::new(io::ErrorKind::Other, other.to_string()),
        },
    }
}
