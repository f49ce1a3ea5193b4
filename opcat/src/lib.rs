// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model, serialize, diff and query operator catalogs.
//!
//! `opcat` is the core of an operator-catalog toolkit. It provides:
//!
//! * the **declarative config** format ([`declcfg`]): a content-addressed
//!   stream or directory tree of tagged JSON/YAML documents describing
//!   packages and bundles;
//! * the **catalog model** ([`model`]): the validated in-memory form, with
//!   per-channel upgrade graphs linked by `replaces` and `skips` edges;
//! * the **diff engine** ([`diff`]): computes the minimum set of bundles
//!   needed to move from one catalog state to another, including transitive
//!   dependency resolution by API and semver range;
//! * the **renderer** ([`render`]): materializes directories and images
//!   uniformly into declarative configs;
//! * the **query surface** ([`query`]): the stable set of catalog
//!   operations, served here from the in-memory model and by the companion
//!   `opcat-cache` crate from an on-disk cache.
//!
//! # Examples
//!
//! Load a catalog directory, validate it and look up a channel head:
//!
//! ```no_run
//! use opcat::declcfg;
//!
//! let cfg = declcfg::load_fs("catalogs/my-catalog")?;
//! let model = cfg.to_model()?;
//! let head = model.packages["etcd"].channels["stable"].head()?;
//! println!("stable head: {}", head.name);
//! # Ok::<(), opcat::Error>(())
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod declcfg;
pub mod diff;
pub mod errors;
pub mod model;
pub mod property;
pub mod query;
pub mod render;
#[cfg(test)]
mod unit_tests;

pub use errors::{Error, ValidationError};

// Public re-exports for upstream crates used in APIs. The no_inline ensures
// that they show up as re-exports in documentation.
#[doc(no_inline)]
pub use semver::{Version, VersionReq};
#[doc(no_inline)]
pub use serde_json::Value as JsonValue;
