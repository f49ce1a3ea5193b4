// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Include configs: explicit subsets of a catalog that a diff is restricted
//! to, or extended with.

use crate::diff::add_bundle_copy;
use crate::errors::Error;
use crate::model::Model;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// The parsed form of an include file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DiffIncludeConfig {
    /// Packages to include.
    #[serde(default)]
    pub packages: Vec<DiffIncludePackage>,
}

/// One package entry in an include config.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DiffIncludePackage {
    /// Package name.
    pub name: String,
    /// Channels to include. Empty means the entire package.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<DiffIncludeChannel>,
}

/// One channel entry in an include config.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DiffIncludeChannel {
    /// Channel name.
    pub name: String,
    /// Bundle versions to include. Empty means the entire channel.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<Version>,
}

/// What to do when a non-additive include config names a non-head bundle in
/// heads-only mode. Either reading of the caller's intent is defensible, so
/// the caller must choose.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NonHeadPolicy {
    /// Restrict the output to exactly the named bundles.
    Include,
    /// Refuse the diff, naming the offending bundle.
    Reject,
}

impl DiffIncludeConfig {
    /// Parses an include config from YAML (or JSON).
    pub fn from_reader(r: impl Read) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_reader(r)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.packages.is_empty() {
            return Err(Error::Configuration(
                "include config must name at least one package".to_string(),
            ));
        }
        for pkg in &self.packages {
            if pkg.name.is_empty() {
                return Err(Error::Configuration(
                    "include config contains a package with no name".to_string(),
                ));
            }
            for ch in &pkg.channels {
                if ch.name.is_empty() {
                    return Err(Error::Configuration(format!(
                        "include config package {:?} contains a channel with no name",
                        pkg.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolves an include config against `new` and adds the named bundles to
/// `out`.
///
/// With `restrict_to_heads` set (heads-only mode, non-additive include), a
/// version entry that names a non-head bundle consults `policy`; a missing
/// policy is a configuration error.
pub(super) fn resolve(
    new: &Model,
    include: &DiffIncludeConfig,
    restrict_to_heads: bool,
    policy: Option<NonHeadPolicy>,
    out: &mut Model,
) -> Result<(), Error> {
    for inc_pkg in &include.packages {
        let pkg = new.packages.get(&inc_pkg.name).ok_or_else(|| {
            Error::NotFound(format!(
                "package {:?} named in include config not found in catalog",
                inc_pkg.name
            ))
        })?;

        if inc_pkg.channels.is_empty() {
            for channel in pkg.channels.values() {
                for bundle in channel.bundles.values() {
                    add_bundle_copy(out, pkg, bundle);
                }
            }
            continue;
        }

        for inc_ch in &inc_pkg.channels {
            let channel = pkg.channels.get(&inc_ch.name).ok_or_else(|| {
                Error::NotFound(format!(
                    "channel {:?} named in include config not found in package {:?}",
                    inc_ch.name, inc_pkg.name
                ))
            })?;

            if inc_ch.versions.is_empty() {
                for bundle in channel.bundles.values() {
                    add_bundle_copy(out, pkg, bundle);
                }
                continue;
            }

            let head_name = if restrict_to_heads {
                Some(channel.head()?.name.clone())
            } else {
                None
            };
            for version in &inc_ch.versions {
                let mut found = false;
                for bundle in channel.bundles.values() {
                    if &bundle.version != version {
                        continue;
                    }
                    found = true;
                    if let Some(head_name) = &head_name {
                        if &bundle.name != head_name {
                            match policy {
                                None => {
                                    return Err(Error::Configuration(format!(
                                        "include config names non-head bundle {:?} in \
                                         channel {:?}; an explicit non-head policy is required",
                                        bundle.name, channel.name
                                    )))
                                }
                                Some(NonHeadPolicy::Reject) => {
                                    return Err(Error::Configuration(format!(
                                        "include config names non-head bundle {:?} in \
                                         channel {:?}, refused by policy",
                                        bundle.name, channel.name
                                    )))
                                }
                                Some(NonHeadPolicy::Include) => {}
                            }
                        }
                    }
                    add_bundle_copy(out, pkg, bundle);
                }
                if !found {
                    return Err(Error::NotFound(format!(
                        "no bundle with version {} found in channel {:?} of package {:?}",
                        version, inc_ch.name, inc_pkg.name
                    )));
                }
            }
        }
    }
    Ok(())
}
