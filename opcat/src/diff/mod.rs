// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The diff engine: computes the minimum set of bundles needed to move a
//! catalog from an old state to a new state, or to extract channel heads
//! from a single catalog.
//!
//! Two modes are supported. In *heads-only* mode (the old catalog is empty)
//! the output holds the head bundle of every channel of every package. In
//! *latest* mode the output is every bundle of the new catalog that does not
//! exist unchanged in the old one. Both modes can be restricted or extended
//! through an include config, and both close over required APIs and package
//! version ranges unless dependency resolution is skipped.

use crate::errors::Error;
use crate::model::{Bundle, Channel, Model, Package};
use crate::property::GroupVersionKind;
use fnv::FnvHasher;
use once_cell::sync::Lazy;
use semver::VersionReq;
use std::collections::BTreeSet;
use std::hash::Hasher;
use tracing::warn;

mod include;

pub use include::{DiffIncludeChannel, DiffIncludeConfig, DiffIncludePackage, NonHeadPolicy};

static ANY_VERSION: Lazy<VersionReq> = Lazy::new(|| VersionReq::parse("*").expect("* parses"));

/// Configuration for a [`diff`] run.
#[derive(Clone, Debug, Default)]
pub struct DiffConfig {
    /// Skip dependency closure.
    pub skip_dependencies: bool,
    /// Restrict (or, with `include_additive`, extend) the output to the
    /// packages, channels and versions named here.
    pub include: Option<DiffIncludeConfig>,
    /// Union the include config with the mode's default output instead of
    /// replacing it.
    pub include_additive: bool,
    /// What to do when a non-additive include config names a non-head
    /// bundle in heads-only mode. There is no default: callers must decide.
    pub non_head_policy: Option<NonHeadPolicy>,
}

/// Computes the diff from `old` to `new` as a new partial model.
///
/// An empty `old` selects heads-only mode. The output model is not
/// re-validated: its channels may carry replaces edges that point outside
/// the output, and a package's default channel is attached even when empty.
pub fn diff(old: &Model, new: &Model, config: &DiffConfig) -> Result<Model, Error> {
    let heads_only = old.is_empty();
    let mut out = Model::default();

    match (&config.include, config.include_additive) {
        (Some(include), false) => {
            include::resolve(new, include, heads_only, config.non_head_policy, &mut out)?;
        }
        (include, _) => {
            if heads_only {
                heads_output(new, &mut out)?;
            } else {
                latest_output(old, new, &mut out);
            }
            if let Some(include) = include {
                // Additive include: non-head bundles are always acceptable.
                include::resolve(new, include, false, None, &mut out)?;
            }
        }
    }

    if !config.skip_dependencies {
        add_dependencies(old, new, &mut out)?;
    }

    finalize(&mut out);
    Ok(out)
}

fn heads_output(new: &Model, out: &mut Model) -> Result<(), Error> {
    for pkg in new.packages.values() {
        for channel in pkg.channels.values() {
            if channel.bundles.is_empty() {
                continue;
            }
            let head = channel.head()?;
            add_bundle_copy(out, pkg, head);
        }
    }
    Ok(())
}

fn latest_output(old: &Model, new: &Model, out: &mut Model) {
    for (name, new_pkg) in &new.packages {
        let old_pkg = old.packages.get(name);
        for channel in new_pkg.channels.values() {
            let old_channel = old_pkg.and_then(|p| p.channels.get(&channel.name));
            for bundle in channel.bundles.values() {
                let unchanged = old_channel
                    .and_then(|c| c.bundles.get(&bundle.name))
                    .map(|old_bundle| bundles_equal(old_bundle, bundle))
                    .unwrap_or(false);
                if !unchanged {
                    add_bundle_copy(out, new_pkg, bundle);
                }
            }
        }
    }
}

/// Breadth-first dependency closure: pulls in the latest bundle satisfying
/// each required GVK and each required package range that is not already
/// satisfied by the output or by the old catalog. Unsatisfiable
/// requirements are logged, not fatal.
fn add_dependencies(old: &Model, new: &Model, out: &mut Model) -> Result<(), Error> {
    let mut frontier: Vec<(String, String, String)> = bundle_keys(out);
    let mut seen_gvks: BTreeSet<GroupVersionKind> = BTreeSet::new();
    let mut seen_ranges: BTreeSet<(String, String)> = BTreeSet::new();

    while !frontier.is_empty() {
        let mut required_gvks: BTreeSet<GroupVersionKind> = BTreeSet::new();
        let mut required_ranges: BTreeSet<(String, String)> = BTreeSet::new();
        for (pkg, ch, name) in &frontier {
            let bundle = &out.packages[pkg].channels[ch].bundles[name];
            let props = bundle.parsed_properties()?;
            required_gvks.extend(props.gvks_required);
            required_ranges.extend(
                props
                    .packages_required
                    .into_iter()
                    .map(|req| (req.package_name, req.version_range)),
            );
        }
        required_gvks.retain(|gvk| seen_gvks.insert(gvk.clone()));
        required_ranges.retain(|range| seen_ranges.insert(range.clone()));

        let mut additions: Vec<&Bundle> = Vec::new();
        for gvk in &required_gvks {
            if provides_gvk(out, gvk) || provides_gvk(old, gvk) {
                continue;
            }
            match latest_provider(new, gvk) {
                Some(bundle) => additions.push(bundle),
                None => warn!(
                    gvk = %gvk,
                    "no bundle found that provides required API"
                ),
            }
        }
        for (pkg_name, range) in &required_ranges {
            let req = parse_range(pkg_name, range)?;
            if satisfies_range(out, pkg_name, &req) || satisfies_range(old, pkg_name, &req) {
                continue;
            }
            match latest_in_range(new, pkg_name, &req) {
                Some(bundle) => additions.push(bundle),
                None => warn!(
                    package = %pkg_name,
                    range = %range,
                    "no bundle found satisfying dependency range"
                ),
            }
        }

        frontier = Vec::new();
        for bundle in additions {
            let new_pkg = &new.packages[&bundle.package];
            // Add every channel's copy of the chosen bundle so the output
            // keeps its channel memberships intact.
            for channel in new_pkg.channels.values() {
                if let Some(copy) = channel.bundles.get(&bundle.name) {
                    if add_bundle_copy(out, new_pkg, copy) {
                        frontier.push((
                            copy.package.clone(),
                            copy.channel.clone(),
                            copy.name.clone(),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Drops empty channels and channel-less packages, then re-attaches each
/// surviving package's default channel even if it ended up empty.
fn finalize(out: &mut Model) {
    out.packages.retain(|_, pkg| {
        pkg.channels.retain(|_, channel| !channel.bundles.is_empty());
        !pkg.channels.is_empty()
    });
    for pkg in out.packages.values_mut() {
        if !pkg.default_channel.is_empty() && !pkg.channels.contains_key(&pkg.default_channel) {
            pkg.channels.insert(
                pkg.default_channel.clone(),
                Channel {
                    package: pkg.name.clone(),
                    name: pkg.default_channel.clone(),
                    bundles: Default::default(),
                },
            );
        }
    }
}

/// Inserts a copy of `bundle` into the output, creating package and channel
/// shells as needed. Returns false if the bundle was already present.
pub(crate) fn add_bundle_copy(out: &mut Model, src_pkg: &Package, bundle: &Bundle) -> bool {
    let pkg = out
        .packages
        .entry(src_pkg.name.clone())
        .or_insert_with(|| src_pkg.shallow_copy());
    let channel = pkg
        .channels
        .entry(bundle.channel.clone())
        .or_insert_with(|| Channel {
            package: bundle.package.clone(),
            name: bundle.channel.clone(),
            bundles: Default::default(),
        });
    if channel.bundles.contains_key(&bundle.name) {
        return false;
    }
    channel.bundles.insert(bundle.name.clone(), bundle.clone());
    true
}

fn bundle_keys(model: &Model) -> Vec<(String, String, String)> {
    let mut keys = Vec::new();
    for pkg in model.packages.values() {
        for channel in pkg.channels.values() {
            for bundle in channel.bundles.values() {
                keys.push((pkg.name.clone(), channel.name.clone(), bundle.name.clone()));
            }
        }
    }
    keys
}

fn provides_gvk(model: &Model, gvk: &GroupVersionKind) -> bool {
    all_bundles(model).any(|b| b.provides(&gvk.group, &gvk.version, &gvk.kind))
}

fn satisfies_range(model: &Model, pkg_name: &str, req: &VersionReq) -> bool {
    model
        .packages
        .get(pkg_name)
        .map(|pkg| {
            pkg.channels
                .values()
                .flat_map(|ch| ch.bundles.values())
                .any(|b| req.matches(&b.version))
        })
        .unwrap_or(false)
}

/// The latest-version bundle providing `gvk` anywhere in the model; equal
/// versions are disambiguated by the greatest bundle name.
fn latest_provider<'a>(model: &'a Model, gvk: &GroupVersionKind) -> Option<&'a Bundle> {
    all_bundles(model)
        .filter(|b| b.provides(&gvk.group, &gvk.version, &gvk.kind))
        .max_by_key(|b| (b.version.clone(), b.name.clone()))
}

fn latest_in_range<'a>(
    model: &'a Model,
    pkg_name: &str,
    req: &VersionReq,
) -> Option<&'a Bundle> {
    let pkg = model.packages.get(pkg_name)?;
    pkg.channels
        .values()
        .flat_map(|ch| ch.bundles.values())
        .filter(|b| req.matches(&b.version))
        .max_by_key(|b| (b.version.clone(), b.name.clone()))
}

fn all_bundles(model: &Model) -> impl Iterator<Item = &Bundle> {
    model
        .packages
        .values()
        .flat_map(|pkg| pkg.channels.values())
        .flat_map(|ch| ch.bundles.values())
}

fn parse_range(pkg_name: &str, range: &str) -> Result<VersionReq, Error> {
    if range.is_empty() {
        return Ok(ANY_VERSION.clone());
    }
    VersionReq::parse(range).map_err(|err| {
        Error::Format(format!(
            "invalid version range {:?} required for package {:?}: {}",
            range, pkg_name, err
        ))
    })
}

/// Decides whether two same-named bundles are equivalent: a stable hash
/// over their identifying fields plus equality of their heavy payloads.
pub(crate) fn bundles_equal(old: &Bundle, new: &Bundle) -> bool {
    bundle_hash(old) == bundle_hash(new)
        && old.csv_json == new.csv_json
        && old.objects == new.objects
}

fn bundle_hash(bundle: &Bundle) -> u64 {
    let doc = serde_json::json!({
        "name": bundle.name,
        "package": bundle.package,
        "image": bundle.image,
        "properties": bundle.properties,
        "relatedImages": bundle.related_images,
    });
    let encoded = serde_json::to_string(&doc).expect("bundle identity serializes");
    let mut hasher = FnvHasher::default();
    hasher.write(encoded.as_bytes());
    hasher.finish()
}
