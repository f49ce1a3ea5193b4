// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The in-memory catalog model: packages, channels, bundles and the upgrade
//! graph, with invariants enforced by validation.
//!
//! The model is an owning tree. Bundles refer to their owning package and
//! channel by *name* rather than by reference, which keeps back-lookups O(1)
//! through the enclosing maps without ownership cycles.

use crate::declcfg::{Icon, Meta, RelatedImage};
use crate::errors::{Error, ValidationError};
use crate::property::{self, Properties, Property, TYPE_PACKAGE};
use itertools::Itertools;
use semver::Version;
use std::collections::BTreeMap;

mod graph;

/// A validated catalog: a map from package name to [`Package`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    /// Packages, keyed by name.
    pub packages: BTreeMap<String, Package>,
    /// Documents with unrecognized schemas, carried through conversions.
    pub others: Vec<Meta>,
}

/// A package: a named set of channels with a distinguished default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Package {
    /// Package name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Package icon.
    pub icon: Option<Icon>,
    /// Name of the default channel. Must resolve into `channels`.
    pub default_channel: String,
    /// Channels, keyed by name.
    pub channels: BTreeMap<String, Channel>,
}

/// A channel: a named stream of bundles within a package, holding an
/// upgrade graph with a single head.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    /// Name of the owning package.
    pub package: String,
    /// Channel name.
    pub name: String,
    /// Bundles, keyed by name.
    pub bundles: BTreeMap<String, Bundle>,
}

/// A bundle: a single installable artifact within a channel.
///
/// A bundle that is a member of several channels appears as one `Bundle`
/// value per channel; the copies must agree on everything except their
/// channel-specific `replaces` edge.
#[derive(Clone, Debug, PartialEq)]
pub struct Bundle {
    /// Name of the owning package.
    pub package: String,
    /// Name of the owning channel.
    pub channel: String,
    /// Bundle name.
    pub name: String,
    /// Image reference. Required unless inline objects are present.
    pub image: String,
    /// Name of the bundle this one replaces in its channel, or empty.
    pub replaces: String,
    /// Names of bundles this one skips.
    pub skips: Vec<String>,
    /// Semver range of versions this bundle can upgrade from.
    pub skip_range: String,
    /// The full property list, in declaration order.
    pub properties: Vec<Property>,
    /// Images related to this bundle.
    pub related_images: Vec<RelatedImage>,
    /// The bundle's ClusterServiceVersion document, if present.
    pub csv_json: Option<String>,
    /// The bundle's object documents.
    pub objects: Vec<String>,
    /// Version from the bundle's `olm.package` property.
    pub version: Version,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            package: String::new(),
            channel: String::new(),
            name: String::new(),
            image: String::new(),
            replaces: String::new(),
            skips: Vec::new(),
            skip_range: String::new(),
            properties: Vec::new(),
            related_images: Vec::new(),
            csv_json: None,
            objects: Vec::new(),
            version: Version::new(0, 0, 0),
        }
    }
}

impl Model {
    /// Returns true if the model contains no packages.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Adds a bundle, lazily creating its owning package and channel and
    /// setting the package's default channel if previously unset.
    pub fn add_bundle(&mut self, bundle: Bundle) {
        let pkg = self
            .packages
            .entry(bundle.package.clone())
            .or_insert_with(|| Package {
                name: bundle.package.clone(),
                ..Default::default()
            });
        if pkg.default_channel.is_empty() {
            pkg.default_channel = bundle.channel.clone();
        }
        let channel = pkg
            .channels
            .entry(bundle.channel.clone())
            .or_insert_with(|| Channel {
                package: bundle.package.clone(),
                name: bundle.channel.clone(),
                bundles: BTreeMap::new(),
            });
        channel.bundles.insert(bundle.name.clone(), bundle);
    }

    /// Rewrites derived state into canonical form. Currently this drops
    /// icons with no data; property values are already held in canonical
    /// compact encoding.
    pub fn normalize(&mut self) {
        for pkg in self.packages.values_mut() {
            if pkg.icon.as_ref().is_some_and(|icon| icon.data.is_empty()) {
                pkg.icon = None;
            }
        }
    }

    /// Validates every invariant, bottom-up, accumulating all failures into
    /// a [`ValidationError`] tree.
    pub fn validate(&self) -> Result<(), Error> {
        let mut subs = Vec::new();
        for (name, pkg) in &self.packages {
            if name != &pkg.name {
                subs.push(ValidationError::new(format!(
                    "package key {:?} does not match package name {:?}",
                    name, pkg.name
                )));
            }
            if let Err(err) = pkg.validate() {
                subs.push(err);
            }
        }
        if subs.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::with_subs("invalid catalog", subs).into())
        }
    }
}

impl Package {
    /// A copy of this package without its channels, used when assembling
    /// partial catalogs.
    pub fn shallow_copy(&self) -> Package {
        Package {
            name: self.name.clone(),
            description: self.description.clone(),
            icon: self.icon.clone(),
            default_channel: self.default_channel.clone(),
            channels: BTreeMap::new(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let mut subs = Vec::new();
        if self.name.is_empty() {
            subs.push(ValidationError::new("package name must not be empty"));
        }
        if let Some(icon) = &self.icon {
            if icon.data.is_empty() {
                subs.push(ValidationError::new(
                    "icon data must be set if icon is defined",
                ));
            }
            if icon.media_type.is_empty() {
                subs.push(ValidationError::new(
                    "icon mediatype must be set if icon is defined",
                ));
            }
        }
        if self.channels.is_empty() {
            subs.push(ValidationError::new(
                "package must contain at least one channel",
            ));
        }
        if self.default_channel.is_empty() {
            subs.push(ValidationError::new("default channel must be set"));
        } else if !self.channels.contains_key(&self.default_channel) {
            subs.push(ValidationError::new(format!(
                "default channel {:?} not found in package",
                self.default_channel
            )));
        }

        // The same bundle name may appear in several channels, but only as
        // copies of one definition.
        let mut defs: BTreeMap<&str, (&Version, &str)> = BTreeMap::new();
        for channel in self.channels.values() {
            for bundle in channel.bundles.values() {
                match defs.get(bundle.name.as_str()) {
                    Some((version, image))
                        if *version != &bundle.version || *image != bundle.image =>
                    {
                        subs.push(ValidationError::new(format!(
                            "bundle {:?} has conflicting definitions across channels",
                            bundle.name
                        )));
                    }
                    Some(_) => {}
                    None => {
                        defs.insert(&bundle.name, (&bundle.version, bundle.image.as_str()));
                    }
                }
            }
        }

        for (name, channel) in &self.channels {
            if name != &channel.name {
                subs.push(ValidationError::new(format!(
                    "channel key {:?} does not match channel name {:?}",
                    name, channel.name
                )));
            }
            if channel.package != self.name {
                subs.push(ValidationError::new(format!(
                    "channel {:?} does not belong to package {:?}",
                    channel.name, self.name
                )));
            }
            // An empty channel is tolerated only as the default channel of a
            // diffed or freshly-announced package.
            let allow_empty = name == &self.default_channel;
            if let Err(err) = channel.validate(allow_empty) {
                subs.push(err);
            }
        }

        if subs.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::with_subs(
                format!("invalid package {:?}", self.name),
                subs,
            ))
        }
    }
}

impl Channel {
    fn validate(&self, allow_empty: bool) -> Result<(), ValidationError> {
        let mut subs = Vec::new();
        if self.name.is_empty() {
            subs.push(ValidationError::new("channel name must not be empty"));
        }
        if self.bundles.is_empty() && !allow_empty {
            subs.push(ValidationError::new(
                "channel must contain at least one bundle",
            ));
        }

        for (name, bundle) in &self.bundles {
            if name != &bundle.name {
                subs.push(ValidationError::new(format!(
                    "bundle key {:?} does not match bundle name {:?}",
                    name, bundle.name
                )));
            }
            if bundle.package != self.package {
                subs.push(ValidationError::new(format!(
                    "bundle {:?} does not belong to package {:?}",
                    bundle.name, self.package
                )));
            }
            if bundle.channel != self.name {
                subs.push(ValidationError::new(format!(
                    "bundle {:?} does not belong to channel {:?}",
                    bundle.name, self.name
                )));
            }
            if let Err(err) = bundle.validate() {
                subs.push(err);
            }
        }

        if !self.bundles.is_empty() {
            subs.extend(self.validate_upgrade_graph());
        }

        if subs.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::with_subs(
                format!("invalid channel {:?}", self.name),
                subs,
            ))
        }
    }
}

impl Bundle {
    /// Parses this bundle's property list into its grouped view.
    pub fn parsed_properties(&self) -> Result<Properties, Error> {
        property::parse(&self.properties)
    }

    /// Returns true if this bundle provides the given API.
    pub fn provides(&self, group: &str, version: &str, kind: &str) -> bool {
        self.parsed_properties()
            .map(|props| {
                props
                    .gvks
                    .iter()
                    .any(|gvk| gvk.group == group && gvk.version == version && gvk.kind == kind)
            })
            .unwrap_or(false)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let mut subs = Vec::new();
        if self.name.is_empty() {
            subs.push(ValidationError::new("bundle name must not be empty"));
        }

        match self.parsed_properties() {
            Ok(props) => {
                if props.packages.len() != 1 {
                    subs.push(ValidationError::new(format!(
                        "must have exactly one {:?} property, found {}",
                        TYPE_PACKAGE,
                        props.packages.len()
                    )));
                } else if props.packages[0].package_name != self.package {
                    subs.push(ValidationError::new(format!(
                        "package property {:?} does not match bundle package {:?}",
                        props.packages[0].package_name, self.package
                    )));
                }
                if props.channels.is_empty() {
                    subs.push(ValidationError::new(
                        "must have at least one \"olm.channel\" property",
                    ));
                }
                if self.image.is_empty() && props.bundle_objects.is_empty() {
                    subs.push(ValidationError::new(
                        "bundle image must be set unless it carries inline object data",
                    ));
                }
            }
            Err(err) => subs.push(ValidationError::new(err.to_string())),
        }

        if self.skips.iter().any(|s| s.is_empty()) {
            subs.push(ValidationError::new("skips entries must not be empty"));
        }
        for related in &self.related_images {
            if related.image.is_empty() {
                subs.push(ValidationError::new(format!(
                    "related image {:?} must have an image reference",
                    related.name
                )));
            }
        }

        if subs.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::with_subs(
                format!("invalid bundle {:?}", self.name),
                subs,
            ))
        }
    }
}

/// Formats a sorted, comma-separated list of names for error messages.
pub(crate) fn join_names<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().sorted().join(", ")
}
