// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion between the declarative config format and the catalog model.

use crate::declcfg::{self, DeclarativeConfig, SCHEMA_BUNDLE, SCHEMA_PACKAGE};
use crate::errors::Error;
use crate::model::{Bundle, Channel, Model, Package};
use crate::property::{self, Property, TYPE_BUNDLE_OBJECT};
use semver::Version;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Builds a validated [`Model`] from a declarative config.
///
/// Packages are created first so that their default-channel names are known;
/// bundles then create channels on first reference. A default channel that
/// was announced by its package but never referenced by any bundle is
/// materialized as an empty channel; its name always survives a round-trip.
pub fn convert_to_model(cfg: &DeclarativeConfig) -> Result<Model, Error> {
    let mut model = Model::default();

    for pkg in &cfg.packages {
        if pkg.name.is_empty() {
            return Err(Error::Format(
                "config contains package with no name".to_string(),
            ));
        }
        if model.packages.contains_key(&pkg.name) {
            return Err(Error::Format(format!(
                "duplicate package {:?}",
                pkg.name
            )));
        }
        model.packages.insert(
            pkg.name.clone(),
            Package {
                name: pkg.name.clone(),
                description: pkg.description.clone(),
                icon: pkg.icon.clone(),
                default_channel: pkg.default_channel.clone(),
                channels: BTreeMap::new(),
            },
        );
    }

    for bundle in &cfg.bundles {
        if bundle.package.is_empty() {
            return Err(Error::Format(format!(
                "bundle {:?} is missing package information",
                bundle.name
            )));
        }
        let pkg = model.packages.get_mut(&bundle.package).ok_or_else(|| {
            Error::Format(format!(
                "unknown package {:?} for bundle {:?}",
                bundle.package, bundle.name
            ))
        })?;

        let props = property::parse(&bundle.properties).map_err(|err| {
            Error::Format(format!(
                "parse properties of bundle {:?}: {}",
                bundle.name, err
            ))
        })?;
        if props.packages.len() != 1 {
            return Err(Error::Format(format!(
                "bundle {:?} must have exactly one \"olm.package\" property, found {}",
                bundle.name,
                props.packages.len()
            )));
        }
        let version = Version::parse(&props.packages[0].version).map_err(|err| {
            Error::Format(format!(
                "bundle {:?} has invalid version {:?}: {}",
                bundle.name, props.packages[0].version, err
            ))
        })?;
        if props.channels.is_empty() {
            return Err(Error::Format(format!(
                "bundle {:?} is not present in any channel",
                bundle.name
            )));
        }

        let mut seen_channels: BTreeSet<&str> = BTreeSet::new();
        for ch_prop in &props.channels {
            if ch_prop.name.is_empty() {
                return Err(Error::Format(format!(
                    "bundle {:?} has a channel membership with no name",
                    bundle.name
                )));
            }
            if !seen_channels.insert(&ch_prop.name) {
                return Err(Error::Format(format!(
                    "bundle {:?} is declared in channel {:?} more than once",
                    bundle.name, ch_prop.name
                )));
            }
            let channel = pkg
                .channels
                .entry(ch_prop.name.clone())
                .or_insert_with(|| Channel {
                    package: bundle.package.clone(),
                    name: ch_prop.name.clone(),
                    bundles: BTreeMap::new(),
                });
            if channel.bundles.contains_key(&bundle.name) {
                return Err(Error::Format(format!(
                    "duplicate bundle {:?} in channel {:?}",
                    bundle.name, ch_prop.name
                )));
            }
            channel.bundles.insert(
                bundle.name.clone(),
                Bundle {
                    package: bundle.package.clone(),
                    channel: ch_prop.name.clone(),
                    name: bundle.name.clone(),
                    image: bundle.image.clone(),
                    replaces: ch_prop.replaces.clone(),
                    skips: props.skips.clone(),
                    skip_range: props.skip_ranges.first().cloned().unwrap_or_default(),
                    properties: bundle.properties.clone(),
                    related_images: bundle.related_images.clone(),
                    csv_json: bundle.csv_json.clone(),
                    objects: bundle.objects.clone(),
                    version: version.clone(),
                },
            );
        }
    }

    for pkg in model.packages.values_mut() {
        if !pkg.default_channel.is_empty() && !pkg.channels.contains_key(&pkg.default_channel) {
            pkg.channels.insert(
                pkg.default_channel.clone(),
                Channel {
                    package: pkg.name.clone(),
                    name: pkg.default_channel.clone(),
                    bundles: BTreeMap::new(),
                },
            );
        }
    }

    model.others = cfg.others.clone();
    model.normalize();
    model.validate()?;
    Ok(model)
}

/// Flattens a model back into a declarative config.
///
/// A bundle that is a member of several channels collapses back into one
/// bundle document; its property list already carries every channel
/// membership. Bundles whose objects were populated without corresponding
/// object properties (e.g. rendered from a bundle image) surface them as
/// inline data properties.
pub fn convert_from_model(model: &Model) -> DeclarativeConfig {
    let mut cfg = DeclarativeConfig::default();
    for pkg in model.packages.values() {
        cfg.packages.push(declcfg::Package {
            schema: SCHEMA_PACKAGE.to_string(),
            name: pkg.name.clone(),
            default_channel: pkg.default_channel.clone(),
            icon: pkg.icon.clone(),
            description: pkg.description.clone(),
        });

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut bundles: Vec<&Bundle> = Vec::new();
        for channel in pkg.channels.values() {
            for bundle in channel.bundles.values() {
                if seen.insert(&bundle.name) {
                    bundles.push(bundle);
                }
            }
        }
        bundles.sort_by(|a, b| a.name.cmp(&b.name));

        for bundle in bundles {
            let mut properties = bundle.properties.clone();
            if !bundle.objects.is_empty()
                && !properties.iter().any(|p| p.type_ == TYPE_BUNDLE_OBJECT)
            {
                for object in &bundle.objects {
                    properties.push(Property::bundle_object_data(object.as_bytes()));
                }
            }
            cfg.bundles.push(declcfg::Bundle {
                schema: SCHEMA_BUNDLE.to_string(),
                name: bundle.name.clone(),
                package: pkg.name.clone(),
                image: bundle.image.clone(),
                properties,
                related_images: bundle.related_images.clone(),
                csv_json: bundle.csv_json.clone(),
                objects: bundle.objects.clone(),
            });
        }
    }
    cfg.others = model.others.clone();
    cfg
}
