// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The catalog query contract, and its implementation over an in-memory
//! model.
//!
//! Every operation is deterministic: results come back in documented
//! lexicographic orders regardless of request interleaving, and there is no
//! hidden pagination. The same contract is implemented by the on-disk cache
//! in `opcat-cache`.

use crate::api;
use crate::errors::Error;
use crate::model::{Bundle, Model};

/// The catalog query surface.
///
/// Replacement queries walk the per-channel upgrade DAG: a bundle is a
/// replacer only via a `replaces` edge, never via `skips`.
pub trait CatalogQuery {
    /// Returns the names of all known packages, sorted.
    fn list_packages(&self) -> Result<Vec<String>, Error>;

    /// Returns a package with its channels and each channel's current head.
    fn get_package(&self, name: &str) -> Result<api::Package, Error>;

    /// Returns the named bundle.
    fn get_bundle(&self, pkg: &str, channel: &str, csv: &str) -> Result<api::Bundle, Error>;

    /// Returns the head bundle of the named channel.
    fn get_bundle_for_channel(&self, pkg: &str, channel: &str) -> Result<api::Bundle, Error>;

    /// Returns the unique bundle in the channel whose `replaces` edge points
    /// at `name`. Fails with `NotFound` if there is none and `Conflict` if
    /// there is more than one.
    fn get_bundle_that_replaces(
        &self,
        name: &str,
        pkg: &str,
        channel: &str,
    ) -> Result<api::Bundle, Error>;

    /// Returns every channel entry, across all packages, whose `replaces`
    /// edge points at `name`. Sorted by (package, channel, bundle).
    fn get_channel_entries_that_replace(
        &self,
        name: &str,
    ) -> Result<Vec<api::ChannelEntry>, Error>;

    /// Returns every channel entry whose bundle provides the given API.
    /// Sorted by (package, channel, bundle).
    fn get_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<api::ChannelEntry>, Error>;

    /// Like [`get_channel_entries_that_provide`], restricted to one entry
    /// per (package, channel): the latest-version provider in that channel.
    ///
    /// [`get_channel_entries_that_provide`]: CatalogQuery::get_channel_entries_that_provide
    fn get_latest_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<api::ChannelEntry>, Error>;

    /// Returns the default-channel head of the first package (by name)
    /// whose default-channel head provides the given API.
    fn get_default_bundle_that_provides(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<api::Bundle, Error>;

    /// Returns every bundle, sorted by (channel, package, bundle). Bundles
    /// with an image reference have their heavy payloads stripped.
    fn list_bundles(&self) -> Result<Vec<api::Bundle>, Error>;
}

/// A [`CatalogQuery`] implementation over a validated in-memory [`Model`].
#[derive(Clone, Debug)]
pub struct ModelQuery {
    model: Model,
}

impl ModelQuery {
    /// Creates a query view over the given model.
    pub fn new(model: Model) -> Self {
        Self { model }
    }

    /// Returns the underlying model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn bundles(&self) -> impl Iterator<Item = &Bundle> {
        self.model
            .packages
            .values()
            .flat_map(|pkg| pkg.channels.values())
            .flat_map(|ch| ch.bundles.values())
    }

    fn entry_for(bundle: &Bundle) -> api::ChannelEntry {
        api::ChannelEntry {
            package_name: bundle.package.clone(),
            channel_name: bundle.channel.clone(),
            bundle_name: bundle.name.clone(),
            replaces: bundle.replaces.clone(),
        }
    }
}

impl CatalogQuery for ModelQuery {
    fn list_packages(&self) -> Result<Vec<String>, Error> {
        Ok(self.model.packages.keys().cloned().collect())
    }

    fn get_package(&self, name: &str) -> Result<api::Package, Error> {
        let pkg = self
            .model
            .packages
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("package {:?}", name)))?;
        let mut channels = Vec::new();
        for channel in pkg.channels.values() {
            // A diffed package may carry an empty default channel; it has no
            // head to report.
            if channel.bundles.is_empty() {
                continue;
            }
            channels.push(api::Channel {
                name: channel.name.clone(),
                csv_name: channel.head()?.name.clone(),
            });
        }
        Ok(api::Package {
            name: pkg.name.clone(),
            default_channel_name: pkg.default_channel.clone(),
            channels,
        })
    }

    fn get_bundle(&self, pkg: &str, channel: &str, csv: &str) -> Result<api::Bundle, Error> {
        let pkg = self
            .model
            .packages
            .get(pkg)
            .ok_or_else(|| Error::NotFound(format!("package {:?}", pkg)))?;
        let channel = pkg
            .channels
            .get(channel)
            .ok_or_else(|| Error::NotFound(format!("channel {:?} in package {:?}", channel, pkg.name)))?;
        let bundle = channel.bundles.get(csv).ok_or_else(|| {
            Error::NotFound(format!(
                "bundle {:?} in channel {:?} of package {:?}",
                csv, channel.name, pkg.name
            ))
        })?;
        api::Bundle::from_model(bundle)
    }

    fn get_bundle_for_channel(&self, pkg: &str, channel: &str) -> Result<api::Bundle, Error> {
        let pkg = self
            .model
            .packages
            .get(pkg)
            .ok_or_else(|| Error::NotFound(format!("package {:?}", pkg)))?;
        let channel = pkg
            .channels
            .get(channel)
            .ok_or_else(|| Error::NotFound(format!("channel {:?} in package {:?}", channel, pkg.name)))?;
        api::Bundle::from_model(channel.head()?)
    }

    fn get_bundle_that_replaces(
        &self,
        name: &str,
        pkg: &str,
        channel: &str,
    ) -> Result<api::Bundle, Error> {
        let pkg = self
            .model
            .packages
            .get(pkg)
            .ok_or_else(|| Error::NotFound(format!("package {:?}", pkg)))?;
        let channel = pkg
            .channels
            .get(channel)
            .ok_or_else(|| Error::NotFound(format!("channel {:?} in package {:?}", channel, pkg.name)))?;
        let mut replacers = channel.bundles.values().filter(|b| b.replaces == name);
        match (replacers.next(), replacers.next()) {
            (Some(bundle), None) => api::Bundle::from_model(bundle),
            (None, _) => Err(Error::NotFound(format!(
                "no bundle replaces {:?} in channel {:?}",
                name, channel.name
            ))),
            (Some(_), Some(_)) => Err(Error::Conflict(format!(
                "multiple bundles replace {:?} in channel {:?}",
                name, channel.name
            ))),
        }
    }

    fn get_channel_entries_that_replace(
        &self,
        name: &str,
    ) -> Result<Vec<api::ChannelEntry>, Error> {
        let mut entries: Vec<api::ChannelEntry> = self
            .bundles()
            .filter(|b| b.replaces == name)
            .map(Self::entry_for)
            .collect();
        entries.sort();
        if entries.is_empty() {
            return Err(Error::NotFound(format!(
                "no channel entries found that replace {:?}",
                name
            )));
        }
        Ok(entries)
    }

    fn get_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<api::ChannelEntry>, Error> {
        let mut entries: Vec<api::ChannelEntry> = self
            .bundles()
            .filter(|b| b.provides(group, version, kind))
            .map(Self::entry_for)
            .collect();
        entries.sort();
        if entries.is_empty() {
            return Err(Error::NotFound(format!(
                "no channel entries found that provide {}/{}/{}",
                group, version, kind
            )));
        }
        Ok(entries)
    }

    fn get_latest_channel_entries_that_provide(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Vec<api::ChannelEntry>, Error> {
        let mut entries = Vec::new();
        for pkg in self.model.packages.values() {
            for channel in pkg.channels.values() {
                let latest = channel
                    .bundles
                    .values()
                    .filter(|b| b.provides(group, version, kind))
                    .max_by_key(|b| (b.version.clone(), b.name.clone()));
                if let Some(bundle) = latest {
                    entries.push(Self::entry_for(bundle));
                }
            }
        }
        entries.sort();
        if entries.is_empty() {
            return Err(Error::NotFound(format!(
                "no channel entries found that provide {}/{}/{}",
                group, version, kind
            )));
        }
        Ok(entries)
    }

    fn get_default_bundle_that_provides(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<api::Bundle, Error> {
        for pkg in self.model.packages.values() {
            let head = match pkg
                .channels
                .get(&pkg.default_channel)
                .filter(|ch| !ch.bundles.is_empty())
            {
                Some(channel) => channel.head()?,
                None => continue,
            };
            if head.provides(group, version, kind) {
                let mut bundle = api::Bundle::from_model(head)?;
                bundle.strip_objects();
                return Ok(bundle);
            }
        }
        Err(Error::NotFound(format!(
            "no default-channel head provides {}/{}/{}",
            group, version, kind
        )))
    }

    fn list_bundles(&self) -> Result<Vec<api::Bundle>, Error> {
        let mut keyed: Vec<(&str, &str, &str, &Bundle)> = self
            .bundles()
            .map(|b| (b.channel.as_str(), b.package.as_str(), b.name.as_str(), b))
            .collect();
        keyed.sort_by_key(|(channel, pkg, name, _)| (*channel, *pkg, *name));

        let mut bundles = Vec::with_capacity(keyed.len());
        for (_, _, _, bundle) in keyed {
            let mut api_bundle = api::Bundle::from_model(bundle)?;
            api_bundle.strip_objects();
            bundles.push(api_bundle);
        }
        Ok(bundles)
    }
}
