// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The package index: the read-optimized summary of a catalog that backs
//! the query surface.
//!
//! The index holds everything needed to answer queries except the heavy
//! per-bundle payloads (CSV documents and objects), which are stored once
//! per bundle in their own blobs and loaded lazily.

use crate::errors::Error;
use camino::Utf8Path;
use opcat::{api, declcfg};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The full index, keyed by package name. Serialized as `packages.json`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CacheIndex {
    /// Per-package indices.
    pub packages: BTreeMap<String, PackageIndex>,
}

/// Index data for one package.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageIndex {
    /// Package name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Name of the default channel. May name a channel with no entries.
    pub default_channel: String,
    /// Channels, keyed by name. Channels with no bundles are not indexed.
    pub channels: BTreeMap<String, ChannelIndex>,
}

/// Index data for one channel.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelIndex {
    /// Channel name.
    pub name: String,
    /// Name of the channel's head bundle.
    pub head: String,
    /// The channel's bundles, keyed by name, with heavy payloads stripped.
    pub entries: BTreeMap<String, api::Bundle>,
}

/// The heavy payload of a bundle, stored once per (package, bundle).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleBlob {
    /// The bundle's CSV document, or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csv_json: String,
    /// The bundle's object documents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<String>,
}

impl CacheIndex {
    /// Builds the index and the per-bundle blobs from a catalog directory.
    pub fn from_fbc(
        fbc_root: &Utf8Path,
    ) -> Result<(CacheIndex, BTreeMap<(String, String), BundleBlob>), Error> {
        let cfg = declcfg::load_fs(fbc_root)?;
        let model = cfg.to_model()?;

        let mut index = CacheIndex::default();
        let mut blobs: BTreeMap<(String, String), BundleBlob> = BTreeMap::new();

        for pkg in model.packages.values() {
            let mut pkg_index = PackageIndex {
                name: pkg.name.clone(),
                description: pkg.description.clone(),
                default_channel: pkg.default_channel.clone(),
                channels: BTreeMap::new(),
            };
            for channel in pkg.channels.values() {
                if channel.bundles.is_empty() {
                    continue;
                }
                let head = channel.head()?.name.clone();
                let mut entries = BTreeMap::new();
                for bundle in channel.bundles.values() {
                    let mut api_bundle = api::Bundle::from_model(bundle)?;
                    blobs
                        .entry((pkg.name.clone(), bundle.name.clone()))
                        .or_insert_with(|| BundleBlob {
                            csv_json: std::mem::take(&mut api_bundle.csv_json),
                            objects: std::mem::take(&mut api_bundle.objects),
                        });
                    // Copies in further channels carry the same payload.
                    api_bundle.csv_json = String::new();
                    api_bundle.objects = Vec::new();
                    entries.insert(bundle.name.clone(), api_bundle);
                }
                pkg_index.channels.insert(
                    channel.name.clone(),
                    ChannelIndex {
                        name: channel.name.clone(),
                        head,
                        entries,
                    },
                );
            }
            index.packages.insert(pkg.name.clone(), pkg_index);
        }
        Ok((index, blobs))
    }
}
