// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire-schema types for the catalog query surface.
//!
//! These are the transport-neutral shapes served to clients; the RPC
//! transport itself lives outside this crate. The field names and
//! stripping behavior match the legacy registry API so existing clients
//! keep working against either a model-backed or a cache-backed server.

use crate::errors::Error;
use crate::model;
use crate::property::{
    GroupVersionKind, TYPE_BUNDLE_OBJECT, TYPE_CHANNEL, TYPE_GVK_REQUIRED,
    TYPE_PACKAGE_REQUIRED, TYPE_SKIPS, TYPE_SKIP_RANGE,
};
use serde::{Deserialize, Serialize};

/// A package, with its channels and their current heads.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// Package name.
    pub name: String,
    /// Name of the default channel.
    pub default_channel_name: String,
    /// The package's channels.
    pub channels: Vec<Channel>,
}

/// A channel and its head bundle.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Channel name.
    pub name: String,
    /// Name of the channel's head bundle.
    pub csv_name: String,
}

/// One replaces edge in a channel's upgrade graph.
#[derive(Clone, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    /// Owning package.
    pub package_name: String,
    /// Owning channel.
    pub channel_name: String,
    /// The bundle this entry describes.
    pub bundle_name: String,
    /// The bundle it replaces, or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
}

/// A property as served over the wire: the value is a compact JSON string.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Property {
    /// The type discriminator.
    #[serde(rename = "type")]
    pub type_: String,
    /// Compact JSON encoding of the property value.
    pub value: String,
}

/// A dependency summary: a required API or package range.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Dependency {
    /// The dependency type: `olm.gvk` or `olm.package`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Compact JSON encoding of the dependency value.
    pub value: String,
}

/// A bundle as served over the wire.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// The bundle's CSV name (its bundle name).
    pub csv_name: String,
    /// Owning package.
    pub package_name: String,
    /// Owning channel.
    pub channel_name: String,
    /// The bundle's image reference, or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bundle_path: String,
    /// The bundle's CSV document. Stripped when `bundle_path` is set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csv_json: String,
    /// The bundle's object documents. Stripped when `bundle_path` is set.
    #[serde(default, rename = "object", skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<String>,
    /// Bundle version.
    pub version: String,
    /// Semver range of versions this bundle can upgrade from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub skip_range: String,
    /// Names of bundles this one skips.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skips: Vec<String>,
    /// The bundle this one replaces in its channel, or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
    /// APIs this bundle provides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provided_apis: Vec<GroupVersionKind>,
    /// APIs this bundle requires.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_apis: Vec<GroupVersionKind>,
    /// The bundle's properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    /// The bundle's dependency summaries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageDependency<'a> {
    package_name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    version: &'a str,
}

impl Bundle {
    /// Converts a model bundle into its wire form.
    pub fn from_model(bundle: &model::Bundle) -> Result<Bundle, Error> {
        let props = bundle.parsed_properties()?;

        let mut provided_apis = props.gvks.clone();
        provided_apis.sort();
        provided_apis.dedup();
        let mut required_apis = props.gvks_required.clone();
        required_apis.sort();
        required_apis.dedup();

        let mut dependencies = Vec::new();
        for gvk in &required_apis {
            dependencies.push(Dependency {
                type_: "olm.gvk".to_string(),
                value: serde_json::to_string(gvk)?,
            });
        }
        for req in &props.packages_required {
            dependencies.push(Dependency {
                type_: "olm.package".to_string(),
                value: serde_json::to_string(&PackageDependency {
                    package_name: &req.package_name,
                    version: &req.version_range,
                })?,
            });
        }

        // Channel memberships, skips and objects are carried by dedicated
        // fields, so their property forms are not repeated here.
        let mut properties = Vec::new();
        for prop in &bundle.properties {
            match prop.type_.as_str() {
                TYPE_BUNDLE_OBJECT | TYPE_CHANNEL | TYPE_SKIPS | TYPE_SKIP_RANGE
                | TYPE_GVK_REQUIRED | TYPE_PACKAGE_REQUIRED => continue,
                _ => properties.push(Property {
                    type_: prop.type_.clone(),
                    value: serde_json::to_string(&prop.value)?,
                }),
            }
        }

        Ok(Bundle {
            csv_name: bundle.name.clone(),
            package_name: bundle.package.clone(),
            channel_name: bundle.channel.clone(),
            bundle_path: bundle.image.clone(),
            csv_json: bundle.csv_json.clone().unwrap_or_default(),
            objects: bundle.objects.clone(),
            version: bundle.version.to_string(),
            skip_range: bundle.skip_range.clone(),
            skips: bundle.skips.clone(),
            replaces: bundle.replaces.clone(),
            provided_apis,
            required_apis,
            properties,
            dependencies,
        })
    }

    /// Drops the heavy payload fields when the bundle's content is
    /// addressable through its image reference, matching legacy behavior.
    pub fn strip_objects(&mut self) {
        if !self.bundle_path.is_empty() {
            self.csv_json.clear();
            self.objects.clear();
        }
    }
}
