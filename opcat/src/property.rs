// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bundle properties: the tagged metadata records attached to bundles.
//!
//! A property is a `{type, value}` pair where `type` selects a shape for
//! `value`. The known types are modeled as structs below; unknown types are
//! preserved verbatim and round-trip unchanged.

use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Property type for the package a bundle belongs to. Exactly one per bundle.
pub const TYPE_PACKAGE: &str = "olm.package";
/// Property type for a required package version range.
pub const TYPE_PACKAGE_REQUIRED: &str = "olm.package.required";
/// Property type for a provided API group/version/kind.
pub const TYPE_GVK: &str = "olm.gvk";
/// Property type for a required API group/version/kind.
pub const TYPE_GVK_REQUIRED: &str = "olm.gvk.required";
/// Property type for channel membership. At least one per bundle.
pub const TYPE_CHANNEL: &str = "olm.channel";
/// Property type naming a bundle this one skips.
pub const TYPE_SKIPS: &str = "olm.skips";
/// Property type holding a semver range this bundle can upgrade from.
pub const TYPE_SKIP_RANGE: &str = "olm.skipRange";
/// Property type for an object manifest carried by the bundle, inline or by
/// reference.
pub const TYPE_BUNDLE_OBJECT: &str = "olm.bundle.object";

/// A single tagged property value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Property {
    /// The type discriminator.
    #[serde(rename = "type")]
    pub type_: String,
    /// The value, with a `type`-specific shape.
    pub value: serde_json::Value,
}

impl Property {
    fn build<T: Serialize>(type_: &str, value: &T) -> Self {
        Self {
            type_: type_.to_string(),
            value: serde_json::to_value(value).expect("property shapes serialize to JSON"),
        }
    }

    /// Builds an `olm.package` property.
    pub fn package(package_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::build(
            TYPE_PACKAGE,
            &PackageProp {
                package_name: package_name.into(),
                version: version.into(),
            },
        )
    }

    /// Builds an `olm.package.required` property.
    pub fn package_required(
        package_name: impl Into<String>,
        version_range: impl Into<String>,
    ) -> Self {
        Self::build(
            TYPE_PACKAGE_REQUIRED,
            &PackageRequired {
                package_name: package_name.into(),
                version_range: version_range.into(),
            },
        )
    }

    /// Builds an `olm.gvk` property.
    pub fn gvk(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self::build(
            TYPE_GVK,
            &GroupVersionKind {
                group: group.into(),
                version: version.into(),
                kind: kind.into(),
            },
        )
    }

    /// Builds an `olm.gvk.required` property.
    pub fn gvk_required(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self::build(
            TYPE_GVK_REQUIRED,
            &GroupVersionKind {
                group: group.into(),
                version: version.into(),
                kind: kind.into(),
            },
        )
    }

    /// Builds an `olm.channel` property.
    pub fn channel(name: impl Into<String>, replaces: impl Into<String>) -> Self {
        Self::build(
            TYPE_CHANNEL,
            &ChannelProp {
                name: name.into(),
                replaces: replaces.into(),
            },
        )
    }

    /// Builds an `olm.skips` property.
    pub fn skips(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self::build(TYPE_SKIPS, &name)
    }

    /// Builds an `olm.skipRange` property.
    pub fn skip_range(range: impl Into<String>) -> Self {
        let range: String = range.into();
        Self::build(TYPE_SKIP_RANGE, &range)
    }

    /// Builds an `olm.bundle.object` property with inline base64 data.
    pub fn bundle_object_data(data: &[u8]) -> Self {
        use base64::Engine;
        Self::build(
            TYPE_BUNDLE_OBJECT,
            &BundleObject {
                ref_: String::new(),
                data: base64::engine::general_purpose::STANDARD.encode(data),
            },
        )
    }

    /// Builds an `olm.bundle.object` property referencing a file relative to
    /// the bundle document's directory.
    pub fn bundle_object_ref(ref_: impl Into<String>) -> Self {
        Self::build(
            TYPE_BUNDLE_OBJECT,
            &BundleObject {
                ref_: ref_.into(),
                data: String::new(),
            },
        )
    }
}

/// Value shape for [`TYPE_PACKAGE`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageProp {
    /// Name of the owning package. Must match the package a bundle is
    /// declared under.
    pub package_name: String,
    /// Bundle version (semver 2.0).
    pub version: String,
}

/// Value shape for [`TYPE_PACKAGE_REQUIRED`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRequired {
    /// Name of the required package.
    pub package_name: String,
    /// Semver range the required package's version must satisfy. An empty
    /// range matches any version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version_range: String,
}

/// Value shape for [`TYPE_GVK`] and [`TYPE_GVK_REQUIRED`].
///
/// The `Ord` impl sorts by (group, version, kind), the order used at every
/// query boundary.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct GroupVersionKind {
    /// API group.
    pub group: String,
    /// API version.
    pub version: String,
    /// API kind.
    pub kind: String,
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.kind)
    }
}

/// Value shape for [`TYPE_CHANNEL`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChannelProp {
    /// Channel name.
    pub name: String,
    /// Name of the bundle this one replaces in the channel, or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
}

/// Value shape for [`TYPE_BUNDLE_OBJECT`]: either a file reference or inline
/// base64 data.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BundleObject {
    /// Path of the object file, relative to the directory of the file the
    /// bundle was declared in.
    #[serde(default, rename = "ref", skip_serializing_if = "String::is_empty")]
    pub ref_: String,
    /// Base64-encoded object data.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
}

impl BundleObject {
    /// Returns true if this object is specified by reference.
    pub fn is_ref(&self) -> bool {
        !self.ref_.is_empty()
    }

    /// Decodes the inline data.
    pub fn decoded_data(&self) -> Result<Vec<u8>, Error> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|err| Error::Format(format!("invalid bundle object data: {}", err)))
    }
}

/// The parsed view of a bundle's property list, grouped by type.
///
/// Unknown property types land in `others`, in their original order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties {
    /// `olm.package` properties.
    pub packages: Vec<PackageProp>,
    /// `olm.package.required` properties.
    pub packages_required: Vec<PackageRequired>,
    /// `olm.gvk` properties.
    pub gvks: Vec<GroupVersionKind>,
    /// `olm.gvk.required` properties.
    pub gvks_required: Vec<GroupVersionKind>,
    /// `olm.channel` properties.
    pub channels: Vec<ChannelProp>,
    /// `olm.skips` properties.
    pub skips: Vec<String>,
    /// `olm.skipRange` properties.
    pub skip_ranges: Vec<String>,
    /// `olm.bundle.object` properties.
    pub bundle_objects: Vec<BundleObject>,
    /// Properties with an unrecognized type, preserved verbatim.
    pub others: Vec<Property>,
}

/// Parses a property list into its grouped view.
///
/// Fails with [`Error::Format`] if a known property type carries a value
/// that doesn't match its shape.
pub fn parse(properties: &[Property]) -> Result<Properties, Error> {
    let mut parsed = Properties::default();
    for (i, prop) in properties.iter().enumerate() {
        let fail = |err: serde_json::Error| {
            Error::Format(format!(
                "parse property[{}] of type {:?}: {}",
                i, prop.type_, err
            ))
        };
        match prop.type_.as_str() {
            TYPE_PACKAGE => parsed
                .packages
                .push(serde_json::from_value(prop.value.clone()).map_err(fail)?),
            TYPE_PACKAGE_REQUIRED => parsed
                .packages_required
                .push(serde_json::from_value(prop.value.clone()).map_err(fail)?),
            TYPE_GVK => parsed
                .gvks
                .push(serde_json::from_value(prop.value.clone()).map_err(fail)?),
            TYPE_GVK_REQUIRED => parsed
                .gvks_required
                .push(serde_json::from_value(prop.value.clone()).map_err(fail)?),
            TYPE_CHANNEL => parsed
                .channels
                .push(serde_json::from_value(prop.value.clone()).map_err(fail)?),
            TYPE_SKIPS => parsed
                .skips
                .push(serde_json::from_value(prop.value.clone()).map_err(fail)?),
            TYPE_SKIP_RANGE => parsed
                .skip_ranges
                .push(serde_json::from_value(prop.value.clone()).map_err(fail)?),
            TYPE_BUNDLE_OBJECT => parsed
                .bundle_objects
                .push(serde_json::from_value(prop.value.clone()).map_err(fail)?),
            _ => parsed.others.push(prop.clone()),
        }
    }
    Ok(parsed)
}
