// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The declarative config (DC) format: the on-disk representation of a
//! catalog as a stream or tree of tagged JSON (or YAML) documents.
//!
//! Every document carries a top-level `schema` discriminator. `olm.package`
//! and `olm.bundle` documents are parsed into [`Package`] and [`Bundle`];
//! documents with any other schema are preserved as [`Meta`] blobs and
//! round-trip unchanged.

use crate::errors::Error;
use crate::property::Property;
use serde::{Deserialize, Serialize};

mod convert;
mod load;
mod write;

pub use convert::{convert_from_model, convert_to_model};
pub use load::{load_fs, load_fs_lenient, load_reader, INDEX_IGNORE};
pub use write::{write_dir, write_json, write_yaml};

/// Schema value of a package document.
pub const SCHEMA_PACKAGE: &str = "olm.package";
/// Schema value of a bundle document.
pub const SCHEMA_BUNDLE: &str = "olm.bundle";

/// File name that non-packaged documents are written to by [`write_dir`].
pub const GLOBAL_FILE: &str = "__global.json";

/// A declarative config: the parsed contents of a DC stream or directory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeclarativeConfig {
    /// Package documents.
    pub packages: Vec<Package>,
    /// Bundle documents.
    pub bundles: Vec<Bundle>,
    /// Documents with any other schema, preserved verbatim.
    pub others: Vec<Meta>,
}

impl DeclarativeConfig {
    /// Appends all documents of `other` to this config.
    pub fn extend(&mut self, other: DeclarativeConfig) {
        self.packages.extend(other.packages);
        self.bundles.extend(other.bundles);
        self.others.extend(other.others);
    }

    /// Converts this config into a validated catalog model.
    pub fn to_model(&self) -> Result<crate::model::Model, Error> {
        convert_to_model(self)
    }
}

/// An `olm.package` document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Package {
    /// Always [`SCHEMA_PACKAGE`].
    pub schema: String,
    /// Package name. Unique within a catalog.
    pub name: String,
    /// Name of the package's default channel.
    #[serde(default, rename = "defaultChannel", skip_serializing_if = "String::is_empty")]
    pub default_channel: String,
    /// Package icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Package {
    /// Creates a package document with the schema field populated.
    pub fn new(name: impl Into<String>, default_channel: impl Into<String>) -> Self {
        Self {
            schema: SCHEMA_PACKAGE.to_string(),
            name: name.into(),
            default_channel: default_channel.into(),
            icon: None,
            description: String::new(),
        }
    }
}

/// A package icon: raw bytes plus a media type.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Icon {
    /// Raw icon bytes, serialized as base64.
    #[serde(rename = "base64data", with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Icon media type, e.g. `image/svg+xml`.
    #[serde(rename = "mediatype")]
    pub media_type: String,
}

/// An `olm.bundle` document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Bundle {
    /// Always [`SCHEMA_BUNDLE`].
    pub schema: String,
    /// Bundle name. Unique within its package.
    pub name: String,
    /// Name of the owning package.
    pub package: String,
    /// Image reference for the bundle's content. Required unless the bundle
    /// carries inline object data.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// The bundle's properties, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    /// Images related to this bundle.
    #[serde(default, rename = "relatedImages", skip_serializing_if = "Vec::is_empty")]
    pub related_images: Vec<RelatedImage>,

    /// The bundle's ClusterServiceVersion document, extracted from its
    /// objects. Derived state; never serialized.
    #[serde(skip)]
    pub csv_json: Option<String>,
    /// The bundle's object documents, resolved from `olm.bundle.object`
    /// properties. Derived state; never serialized.
    #[serde(skip)]
    pub objects: Vec<String>,
}

/// A named image associated with a bundle.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RelatedImage {
    /// Role of the image within the bundle, possibly empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// The image reference.
    pub image: String,
}

/// A document with a schema other than `olm.package` or `olm.bundle`.
///
/// The full document is kept as a raw blob so it round-trips byte-for-byte
/// (up to whitespace normalization).
#[derive(Clone, Debug, PartialEq)]
pub struct Meta {
    /// The document's schema discriminator.
    pub schema: String,
    /// The `package` field, or empty for non-packaged documents.
    pub package: String,
    /// The `name` field, or empty.
    pub name: String,
    /// The entire document.
    pub blob: serde_json::Value,
}

impl Meta {
    /// Extracts a `Meta` from a decoded document.
    ///
    /// Returns `Ok(None)` if the document has no `schema` field or an empty
    /// one; the caller decides whether that is fatal.
    pub fn from_value(blob: serde_json::Value) -> Result<Option<Meta>, Error> {
        let obj = blob
            .as_object()
            .ok_or_else(|| Error::Format("document must be a JSON object".to_string()))?;
        let schema = match obj.get("schema").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return Ok(None),
        };
        let str_field = |key: &str| {
            obj.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let package = str_field("package");
        let name = str_field("name");
        Ok(Some(Meta {
            schema,
            package,
            name,
            blob,
        }))
    }
}

impl Serialize for Meta {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.blob.serialize(serializer)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(D::Error::custom)
    }
}
