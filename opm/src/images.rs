// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The image source wired into this build of the CLI.
//!
//! The catalog core treats the OCI registry client as an external
//! collaborator behind the [`ImageSource`] trait. This build does not link
//! a registry client, so image refs are rejected with an explanation while
//! directory refs work everywhere.

use camino::Utf8Path;
use opcat::errors::Error;
use opcat::render::ImageSource;
use opcat_cmdlib::ImageClientOptions;
use std::collections::BTreeMap;

/// An [`ImageSource`] that rejects every image ref.
#[derive(Debug)]
pub struct UnavailableImageSource {
    // Kept so registry-enabled builds can swap in a real client without
    // changing the CLI surface.
    _options: ImageClientOptions,
}

impl UnavailableImageSource {
    /// Creates the source, capturing the client flags.
    pub fn new(options: ImageClientOptions) -> Self {
        Self { _options: options }
    }

    fn reject(image_ref: &str) -> Error {
        Error::Configuration(format!(
            "ref {:?} is an image reference, but this build has no image client; \
             pass a declarative config directory instead",
            image_ref
        ))
    }
}

impl ImageSource for UnavailableImageSource {
    fn labels(&self, image_ref: &str) -> Result<BTreeMap<String, String>, Error> {
        Err(Self::reject(image_ref))
    }

    fn unpack(&self, image_ref: &str, _into: &Utf8Path) -> Result<(), Error> {
        Err(Self::reject(image_ref))
    }
}
