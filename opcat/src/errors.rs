// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains types that describe errors that `opcat` methods can return.

use std::error;
use std::fmt;
use std::io;

use Error::*;

/// Error type describing the sorts of errors `opcat` can return.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A malformed declarative config document (missing `schema`, bad JSON, a
    /// property that doesn't parse).
    Format(String),
    /// An error occurred while reading or writing catalog content.
    Io {
        /// Human-readable description of the operation that failed.
        context: String,
        /// The underlying I/O error.
        err: io::Error,
    },
    /// An error occurred while encoding or decoding JSON.
    Json(serde_json::Error),
    /// An error occurred while encoding or decoding YAML.
    Yaml(serde_yaml::Error),
    /// A structural invariant failed while validating a catalog model.
    Validation(ValidationError),
    /// A query target (package, channel, bundle or GVK) was not found.
    NotFound(String),
    /// A query matched more than one candidate where exactly one was required.
    Conflict(String),
    /// An option or flag combination was rejected.
    Configuration(String),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, err: io::Error) -> Self {
        Io {
            context: context.into(),
            err,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format(msg) => write!(f, "invalid declarative config: {}", msg),
            Io { context, err } => write!(f, "{}: {}", context, err),
            Json(err) => write!(f, "JSON error: {}", err),
            Yaml(err) => write!(f, "YAML error: {}", err),
            Validation(err) => write!(f, "{}", err),
            NotFound(msg) => write!(f, "not found: {}", msg),
            Conflict(msg) => write!(f, "conflict: {}", msg),
            Configuration(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Io { err, .. } => Some(err),
            Json(err) => Some(err),
            Yaml(err) => Some(err),
            Format(_) | Validation(_) | NotFound(_) | Conflict(_) | Configuration(_) => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Json(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Yaml(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Validation(err)
    }
}

/// A validation failure with tree-structured sub-errors.
///
/// Validation of a catalog model is total: every invariant is checked and
/// every failure is collected, so a single `ValidationError` can describe all
/// the problems in a catalog at once. The `Display` impl renders the tree
/// with box-drawing glyphs, suitable for dumping to a terminal verbatim:
///
/// ```text
/// invalid package "foo"
/// ├── invalid channel "alpha"
/// │   └── multiple channel heads found in channel
/// └── default channel must be set
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationError {
    /// The message for this node.
    pub message: String,
    /// Sub-errors, in the order they were detected.
    pub subs: Vec<ValidationError>,
}

impl ValidationError {
    /// Creates a new leaf error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            subs: Vec::new(),
        }
    }

    /// Creates a new error with the given message and sub-errors.
    pub fn with_subs(message: impl Into<String>, subs: Vec<ValidationError>) -> Self {
        Self {
            message: message.into(),
            subs,
        }
    }

    /// Adds a sub-error to this node.
    pub fn push(&mut self, sub: ValidationError) {
        self.subs.push(sub);
    }

    /// Returns true if this node has sub-errors.
    pub fn has_subs(&self) -> bool {
        !self.subs.is_empty()
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        let last_idx = self.subs.len().saturating_sub(1);
        for (idx, sub) in self.subs.iter().enumerate() {
            let (glyph, child_prefix) = if idx == last_idx {
                ("└── ", format!("{}    ", prefix))
            } else {
                ("├── ", format!("{}│   ", prefix))
            };
            writeln!(f)?;
            write!(f, "{}{}{}", prefix, glyph, sub.message)?;
            sub.fmt_tree(f, &child_prefix)?;
        }
        Ok(())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        self.fmt_tree(f, "")
    }
}

impl error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn render_tree() {
        let err = ValidationError::with_subs(
            "invalid package \"foo\"",
            vec![
                ValidationError::with_subs(
                    "invalid channel \"alpha\"",
                    vec![ValidationError::new("no channel head found")],
                ),
                ValidationError::new("default channel must be set"),
            ],
        );

        let expected = indoc! {r#"
            invalid package "foo"
            ├── invalid channel "alpha"
            │   └── no channel head found
            └── default channel must be set"#};
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn render_leaf() {
        let err = ValidationError::new("package name must not be empty");
        assert_eq!(err.to_string(), "package name must not be empty");
    }
}
