//! # Error Types
//!
//! Startup-time configuration errors and the error type returned by format
//! functions. Per-pass problems (violations, coercion failures) are data,
//! not errors; see [`crate::issue`].

use thiserror::Error;

/// A problem with the contract or the format registrations.
///
/// Always fatal at startup: a service whose contract does not build must not
/// accept traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A format was registered twice without an explicit override.
    #[error("format '{0}' is already registered")]
    DuplicateFormat(String),

    /// A schema declares a format that is neither registered, allow-listed
    /// nor checked natively by the structural validator.
    #[error("unknown format '{format}' at {location}")]
    UnknownFormat {
        /// The declared format name.
        format: String,
        /// Schema location of the declaring node.
        location: String,
    },

    /// A `$ref` could not be resolved inside the contract document.
    #[error("unresolved reference '{reference}' at {location}")]
    UnresolvedReference {
        /// The `$ref` value.
        reference: String,
        /// Schema location of the referencing node.
        location: String,
    },

    /// The schema nests deeper than the annotator is willing to walk.
    #[error("schema nesting exceeds {limit} levels at {location}")]
    SchemaTooDeep {
        /// The depth limit that was exceeded.
        limit: usize,
        /// Schema location where the limit was hit.
        location: String,
    },

    /// The structural validator rejected a schema fragment.
    #[error("validator build error at {location}: {reason}")]
    ValidatorBuild {
        /// Schema location of the fragment.
        location: String,
        /// Reason reported by the validator.
        reason: String,
    },

    /// The contract document is malformed.
    #[error("invalid contract document: {0}")]
    InvalidDocument(String),
}

/// Error returned by a format's deserialize or serialize function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FormatError {
    message: String,
}

impl FormatError {
    /// Create a format error with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for FormatError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for FormatError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
