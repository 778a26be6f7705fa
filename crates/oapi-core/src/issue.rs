//! # Pass Issues
//!
//! What a request or response pass reports when it rejects a value.
//! Structural violations come from the schema checker; coercion failures
//! come from format functions and keep their direction and format name so
//! the HTTP mapper can tell client faults from server faults.

use std::fmt;

use crate::annotation::Direction;
use crate::error::FormatError;

/// A schema constraint the value did not satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationViolation {
    /// Rendered location, e.g. `request/body/creationDate`.
    pub location: String,
    /// Keyword that failed (`pattern`, `format`, `anyOf`, `required`, …).
    pub keyword: String,
    /// Predicate description, e.g. `must match format "date"`.
    pub message: String,
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.location, self.message)
    }
}

/// A format function failed, or a domain value had no way back to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionFailure {
    /// Rendered location, e.g. `/response/creationDate`.
    pub location: String,
    /// Direction of the pass that failed.
    pub direction: Direction,
    /// Format involved, if the location was annotated.
    pub format: Option<String>,
    /// Underlying error.
    pub error: FormatError,
}

impl fmt::Display for CoercionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} format is invalid", self.location)
    }
}

/// One entry of a rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// Structural schema violation.
    Violation(ValidationViolation),
    /// Format coercion failure.
    Coercion(CoercionFailure),
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Violation(v) => v.fmt(f),
            Self::Coercion(c) => c.fmt(f),
        }
    }
}

impl From<ValidationViolation> for Issue {
    fn from(v: ValidationViolation) -> Self {
        Self::Violation(v)
    }
}

impl From<CoercionFailure> for Issue {
    fn from(c: CoercionFailure) -> Self {
        Self::Coercion(c)
    }
}
