//! # oapi-core — Foundational Types for OAPI Gate
//!
//! Every other crate in the workspace depends on `oapi-core`; it depends on
//! nothing internal.
//!
//! ## Key Types
//!
//! 1. **[`Payload`].** A JSON-shaped tree whose leaves may also be opaque
//!    [`DomainValue`]s. Requests enter as pure wire payloads and leave the
//!    request pass with domain values at formatted locations; responses run
//!    the other way.
//!
//! 2. **[`Location`].** A concrete instance path (`/history/0/date`) inside a
//!    payload, rendered as a JSON pointer.
//!
//! 3. **[`Annotation`] / [`AnnotationIndex`].** Precomputed
//!    `(steps, format, direction mask)` records produced once per schema and
//!    read by the coercion engine on every pass.
//!
//! 4. **[`ValidationViolation`] / [`CoercionFailure`].** The two kinds of
//!    issue a validation pass can report.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `oapi-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod annotation;
pub mod error;
pub mod issue;
pub mod location;
pub mod payload;

// Re-export primary types for ergonomic imports.
pub use annotation::{
    Annotation, AnnotationIndex, BranchMatcher, Direction, DirectionMask, Step, Target, Union,
};
pub use error::{ConfigurationError, FormatError};
pub use issue::{CoercionFailure, Issue, ValidationViolation};
pub use location::{Location, Segment};
pub use payload::{DomainValue, Payload};
