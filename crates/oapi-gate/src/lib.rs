//! # oapi-gate — Contract Validation for Axum Services
//!
//! Validates every request and response of a service against its OpenAPI
//! contract and moves formatted values between their wire form and the
//! domain types handlers work with.
//!
//! ## Pipeline
//!
//! ```text
//! request  → type coercion → structural check → deserialize → handler
//! handler  → serialize → to wire → structural check → response
//! ```
//!
//! | Module       | Role                                                     |
//! |--------------|----------------------------------------------------------|
//! | [`config`]   | `validateRequests`, `validateResponses`, `serDes`, …     |
//! | [`pipeline`] | [`ContractValidator`] and the two passes                 |
//! | [`error`]    | [`Rejection`], [`GateError`] and the HTTP status mapping |
//! | [`extract`]  | [`ValidatedRequest`] extractor and `respond`             |
//!
//! ## Crate Policy
//!
//! - A validator that does not build returns a [`BuildError`]; the service
//!   must not start.
//! - Issues found while serving are data inside a [`Rejection`], never
//!   panics.

pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;

pub use config::{ValidationOptions, ValidationSwitch, ValidatorConfig};
pub use error::{BuildError, ErrorBody, GateError, Rejection};
pub use extract::ValidatedRequest;
pub use pipeline::{ContractValidator, ContractValidatorBuilder, RequestParts, ValidationOutcome};

pub use oapi_core::{DomainValue, FormatError, Payload};
pub use oapi_serdes::FormatEntry;
