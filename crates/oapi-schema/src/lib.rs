//! # oapi-schema — Structural Validation & Schema Analysis
//!
//! ## Structural Validation (`compile`, `violation`, `coerce`)
//!
//! Schema fragments are compiled with the `jsonschema` crate (Draft
//! 2020-12, format checks on) after the contract's `components` are
//! embedded so local `$ref`s resolve. Errors are rendered in Ajv wording
//! (`must match pattern "…"`) with every failing `anyOf`/`oneOf` branch
//! reported before the summary. [`coerce_types`] performs lossless
//! primitive conversion ahead of validation.
//!
//! ## Annotation (`annotate`)
//!
//! [`Annotator`] walks a schema once and records every location where a
//! registered format applies, across `properties`, `items`,
//! `additionalProperties`, `allOf` and union branches, guarding against
//! recursive `$ref`s.
//!
//! ## Contract (`contract`)
//!
//! [`Contract`] extracts per-operation request and response schemas from an
//! OpenAPI document, compiles them and annotates them up front.
//!
//! ## Crate Policy
//!
//! - Depends on `oapi-core` and `oapi-serdes` internally.
//! - Every schema problem surfaces as a
//!   [`oapi_core::ConfigurationError`] when the contract is built, never
//!   during traffic.

pub mod annotate;
pub mod coerce;
pub mod compile;
pub mod contract;
pub mod violation;

pub use annotate::{Annotator, SchemaBranch, MAX_SCHEMA_DEPTH};
pub use coerce::coerce_types;
pub use compile::{CompiledSchema, StructuralCompiler};
pub use contract::{Contract, Operation, ParameterLocation};
