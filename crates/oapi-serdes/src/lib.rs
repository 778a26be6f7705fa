//! # oapi-serdes — Formats and Coercion
//!
//! ## Format Registry (`registry`)
//!
//! [`FormatRegistry`] maps a format name to a [`FormatEntry`]: an optional
//! deserializer, an optional serializer and an optional validity predicate.
//! Entries are data, not a type hierarchy; any of the three capabilities may
//! be missing. The registry is built once at startup and shared read-only.
//!
//! ## Built-in Formats (`builtin`)
//!
//! `date` and `date-time` backed by `chrono`, plus serializer-only and
//! deserializer-only projections for response-only or request-only setups.
//!
//! ## Coercion Engine (`engine`)
//!
//! [`CoercionEngine::apply`] walks a payload along precomputed annotations
//! and runs the matching format functions, collecting every failure instead
//! of stopping at the first.
//!
//! ## Crate Policy
//!
//! - Depends only on `oapi-core` internally.
//! - Format function errors never escape raw; they become
//!   [`oapi_core::CoercionFailure`]s with their location.

pub mod builtin;
pub mod engine;
pub mod registry;

pub use engine::{locate, CoercionEngine, CoercionOutcome};
pub use registry::{
    DeserializeFn, FormatEntry, FormatFuture, FormatRegistry, SerializeFn, ValidateFn,
    NATIVE_FORMATS,
};
