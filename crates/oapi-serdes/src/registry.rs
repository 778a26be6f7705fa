//! # Format Registry
//!
//! Process-wide format configuration, established before traffic begins
//! and never mutated afterwards (callers wrap the finished registry in an
//! `Arc`).
//!
//! ## Known-but-unvalidated Formats
//!
//! A format name can be allow-listed with [`FormatRegistry::allow_unknown`]
//! purely so that schemas declaring it build without an "unknown format"
//! error. Such a format has no functions and is never coerced: the wire
//! value passes through untouched in both directions. Allow-listing a name
//! that also has a serializer-only or deserializer-only entry is legal; the
//! registered function still runs.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use oapi_core::{ConfigurationError, FormatError, Payload};
use serde_json::Value;

/// Boxed future returned by format functions.
pub type FormatFuture<T> = Pin<Box<dyn Future<Output = Result<T, FormatError>> + Send>>;

/// Wire value → domain payload.
pub type DeserializeFn = Arc<dyn Fn(Value) -> FormatFuture<Payload> + Send + Sync>;

/// Domain payload → wire value.
pub type SerializeFn = Arc<dyn Fn(Payload) -> FormatFuture<Value> + Send + Sync>;

/// Wire string validity check for formats the structural validator does
/// not know.
pub type ValidateFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Formats the structural validator checks on its own, plus the OpenAPI
/// numeric and binary formats that need no check at all.
pub const NATIVE_FORMATS: &[&str] = &[
    "date",
    "date-time",
    "time",
    "duration",
    "email",
    "idn-email",
    "hostname",
    "idn-hostname",
    "ipv4",
    "ipv6",
    "uri",
    "uri-reference",
    "iri",
    "iri-reference",
    "uri-template",
    "uuid",
    "json-pointer",
    "relative-json-pointer",
    "regex",
    "int32",
    "int64",
    "float",
    "double",
    "byte",
    "binary",
    "password",
];

fn ready<T: Send + 'static>(result: Result<T, FormatError>) -> FormatFuture<T> {
    Box::pin(std::future::ready(result))
}

/// Deserialize/serialize/validate capabilities of one format.
#[derive(Clone)]
pub struct FormatEntry {
    name: String,
    deserialize: Option<DeserializeFn>,
    serialize: Option<SerializeFn>,
    validate: Option<ValidateFn>,
}

impl FormatEntry {
    /// An entry with no capabilities.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deserialize: None,
            serialize: None,
            validate: None,
        }
    }

    /// Set a synchronous deserializer.
    pub fn deserialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Payload, FormatError> + Send + Sync + 'static,
    {
        self.deserialize = Some(Arc::new(move |wire: Value| ready(f(&wire))));
        self
    }

    /// Set an asynchronous deserializer.
    pub fn deserialize_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, FormatError>> + Send + 'static,
    {
        self.deserialize = Some(Arc::new(move |wire: Value| -> FormatFuture<Payload> {
            Box::pin(f(wire))
        }));
        self
    }

    /// Set a synchronous serializer.
    pub fn serialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) -> Result<Value, FormatError> + Send + Sync + 'static,
    {
        self.serialize = Some(Arc::new(move |domain: Payload| ready(f(&domain))));
        self
    }

    /// Set an asynchronous serializer.
    pub fn serialize_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FormatError>> + Send + 'static,
    {
        self.serialize = Some(Arc::new(move |domain: Payload| -> FormatFuture<Value> {
            Box::pin(f(domain))
        }));
        self
    }

    /// Set the validity predicate checked against wire strings.
    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(f));
        self
    }

    /// The same entry without its deserializer.
    pub fn serializer_only(&self) -> Self {
        Self {
            deserialize: None,
            ..self.clone()
        }
    }

    /// The same entry without its serializer.
    pub fn deserializer_only(&self) -> Self {
        Self {
            serialize: None,
            ..self.clone()
        }
    }

    /// Format name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The deserializer, if any.
    pub fn deserializer(&self) -> Option<&DeserializeFn> {
        self.deserialize.as_ref()
    }

    /// The serializer, if any.
    pub fn serializer(&self) -> Option<&SerializeFn> {
        self.serialize.as_ref()
    }

    /// The validity predicate, if any.
    pub fn validator(&self) -> Option<&ValidateFn> {
        self.validate.as_ref()
    }

    /// Returns true if the entry can coerce in at least one direction.
    pub fn has_functions(&self) -> bool {
        self.deserialize.is_some() || self.serialize.is_some()
    }
}

impl fmt::Debug for FormatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatEntry")
            .field("name", &self.name)
            .field("deserialize", &self.deserialize.is_some())
            .field("serialize", &self.serialize.is_some())
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

/// Format name → capabilities, plus the allow-list of known-but-unvalidated
/// names.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    entries: HashMap<String, FormatEntry>,
    allow_listed: BTreeSet<String>,
}

impl FormatRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `date` and `date-time` entries.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for entry in [crate::builtin::date(), crate::builtin::date_time()] {
            registry.entries.insert(entry.name().to_string(), entry);
        }
        registry
    }

    /// Register a format.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateFormat`] if the name is already
    /// registered. Use [`register_override`](Self::register_override) to
    /// replace an entry on purpose.
    pub fn register(&mut self, entry: FormatEntry) -> Result<(), ConfigurationError> {
        if self.entries.contains_key(entry.name()) {
            return Err(ConfigurationError::DuplicateFormat(entry.name().to_string()));
        }
        self.entries.insert(entry.name().to_string(), entry);
        Ok(())
    }

    /// Register a format, replacing any existing entry of the same name.
    ///
    /// Returns the replaced entry.
    pub fn register_override(&mut self, entry: FormatEntry) -> Option<FormatEntry> {
        self.entries.insert(entry.name().to_string(), entry)
    }

    /// Allow-list a format name so schemas declaring it are accepted.
    pub fn allow_unknown(&mut self, name: impl Into<String>) {
        self.allow_listed.insert(name.into());
    }

    /// Look up a registered entry.
    pub fn lookup(&self, name: &str) -> Option<&FormatEntry> {
        self.entries.get(name)
    }

    /// Returns true if `name` is allow-listed and nothing can coerce it.
    pub fn is_known_but_unvalidated(&self, name: &str) -> bool {
        self.allow_listed.contains(name)
            && !self.entries.get(name).is_some_and(FormatEntry::has_functions)
    }

    /// Returns true if a schema may declare `name`.
    pub fn is_known(&self, name: &str) -> bool {
        self.entries.contains_key(name)
            || self.allow_listed.contains(name)
            || NATIVE_FORMATS.contains(&name)
    }

    /// Returns true if `name` has an entry able to coerce it.
    pub fn is_coercible(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(FormatEntry::has_functions)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
