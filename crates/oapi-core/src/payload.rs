//! # Payload Tree
//!
//! [`Payload`] mirrors `serde_json::Value` with one extra leaf kind,
//! [`Payload::Domain`], holding an opaque in-process value produced by a
//! format's deserializer or placed there by a handler. A payload is "wire"
//! when it contains no domain leaves; only wire payloads convert back to
//! JSON without a serializer.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::location::{Location, Segment};

/// An opaque domain value stored at a payload leaf.
///
/// Cloning is cheap (reference counted). Equality is identity: two domain
/// values are equal only if they share the same allocation.
#[derive(Clone)]
pub struct DomainValue {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl DomainValue {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    /// Borrow the inner value as `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Returns true if the inner value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// The Rust type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for DomainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainValue<{}>", self.type_name)
    }
}

impl PartialEq for DomainValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A JSON-shaped value whose leaves may hold domain values.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// JSON `null`.
    #[default]
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// JSON string.
    String(String),
    /// JSON array.
    Array(Vec<Payload>),
    /// JSON object.
    Object(BTreeMap<String, Payload>),
    /// Opaque in-process value.
    Domain(DomainValue),
}

impl Payload {
    /// Wrap a domain value.
    pub fn domain<T: Any + Send + Sync>(value: T) -> Self {
        Self::Domain(DomainValue::new(value))
    }

    /// Empty object.
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Borrow the domain value at this node as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Domain(domain) => domain.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Borrow the string at this node.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the array at this node.
    pub fn as_array(&self) -> Option<&[Payload]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the object at this node.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Payload>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Object member lookup. `None` for non-objects.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Insert an object member, turning `self` into an object if it was `null`.
    ///
    /// Returns `false` (and does nothing) if `self` is neither an object nor null.
    pub fn insert(&mut self, key: impl Into<String>, value: Payload) -> bool {
        if matches!(self, Self::Null) {
            *self = Self::object();
        }
        match self {
            Self::Object(map) => {
                map.insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Remove and return an object member. `None` for non-objects.
    pub fn remove(&mut self, key: &str) -> Option<Payload> {
        match self {
            Self::Object(map) => map.remove(key),
            _ => None,
        }
    }

    /// Returns true for null, booleans, numbers and strings.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_)
        )
    }

    /// Returns true if this node or any descendant is a domain value.
    pub fn contains_domain(&self) -> bool {
        match self {
            Self::Domain(_) => true,
            Self::Array(items) => items.iter().any(Payload::contains_domain),
            Self::Object(map) => map.values().any(Payload::contains_domain),
            _ => false,
        }
    }

    /// Resolve a location.
    pub fn pointer(&self, location: &Location) -> Option<&Payload> {
        let mut node = self;
        for segment in location.segments() {
            node = match (node, segment) {
                (Self::Object(map), Segment::Key(key)) => map.get(key)?,
                (Self::Object(map), Segment::Index(index)) => map.get(&index.to_string())?,
                (Self::Array(items), Segment::Index(index)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Resolve a location mutably.
    pub fn pointer_mut(&mut self, location: &Location) -> Option<&mut Payload> {
        let mut node = self;
        for segment in location.segments() {
            node = match (node, segment) {
                (Self::Object(map), Segment::Key(key)) => map.get_mut(key)?,
                (Self::Object(map), Segment::Index(index)) => map.get_mut(&index.to_string())?,
                (Self::Array(items), Segment::Index(index)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Convert to JSON if the payload is pure wire.
    pub fn to_wire(&self) -> Option<Value> {
        Some(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Payload::to_wire)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Self::Object(map) => {
                let mut out = Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), value.to_wire()?);
                }
                Value::Object(out)
            }
            Self::Domain(_) => return None,
        })
    }

    /// Convert to JSON, reporting the location of every remaining domain
    /// value. Offending leaves become `null` in the returned value.
    pub fn into_wire(self) -> Result<Value, Vec<Location>> {
        let mut here = Location::root();
        let mut leftovers = Vec::new();
        let value = self.into_wire_at(&mut here, &mut leftovers);
        if leftovers.is_empty() {
            Ok(value)
        } else {
            Err(leftovers)
        }
    }

    /// JSON view of the payload with every domain value read as `null`,
    /// together with the locations of those values.
    pub fn wire_projection(&self) -> (Value, Vec<Location>) {
        let mut here = Location::root();
        let mut domain = Vec::new();
        let value = self.clone().into_wire_at(&mut here, &mut domain);
        (value, domain)
    }

    fn into_wire_at(self, here: &mut Location, leftovers: &mut Vec<Location>) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Number(n) => Value::Number(n),
            Self::String(s) => Value::String(s),
            Self::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    here.push_index(index);
                    out.push(item.into_wire_at(here, leftovers));
                    here.pop();
                }
                Value::Array(out)
            }
            Self::Object(map) => {
                let mut out = Map::new();
                for (key, value) in map {
                    here.push_key(key.clone());
                    out.insert(key, value.into_wire_at(here, leftovers));
                    here.pop();
                }
                Value::Object(out)
            }
            Self::Domain(_) => {
                leftovers.push(here.clone());
                Value::Null
            }
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Payload::from).collect()),
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Payload::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(items: Vec<Payload>) -> Self {
        Self::Array(items)
    }
}

impl<K: Into<String>> FromIterator<(K, Payload)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, Payload)>>(iter: I) -> Self {
        Self::Object(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
