//! # Schema Annotator
//!
//! Walks a schema once, at contract build time, and records every location
//! where a registered format applies. The coercion engine replays those
//! records on every pass instead of walking the schema again.
//!
//! ## Traversal
//!
//! Depth-first with an explicit work stack, so deeply nested contracts
//! cannot overflow the thread stack. Each frame carries the steps taken so
//! far, the direction mask inherited from `readOnly`/`writeOnly` ancestors,
//! and the `$ref`s already followed on its path:
//!
//! | keyword                         | step                                   |
//! |---------------------------------|----------------------------------------|
//! | `properties/<key>`              | [`Step::Property`]                     |
//! | `items`                         | [`Step::Items`]                        |
//! | `additionalProperties` (object) | [`Step::AdditionalProperties`]         |
//! | `allOf/<i>`                     | none (same path)                       |
//! | `anyOf/<i>`, `oneOf/<i>`        | [`Step::Branch`] over one shared union |
//! | `$ref`                          | none (same path)                       |
//!
//! A `$ref` already on the current path is treated as expanded, which is
//! what stops recursive definitions from looping.

use std::collections::HashSet;
use std::sync::Arc;

use oapi_core::{
    Annotation, BranchMatcher, ConfigurationError, Direction, DirectionMask, Location, Payload,
    Step, Union,
};
use oapi_serdes::{locate, FormatRegistry};
use serde_json::Value;

use crate::compile::{resolve_ref, CompiledSchema, StructuralCompiler};

/// Deepest schema nesting the annotator walks before giving up.
pub const MAX_SCHEMA_DEPTH: usize = 256;

/// Produces annotations for schema fragments of one contract document.
#[derive(Debug)]
pub struct Annotator<'a> {
    document: &'a Value,
    registry: &'a FormatRegistry,
    compiler: StructuralCompiler,
}

struct Frame<'a> {
    node: &'a Value,
    location: String,
    steps: Vec<Step>,
    mask: DirectionMask,
    depth: usize,
    refs: Vec<&'a str>,
}

impl<'a> Annotator<'a> {
    /// Create an annotator resolving `$ref`s against `document`.
    pub fn new(document: &'a Value, registry: &'a FormatRegistry) -> Self {
        Self {
            document,
            registry,
            compiler: StructuralCompiler::new(document),
        }
    }

    /// Annotate the fragment `schema` found at schema `location`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] for unknown formats, unresolvable
    /// references, nesting deeper than [`MAX_SCHEMA_DEPTH`] and union
    /// branches the structural validator cannot compile.
    pub fn annotate<'s>(
        &'s self,
        schema: &'s Value,
        location: &str,
    ) -> Result<Vec<Annotation>, ConfigurationError> {
        let annotations = self.walk(Frame {
            node: schema,
            location: location.to_string(),
            steps: Vec::new(),
            mask: DirectionMask::BOTH,
            depth: 0,
            refs: Vec::new(),
        })?;
        tracing::debug!(location, annotations = annotations.len(), "schema annotated");
        Ok(annotations)
    }

    /// Annotations of the subtree under `root`, with steps relative to it.
    fn walk<'s>(&'s self, root: Frame<'s>) -> Result<Vec<Annotation>, ConfigurationError> {
        let mut out = Vec::new();
        let mut stack = vec![root];

        while let Some(frame) = stack.pop() {
            if frame.depth > MAX_SCHEMA_DEPTH {
                return Err(ConfigurationError::SchemaTooDeep {
                    limit: MAX_SCHEMA_DEPTH,
                    location: frame.location,
                });
            }
            let Value::Object(keywords) = frame.node else {
                continue;
            };

            let mut mask = frame.mask;
            if keywords.get("readOnly").and_then(Value::as_bool) == Some(true) {
                mask = mask.without_request();
            }
            if keywords.get("writeOnly").and_then(Value::as_bool) == Some(true) {
                mask = mask.without_response();
            }
            if mask.is_empty() {
                continue;
            }

            if let Some(format) = keywords.get("format").and_then(Value::as_str) {
                if !self.registry.is_known(format) {
                    return Err(ConfigurationError::UnknownFormat {
                        format: format.to_string(),
                        location: frame.location,
                    });
                }
                if self.registry.lookup(format).is_some() {
                    out.push(Annotation {
                        steps: frame.steps.clone(),
                        format: format.to_string(),
                        mask,
                    });
                }
            }

            let children = self.children(&frame, keywords, mask)?;
            stack.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    /// Child frames of one schema object, in document order.
    fn children<'s>(
        &'s self,
        frame: &Frame<'s>,
        keywords: &'s serde_json::Map<String, Value>,
        mask: DirectionMask,
    ) -> Result<Vec<Frame<'s>>, ConfigurationError> {
        let child = |node: &'s Value, location: String, step: Option<Step>, refs: Vec<&'s str>| {
            let mut steps = frame.steps.clone();
            steps.extend(step);
            Frame {
                node,
                location,
                steps,
                mask,
                depth: frame.depth + 1,
                refs,
            }
        };
        let mut out = Vec::new();

        if let Some(reference) = keywords.get("$ref").and_then(Value::as_str) {
            let target = resolve_ref(self.document, reference).ok_or_else(|| {
                ConfigurationError::UnresolvedReference {
                    reference: reference.to_string(),
                    location: frame.location.clone(),
                }
            })?;
            if !frame.refs.contains(&reference) {
                let mut refs = frame.refs.clone();
                refs.push(reference);
                out.push(child(target, reference.to_string(), None, refs));
            }
        }

        let properties = keywords.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (key, sub) in properties {
                out.push(child(
                    sub,
                    format!("{}/properties/{key}", frame.location),
                    Some(Step::Property(key.clone())),
                    frame.refs.clone(),
                ));
            }
        }

        if let Some(items) = keywords.get("items").filter(|i| i.is_object()) {
            out.push(child(
                items,
                format!("{}/items", frame.location),
                Some(Step::Items),
                frame.refs.clone(),
            ));
        }

        if let Some(additional) = keywords.get("additionalProperties").filter(|a| a.is_object()) {
            let declared: Arc<[String]> = properties
                .map(|p| p.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
                .into();
            out.push(child(
                additional,
                format!("{}/additionalProperties", frame.location),
                Some(Step::AdditionalProperties { declared }),
                frame.refs.clone(),
            ));
        }

        if let Some(parts) = keywords.get("allOf").and_then(Value::as_array) {
            for (i, part) in parts.iter().enumerate() {
                out.push(child(
                    part,
                    format!("{}/allOf/{i}", frame.location),
                    None,
                    frame.refs.clone(),
                ));
            }
        }

        for keyword in ["anyOf", "oneOf"] {
            let Some(branches) = keywords.get(keyword).and_then(Value::as_array) else {
                continue;
            };
            let union_location = format!("{}/{keyword}", frame.location);
            let matchers = branches
                .iter()
                .enumerate()
                .map(|(i, branch)| -> Result<Arc<dyn BranchMatcher>, ConfigurationError> {
                    let root = Frame {
                        node: branch,
                        location: format!("{union_location}/{i}"),
                        steps: Vec::new(),
                        mask,
                        depth: frame.depth + 1,
                        refs: frame.refs.clone(),
                    };
                    Ok(Arc::new(SchemaBranch::new(self, root)?))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let union = Arc::new(Union::new(union_location.clone(), matchers));
            for (index, branch) in branches.iter().enumerate() {
                out.push(child(
                    branch,
                    format!("{union_location}/{index}"),
                    Some(Step::Branch {
                        union: union.clone(),
                        index,
                    }),
                    frame.refs.clone(),
                ));
            }
        }

        Ok(out)
    }
}

/// Matches live values against one `anyOf`/`oneOf` branch.
///
/// Pure wire values are checked with the branch's compiled validator.
/// Values still holding domain objects (response payloads built by
/// handlers) are checked on their wire view with every domain value read as
/// `null`: the branch matches if it can serialize every domain value and
/// the only errors it raises sit exactly at those values.
#[derive(Debug)]
pub struct SchemaBranch {
    validator: CompiledSchema,
    serializable: Vec<Annotation>,
}

impl SchemaBranch {
    fn new(annotator: &Annotator<'_>, root: Frame<'_>) -> Result<Self, ConfigurationError> {
        let validator = annotator.compiler.compile(root.node, &root.location)?;
        let serializable = annotator
            .walk(root)?
            .into_iter()
            .filter(|a| {
                annotator
                    .registry
                    .lookup(&a.format)
                    .is_some_and(|entry| entry.serializer().is_some())
            })
            .collect();
        Ok(Self {
            validator,
            serializable,
        })
    }
}

impl BranchMatcher for SchemaBranch {
    fn matches(&self, value: &Payload) -> bool {
        let (wire, domain) = value.wire_projection();
        if domain.is_empty() {
            return self.validator.is_valid(&wire);
        }

        let serialized: HashSet<Location> = locate(value, &self.serializable, Direction::Response)
            .into_iter()
            .map(|(location, _)| location)
            .collect();
        if !domain.iter().all(|location| serialized.contains(location)) {
            return false;
        }
        let domain: HashSet<String> = domain.iter().map(ToString::to_string).collect();
        self.validator
            .error_locations(&wire)
            .iter()
            .all(|location| domain.contains(location))
    }
}
