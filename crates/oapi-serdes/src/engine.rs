//! # Coercion Engine
//!
//! Applies format functions at annotated locations of one payload.
//!
//! ## Two Phases
//!
//! 1. **Plan.** Every annotation whose mask covers the direction is resolved
//!    against the untouched payload into concrete locations. `Items` fans out
//!    over the live array (an empty array yields nothing), `Branch` continues
//!    only if its union selects that branch for the live value, and missing
//!    members are skipped. Union selection therefore always sees the value
//!    as it arrived, never a half-coerced one.
//! 2. **Apply.** Locations are visited in plan order, each at most once, and
//!    the function's future is awaited before the next one starts. Only the
//!    node at the location is replaced; containers are left in place.
//!
//! Request direction deserializes wire nodes (never `null`, never a node
//! already holding a domain value). Response direction serializes domain
//! values, arrays and objects; wire scalars are already in wire shape and
//! stay untouched. A format without the needed function is a no-op.

use std::collections::HashSet;
use std::sync::Arc;

use oapi_core::{
    Annotation, CoercionFailure, Direction, Location, Payload, Step, ValidationViolation,
};

use crate::registry::FormatRegistry;

/// Result of one engine pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionOutcome {
    /// The (possibly partially) coerced payload.
    pub value: Payload,
    /// Every failure, in plan order.
    pub failures: Vec<CoercionFailure>,
}

impl CoercionOutcome {
    /// Returns true if no function failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A concrete location to coerce.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Planned<'a> {
    location: Location,
    format: &'a str,
}

/// Runs registered format functions over payloads.
#[derive(Debug, Clone)]
pub struct CoercionEngine {
    registry: Arc<FormatRegistry>,
}

impl CoercionEngine {
    /// Create an engine over a finished registry.
    pub fn new(registry: Arc<FormatRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this engine consults.
    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Coerce `root` in `direction` along `annotations`.
    ///
    /// `prefix` is prepended to failure locations (`request`, `/response`).
    pub async fn apply(
        &self,
        direction: Direction,
        mut root: Payload,
        annotations: &[Annotation],
        prefix: &str,
    ) -> CoercionOutcome {
        let plan = plan(&root, annotations, direction);
        let mut failures = Vec::new();

        for Planned { location, format } in plan {
            let Some(entry) = self.registry.lookup(format) else {
                continue;
            };
            let Some(slot) = root.pointer_mut(&location) else {
                continue;
            };

            let result = match direction {
                Direction::Request => {
                    let Some(deserialize) = entry.deserializer() else {
                        continue;
                    };
                    if matches!(slot, Payload::Null) {
                        continue;
                    }
                    let Some(wire) = slot.to_wire() else {
                        continue;
                    };
                    deserialize(wire).await
                }
                Direction::Response => {
                    let Some(serialize) = entry.serializer() else {
                        continue;
                    };
                    if slot.is_primitive() {
                        continue;
                    }
                    serialize(slot.clone()).await.map(Payload::from)
                }
            };

            match result {
                Ok(coerced) => *slot = coerced,
                Err(error) => {
                    tracing::debug!(
                        %direction,
                        format = format,
                        location = %location,
                        error = %error,
                        "format function failed"
                    );
                    failures.push(CoercionFailure {
                        location: format!("{prefix}{location}"),
                        direction,
                        format: Some(format.to_string()),
                        error,
                    });
                }
            }
        }

        CoercionOutcome {
            value: root,
            failures,
        }
    }

    /// Check wire strings at annotated locations against registered
    /// validity predicates.
    ///
    /// Covers formats the structural validator does not know; each failing
    /// string yields a `format` violation.
    pub fn check_formats(
        &self,
        direction: Direction,
        root: &Payload,
        annotations: &[Annotation],
        prefix: &str,
    ) -> Vec<ValidationViolation> {
        plan(root, annotations, direction)
            .into_iter()
            .filter_map(|Planned { location, format }| {
                let predicate = self.registry.lookup(format)?.validator()?;
                let Payload::String(wire) = root.pointer(&location)? else {
                    return None;
                };
                (!predicate(wire.as_str())).then(|| ValidationViolation {
                    location: format!("{prefix}{location}"),
                    keyword: "format".to_string(),
                    message: format!("must match format \"{format}\""),
                })
            })
            .collect()
    }
}

/// Concrete locations of `root` that `annotations` reach in `direction`,
/// each with its format, in plan order.
pub fn locate<'a>(
    root: &Payload,
    annotations: &'a [Annotation],
    direction: Direction,
) -> Vec<(Location, &'a str)> {
    plan(root, annotations, direction)
        .into_iter()
        .map(|Planned { location, format }| (location, format))
        .collect()
}

fn plan<'a>(
    root: &Payload,
    annotations: &'a [Annotation],
    direction: Direction,
) -> Vec<Planned<'a>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for annotation in annotations.iter().filter(|a| a.mask.applies_to(direction)) {
        let mut locations = Vec::new();
        resolve(root, &annotation.steps, &mut Location::root(), &mut locations);
        for location in locations {
            if seen.insert(location.clone()) {
                out.push(Planned {
                    location,
                    format: &annotation.format,
                });
            }
        }
    }
    out
}

fn resolve(node: &Payload, steps: &[Step], here: &mut Location, out: &mut Vec<Location>) {
    let Some((step, rest)) = steps.split_first() else {
        out.push(here.clone());
        return;
    };
    match (step, node) {
        (Step::Property(key), Payload::Object(map)) => {
            if let Some(child) = map.get(key) {
                here.push_key(key.clone());
                resolve(child, rest, here, out);
                here.pop();
            }
        }
        (Step::Items, Payload::Array(items)) => {
            for (index, child) in items.iter().enumerate() {
                here.push_index(index);
                resolve(child, rest, here, out);
                here.pop();
            }
        }
        (Step::AdditionalProperties { declared }, Payload::Object(map)) => {
            for (key, child) in map {
                if declared.iter().any(|d| d == key) {
                    continue;
                }
                here.push_key(key.clone());
                resolve(child, rest, here, out);
                here.pop();
            }
        }
        (Step::Branch { union, index }, _) => {
            if union.select(node) == Some(*index) {
                resolve(node, rest, here, out);
            }
        }
        _ => {}
    }
}
