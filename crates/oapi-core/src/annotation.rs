//! # Schema Annotations
//!
//! An [`Annotation`] records where in a schema a registered format applies,
//! as a sequence of schema-level [`Step`]s rather than concrete instance
//! indices: one `Items` step stands for every element of a runtime array.
//! Annotations are produced once per contract by the annotator in
//! `oapi-schema` and are read-only afterwards.
//!
//! ## Union Branches
//!
//! A node under `anyOf`/`oneOf` gets one annotation per branch. All branch
//! steps of one union share an [`Union`], which picks the single branch that
//! accepts a live value through the [`BranchMatcher`] seam. Only annotations
//! under the selected branch are applied.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::payload::Payload;

/// Which way a value is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client → handler: wire values are deserialized.
    Request,
    /// Handler → client: domain values are serialized.
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}

/// The set of directions an annotation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectionMask {
    request: bool,
    response: bool,
}

impl DirectionMask {
    /// Both directions.
    pub const BOTH: Self = Self {
        request: true,
        response: true,
    };

    /// Request direction only (`writeOnly` nodes).
    pub const REQUEST_ONLY: Self = Self {
        request: true,
        response: false,
    };

    /// Response direction only (`readOnly` nodes).
    pub const RESPONSE_ONLY: Self = Self {
        request: false,
        response: true,
    };

    /// Remove the request direction.
    pub fn without_request(self) -> Self {
        Self {
            request: false,
            ..self
        }
    }

    /// Remove the response direction.
    pub fn without_response(self) -> Self {
        Self {
            response: false,
            ..self
        }
    }

    /// Returns true if the mask covers `direction`.
    pub fn applies_to(self, direction: Direction) -> bool {
        match direction {
            Direction::Request => self.request,
            Direction::Response => self.response,
        }
    }

    /// Returns true if no direction remains.
    pub fn is_empty(self) -> bool {
        !self.request && !self.response
    }
}

/// Decides whether a live value is accepted by one union branch.
///
/// Implemented by the schema crate over compiled branch validators.
pub trait BranchMatcher: Send + Sync + fmt::Debug {
    /// Returns true if `value` is structurally accepted by this branch.
    fn matches(&self, value: &Payload) -> bool;
}

/// One `anyOf`/`oneOf` keyword and the matchers of its branches.
#[derive(Debug)]
pub struct Union {
    location: String,
    branches: Vec<Arc<dyn BranchMatcher>>,
}

impl Union {
    /// Create a union for the keyword at schema `location`.
    pub fn new(location: impl Into<String>, branches: Vec<Arc<dyn BranchMatcher>>) -> Self {
        Self {
            location: location.into(),
            branches,
        }
    }

    /// Schema location of the union keyword.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Returns true if the union has no branches.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Index of the first branch accepting `value`.
    pub fn select(&self, value: &Payload) -> Option<usize> {
        self.branches.iter().position(|branch| branch.matches(value))
    }
}

/// One schema-level traversal step.
#[derive(Debug, Clone)]
pub enum Step {
    /// Named member of `properties`.
    Property(String),
    /// Every element of an array (`items`).
    Items,
    /// Every member not named in `properties` (`additionalProperties`).
    AdditionalProperties {
        /// Names declared in the sibling `properties`.
        declared: Arc<[String]>,
    },
    /// Branch `index` of a union; applies only if the union selects it.
    Branch {
        /// The union this branch belongs to.
        union: Arc<Union>,
        /// Branch position inside the union keyword.
        index: usize,
    },
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Property(a), Self::Property(b)) => a == b,
            (Self::Items, Self::Items) => true,
            (
                Self::AdditionalProperties { declared: a },
                Self::AdditionalProperties { declared: b },
            ) => a == b,
            (
                Self::Branch { union: a, index: i },
                Self::Branch { union: b, index: j },
            ) => Arc::ptr_eq(a, b) && i == j,
            _ => false,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(key) => write!(f, "/{key}"),
            Self::Items => f.write_str("/[]"),
            Self::AdditionalProperties { .. } => f.write_str("/*"),
            Self::Branch { index, .. } => write!(f, "/<{index}>"),
        }
    }
}

/// A precomputed `(steps, format, directions)` record.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Steps from the target root to the formatted node.
    pub steps: Vec<Step>,
    /// Registered format name at the node.
    pub format: String,
    /// Directions the annotation applies to.
    pub mask: DirectionMask,
}

impl Annotation {
    /// Returns true if the path crosses an array boundary.
    pub fn crosses_array(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, Step::Items | Step::AdditionalProperties { .. }))
    }

    /// Returns true if the path crosses a union branch.
    pub fn crosses_union(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Step::Branch { .. }))
    }

    /// Human-readable path, e.g. `/body/history/[]/modificationDate`.
    pub fn path(&self) -> String {
        self.steps.iter().map(ToString::to_string).collect()
    }
}

/// The root an annotation list is anchored at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// The assembled request (`params`, `query`, `headers`, `body`).
    Request,
    /// A response body, keyed by status key (`200`, `2XX`, `default`).
    Response(String),
}

/// Annotations grouped by target.
#[derive(Debug, Clone, Default)]
pub struct AnnotationIndex {
    by_target: HashMap<Target, Vec<Annotation>>,
}

impl AnnotationIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the annotations of one target, replacing any previous list.
    pub fn insert(&mut self, target: Target, annotations: Vec<Annotation>) {
        self.by_target.insert(target, annotations);
    }

    /// All annotations of a target.
    pub fn for_target(&self, target: &Target) -> &[Annotation] {
        self.by_target
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Annotations of a target whose steps start with `prefix`.
    pub fn under<'a>(
        &'a self,
        target: &Target,
        prefix: &'a [Step],
    ) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.for_target(target)
            .iter()
            .filter(move |a| a.steps.len() >= prefix.len() && a.steps[..prefix.len()] == *prefix)
    }

    /// Total number of annotations across all targets.
    pub fn len(&self) -> usize {
        self.by_target.values().map(Vec::len).sum()
    }

    /// Returns true if no target has annotations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
