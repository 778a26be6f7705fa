//! # Schema Compilation
//!
//! Route fragments (a request body schema, one branch of an `anyOf`) are
//! compiled on their own, but their `$ref`s point into the contract's
//! `components`. [`StructuralCompiler`] keeps those definition containers
//! and embeds them into each fragment before handing it to `jsonschema`,
//! so `#/components/schemas/...` resolves against the compiled document
//! without any network or file access.

use std::collections::{HashMap, HashSet};
use std::fmt;

use jsonschema::{Draft, Retrieve, Uri, Validator};
use oapi_core::{ConfigurationError, ValidationViolation};
use serde_json::{Map, Value};

use crate::violation;

/// Top-level document members that hold referenceable definitions.
const DEFINITION_CONTAINERS: [&str; 3] = ["components", "$defs", "definitions"];

/// Keywords whose values hold instance data rather than schemas.
const DATA_KEYWORDS: [&str; 5] = ["enum", "const", "default", "example", "examples"];

/// Keywords whose values map names to schemas.
const SCHEMA_MAPS: [&str; 5] = [
    "properties",
    "patternProperties",
    "dependentSchemas",
    "$defs",
    "definitions",
];

/// Resolve a local `$ref` (`#/...`) against `document`.
pub fn resolve_ref<'a>(document: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    document.pointer(pointer)
}

/// Refuses every external `$ref` so compilation never touches the network.
struct LocalOnly;

impl Retrieve for LocalOnly {
    fn retrieve(
        &self,
        uri: &Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Err(format!("external reference '{}' is not supported", uri.as_str()).into())
    }
}

/// Compiles schema fragments with the contract's definitions embedded.
#[derive(Debug, Clone, Default)]
pub struct StructuralCompiler {
    definitions: Map<String, Value>,
}

impl StructuralCompiler {
    /// Capture the definition containers of a contract document.
    pub fn new(document: &Value) -> Self {
        let definitions = DEFINITION_CONTAINERS
            .iter()
            .filter_map(|key| document.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();
        Self { definitions }
    }

    /// Return `fragment` with the captured definitions added at its top
    /// level (members already present in the fragment win).
    pub fn embed(&self, fragment: &Value) -> Value {
        match fragment {
            Value::Object(map) => {
                let mut out = map.clone();
                for (key, value) in &self.definitions {
                    out.entry(key.clone()).or_insert_with(|| value.clone());
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Compile a fragment found at schema `location`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ValidatorBuild`] if `jsonschema`
    /// rejects the fragment (bad regex, unresolvable reference, …).
    pub fn compile(
        &self,
        fragment: &Value,
        location: &str,
    ) -> Result<CompiledSchema, ConfigurationError> {
        let document = self.embed(fragment);
        let validator = build(&document, location)?;
        let unions = Self::compile_unions(fragment, &document, location)?;
        Ok(CompiledSchema {
            location: location.to_string(),
            document,
            validator,
            unions,
        })
    }

    /// Compile the branches of every `anyOf`/`oneOf` reachable from
    /// `fragment`, following `$ref`s into `document` once each. Branches see
    /// the same definitions as the fragment.
    fn compile_unions<'a>(
        fragment: &'a Value,
        document: &'a Value,
        location: &str,
    ) -> Result<UnionBranches, ConfigurationError> {
        let scope = StructuralCompiler::new(document);
        let mut unions = UnionBranches::new();
        let mut followed = HashSet::new();
        let mut stack = vec![(fragment, false)];

        while let Some((node, named)) = stack.pop() {
            match node {
                Value::Object(map) if named => {
                    stack.extend(map.values().map(|v| (v, false)));
                }
                Value::Object(map) => {
                    for (keyword, value) in map {
                        match (keyword.as_str(), value) {
                            (k, _) if DATA_KEYWORDS.contains(&k) => {}
                            (k, _) if SCHEMA_MAPS.contains(&k) => stack.push((value, true)),
                            ("$ref", Value::String(reference)) => {
                                if followed.insert(reference.as_str()) {
                                    let target = resolve_ref(document, reference);
                                    stack.extend(target.map(|t| (t, false)));
                                }
                            }
                            ("anyOf" | "oneOf", Value::Array(branches)) => {
                                let key = union_key(branches);
                                if !unions.contains_key(&key) {
                                    let compiled = branches
                                        .iter()
                                        .enumerate()
                                        .map(|(i, branch)| {
                                            let document = scope.embed(branch);
                                            let location = format!("{location}/{keyword}/{i}");
                                            let validator = build(&document, &location)?;
                                            Ok(CompiledBranch { document, validator })
                                        })
                                        .collect::<Result<Vec<_>, ConfigurationError>>()?;
                                    unions.insert(key, compiled);
                                }
                                stack.extend(branches.iter().map(|b| (b, false)));
                            }
                            _ => stack.push((value, false)),
                        }
                    }
                }
                Value::Array(items) => stack.extend(items.iter().map(|v| (v, false))),
                _ => {}
            }
        }
        Ok(unions)
    }
}

fn build(document: &Value, location: &str) -> Result<Validator, ConfigurationError> {
    let mut options = jsonschema::options();
    options.with_draft(Draft::Draft202012);
    options.should_validate_formats(true);
    options.with_retriever(LocalOnly);
    options
        .build(document)
        .map_err(|e| ConfigurationError::ValidatorBuild {
            location: location.to_string(),
            reason: e.to_string(),
        })
}

/// Cache key of a union: its branch list as compact JSON.
pub(crate) fn union_key(branches: &[Value]) -> String {
    serde_json::to_string(branches).unwrap_or_default()
}

/// One compiled `anyOf`/`oneOf` branch.
pub(crate) struct CompiledBranch {
    document: Value,
    validator: Validator,
}

impl CompiledBranch {
    pub(crate) fn document(&self) -> &Value {
        &self.document
    }

    pub(crate) fn validator(&self) -> &Validator {
        &self.validator
    }
}

/// Compiled branches of every union a fragment reaches, by [`union_key`].
pub(crate) type UnionBranches = HashMap<String, Vec<CompiledBranch>>;

/// A compiled fragment together with the document it was compiled from
/// and the compiled branches of the unions inside it.
pub struct CompiledSchema {
    location: String,
    document: Value,
    validator: Validator,
    unions: UnionBranches,
}

impl CompiledSchema {
    /// Schema location of the fragment inside the contract.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The compiled document (fragment plus embedded definitions).
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Returns true if `instance` satisfies the fragment.
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Every violation of `instance`, rendered with `prefix` in front of
    /// each instance path.
    pub fn violations(&self, instance: &Value, prefix: &str) -> Vec<ValidationViolation> {
        violation::collect(self, instance, prefix)
    }

    /// Instance paths of every error `instance` raises, as JSON pointers.
    pub fn error_locations(&self, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .map(|error| error.instance_path.to_string())
            .collect()
    }

    pub(crate) fn validator(&self) -> &Validator {
        &self.validator
    }

    pub(crate) fn unions(&self) -> &UnionBranches {
        &self.unions
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
