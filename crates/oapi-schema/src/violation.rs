//! # Violation Rendering
//!
//! Turns `jsonschema` errors into [`ValidationViolation`]s worded the way
//! API clients of this service already parse them:
//!
//! ```text
//! request/params/id must match pattern "^[0-9a-fA-F]{24}$"
//! request/body/shortOrLong must NOT have more than 2 characters
//! ```
//!
//! The failing keyword is the last keyword on the error's schema path; its
//! value is read back from the compiled document, following `$ref` hops on
//! the way. A failed `anyOf` (or `oneOf` with no passing branch) first lists
//! the violations of every branch, in declaration order, then the summary.

use std::collections::HashSet;

use jsonschema::Validator;
use oapi_core::ValidationViolation;
use serde_json::Value;

use crate::compile::{resolve_ref, union_key, CompiledSchema, UnionBranches};

/// Keywords with a dedicated message.
const KEYWORDS: &[&str] = &[
    "pattern",
    "format",
    "type",
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
    "required",
    "additionalProperties",
    "enum",
    "const",
    "multipleOf",
    "uniqueItems",
    "anyOf",
    "oneOf",
    "not",
];

/// Collect every violation of `instance` against `schema`.
pub(crate) fn collect(
    schema: &CompiledSchema,
    instance: &Value,
    prefix: &str,
) -> Vec<ValidationViolation> {
    collect_with(schema.unions(), schema.document(), schema.validator(), instance, prefix)
}

fn collect_with(
    unions: &UnionBranches,
    document: &Value,
    validator: &Validator,
    instance: &Value,
    prefix: &str,
) -> Vec<ValidationViolation> {
    let mut out = Vec::new();
    let mut reported_required = HashSet::new();

    for error in validator.iter_errors(instance) {
        let instance_path = error.instance_path.to_string();
        let schema_path = error.schema_path.to_string();
        let location = format!("{prefix}{instance_path}");
        let segments = split_pointer(&schema_path);

        let Some(position) = segments.iter().rposition(|s| KEYWORDS.contains(&s.as_str())) else {
            out.push(ValidationViolation {
                location,
                keyword: segments.last().cloned().unwrap_or_default(),
                message: error.to_string(),
            });
            continue;
        };
        let keyword = segments[position].as_str();
        let parent = resolve_schema_path(document, &segments[..position]);
        let value = parent.and_then(|p| p.get(keyword));

        match keyword {
            "required" => {
                if !reported_required.insert((instance_path, schema_path)) {
                    continue;
                }
                for property in missing_properties(value, &error.instance) {
                    out.push(ValidationViolation {
                        location: location.clone(),
                        keyword: keyword.to_string(),
                        message: format!("must have required property '{property}'"),
                    });
                }
            }
            "anyOf" | "oneOf" => {
                out.extend(union_violations(
                    unions,
                    keyword,
                    value,
                    &error.instance,
                    &location,
                ));
            }
            _ => {
                let message = message_for(keyword, value).unwrap_or_else(|| error.to_string());
                out.push(ValidationViolation {
                    location,
                    keyword: keyword.to_string(),
                    message,
                });
            }
        }
    }
    out
}

fn split_pointer(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect()
}

/// Walk schema path segments from the document root, following `$ref`.
fn resolve_schema_path<'a>(document: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = document;
    for segment in segments {
        if segment == "$ref" {
            if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
                node = resolve_ref(document, reference)?;
                continue;
            }
        }
        node = match node {
            Value::Object(map) => match (map.get(segment), map.get("$ref")) {
                (Some(child), _) => child,
                (None, Some(Value::String(reference))) => {
                    resolve_ref(document, reference)?.get(segment)?
                }
                _ => return None,
            },
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

fn missing_properties(required: Option<&Value>, instance: &Value) -> Vec<String> {
    let Some(names) = required.and_then(Value::as_array) else {
        return Vec::new();
    };
    names
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| instance.get(*name).is_none())
        .map(str::to_string)
        .collect()
}

fn union_violations(
    unions: &UnionBranches,
    keyword: &str,
    branches: Option<&Value>,
    instance: &Value,
    location: &str,
) -> Vec<ValidationViolation> {
    let summary = ValidationViolation {
        location: location.to_string(),
        keyword: keyword.to_string(),
        message: if keyword == "anyOf" {
            "must match a schema in anyOf".to_string()
        } else {
            "must match exactly one schema in oneOf".to_string()
        },
    };
    let Some(compiled) = branches
        .and_then(Value::as_array)
        .and_then(|branches| unions.get(&union_key(branches)))
    else {
        return vec![summary];
    };
    if compiled.iter().any(|branch| branch.validator().is_valid(instance)) {
        // oneOf matched more than one branch; there is nothing to explain per branch.
        return vec![summary];
    }

    let mut out: Vec<ValidationViolation> = compiled
        .iter()
        .flat_map(|branch| {
            collect_with(unions, branch.document(), branch.validator(), instance, location)
        })
        .collect();
    out.push(summary);
    out
}

fn message_for(keyword: &str, value: Option<&Value>) -> Option<String> {
    let message = match keyword {
        "pattern" => format!("must match pattern \"{}\"", value?.as_str()?),
        "format" => format!("must match format \"{}\"", value?.as_str()?),
        "type" => match value? {
            Value::String(t) => format!("must be {t}"),
            Value::Array(types) => {
                let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
                format!("must be {}", names.join(","))
            }
            _ => return None,
        },
        "minLength" => format!("must NOT have fewer than {} characters", value?),
        "maxLength" => format!("must NOT have more than {} characters", value?),
        "minimum" => format!("must be >= {}", value?),
        "maximum" => format!("must be <= {}", value?),
        "exclusiveMinimum" => format!("must be > {}", value?),
        "exclusiveMaximum" => format!("must be < {}", value?),
        "minItems" => format!("must NOT have fewer than {} items", value?),
        "maxItems" => format!("must NOT have more than {} items", value?),
        "minProperties" => format!("must NOT have fewer than {} properties", value?),
        "maxProperties" => format!("must NOT have more than {} properties", value?),
        "additionalProperties" => "must NOT have additional properties".to_string(),
        "enum" => "must be equal to one of the allowed values".to_string(),
        "const" => "must be equal to constant".to_string(),
        "multipleOf" => format!("must be multiple of {}", value?),
        "uniqueItems" => "must NOT have duplicate items".to_string(),
        "not" => "must NOT be valid".to_string(),
        _ => return None,
    };
    Some(message)
}
