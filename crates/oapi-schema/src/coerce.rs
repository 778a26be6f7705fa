//! # Primitive Type Coercion
//!
//! Path, query and header parameters always arrive as strings; bodies may
//! carry `"42"` where the contract says `integer`. [`coerce_types`] rewrites
//! such primitives in place when the conversion is lossless, before the
//! structural check runs:
//!
//! | to        | from                                                  |
//! |-----------|-------------------------------------------------------|
//! | `number`  | numeric string, `true`/`false` (1/0), `null` (0)      |
//! | `integer` | integral string, `true`/`false`, `null`              |
//! | `string`  | number, boolean, `null` (`""`)                        |
//! | `boolean` | `"true"`/`"false"`, 1/0, `null` (`false`)              |
//! | `null`    | `""`, 0, `false`                                      |
//! | `array`   | any primitive, wrapped as a one-element array         |
//!
//! A value already matching one of the declared types is left alone.
//! Anything that does not convert cleanly is left for the structural check
//! to reject.
//!
//! Under `anyOf`/`oneOf` the value takes the first branch, in declaration
//! order, whose declared type it has after that branch's conversion.

use serde_json::{Map, Number, Value};

use crate::compile::resolve_ref;

/// Consecutive `$ref`/`allOf` hops allowed without descending into the value.
const MAX_REF_HOPS: usize = 32;

/// Coerce primitives in `value` towards the types `schema` declares.
///
/// `document` is the compiled document `schema` belongs to; it is used to
/// resolve local `$ref`s.
pub fn coerce_types(document: &Value, schema: &Value, value: &mut Value) {
    coerce(document, schema, value, 0);
}

fn coerce(document: &Value, schema: &Value, value: &mut Value, hops: usize) {
    let Value::Object(keywords) = schema else {
        return;
    };

    if let Some(Value::String(reference)) = keywords.get("$ref") {
        if hops < MAX_REF_HOPS {
            if let Some(target) = resolve_ref(document, reference) {
                coerce(document, target, value, hops + 1);
            }
        }
    }
    if let Some(Value::Array(parts)) = keywords.get("allOf") {
        if hops < MAX_REF_HOPS {
            for part in parts {
                coerce(document, part, value, hops + 1);
            }
        }
    }
    for keyword in ["anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = keywords.get(keyword) {
            if hops < MAX_REF_HOPS {
                coerce_union(document, branches, value, hops + 1);
            }
        }
    }

    let declared = declared_types(keywords);
    if !declared.is_empty() && !declared.iter().any(|t| has_type(value, t)) {
        if let Some(coerced) = declared.iter().find_map(|t| convert(value, t)) {
            *value = coerced;
        }
    }

    match value {
        Value::Object(members) => {
            let properties = keywords.get("properties").and_then(Value::as_object);
            let additional = keywords
                .get("additionalProperties")
                .filter(|a| a.is_object());
            for (name, member) in members.iter_mut() {
                match properties.and_then(|p| p.get(name)) {
                    Some(sub) => coerce(document, sub, member, 0),
                    None => {
                        if let Some(sub) = additional {
                            coerce(document, sub, member, 0);
                        }
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(sub) = keywords.get("items").filter(|i| i.is_object()) {
                for item in items.iter_mut() {
                    coerce(document, sub, item, 0);
                }
            }
        }
        _ => {}
    }
}

fn coerce_union(document: &Value, branches: &[Value], value: &mut Value, hops: usize) {
    let fits = |branch: &Value, candidate: &Value| {
        let declared = branch_types(document, branch);
        declared.is_empty() || declared.iter().any(|t| has_type(candidate, t))
    };

    let chosen = branches.iter().find_map(|branch| {
        let mut candidate = value.clone();
        coerce(document, branch, &mut candidate, hops);
        fits(branch, &candidate).then_some(candidate)
    });
    if let Some(candidate) = chosen {
        *value = candidate;
    }
}

fn declared_types(keywords: &Map<String, Value>) -> Vec<&str> {
    match keywords.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Declared types of a branch, looking through top-level `$ref`s.
fn branch_types<'a>(document: &'a Value, mut branch: &'a Value) -> Vec<&'a str> {
    for _ in 0..MAX_REF_HOPS {
        let Value::Object(keywords) = branch else {
            return Vec::new();
        };
        let declared = declared_types(keywords);
        if !declared.is_empty() {
            return declared;
        }
        match keywords
            .get("$ref")
            .and_then(Value::as_str)
            .and_then(|r| resolve_ref(document, r))
        {
            Some(target) => branch = target,
            None => break,
        }
    }
    Vec::new()
}

fn has_type(value: &Value, declared: &str) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.as_i64().is_some() || value.as_u64().is_some() || is_integral_float(value)
        }
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => false,
    }
}

fn is_integral_float(value: &Value) -> bool {
    value.as_f64().is_some_and(|f| f.fract() == 0.0 && f.is_finite())
}

fn convert(value: &Value, target: &str) -> Option<Value> {
    match (target, value) {
        ("number", Value::String(s)) => parse_number(s),
        ("integer", Value::String(s)) => parse_number(s).filter(|n| has_type(n, "integer")),
        ("number" | "integer", Value::Bool(b)) => Some(Value::from(u8::from(*b))),
        ("number" | "integer", Value::Null) => Some(Value::from(0)),
        ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
        ("string", Value::Bool(b)) => Some(Value::String(b.to_string())),
        ("string", Value::Null) => Some(Value::String(String::new())),
        ("boolean", Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ("boolean", Value::Number(n)) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(Value::Bool(true)),
            Some(f) if f == 0.0 => Some(Value::Bool(false)),
            _ => None,
        },
        ("boolean", Value::Null) => Some(Value::Bool(false)),
        ("null", Value::String(s)) if s.is_empty() => Some(Value::Null),
        ("null", Value::Number(n)) if n.as_f64() == Some(0.0) => Some(Value::Null),
        ("null", Value::Bool(false)) => Some(Value::Null),
        ("array", v) if !v.is_array() && !v.is_object() => Some(Value::Array(vec![v.clone()])),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed != s {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    if let Ok(u) = s.parse::<u64>() {
        return Some(Value::from(u));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
