//! # OpenAPI Contract
//!
//! Extracts, compiles and annotates every operation of an OpenAPI document
//! once, at startup. Traffic only ever reads the result.
//!
//! ## Request Schema
//!
//! The request of an operation is validated as one object:
//!
//! ```text
//! { "params": {...}, "query": {...}, "headers": {...}, "body": ... }
//! ```
//!
//! so violation locations read `request/params/id` or `request/body/tags`.
//! Path-level and operation-level parameters are merged (operation wins on
//! the same `name` + `in`), header names are lower-cased, and
//! `$ref`'d parameters and request bodies are resolved. Cookie parameters
//! are not part of the assembled request.
//!
//! ## Responses
//!
//! One schema per declared status key. A status code resolves to its exact
//! key, then its class key (`2XX`), then `default`.
//!
//! ## OpenAPI 3.0 Normalization
//!
//! Before compilation, `nullable: true` becomes a `"null"` member of `type`
//! and boolean `exclusiveMinimum`/`exclusiveMaximum` take the numeric
//! Draft 2020-12 form.

use std::fmt;

use oapi_core::{Annotation, AnnotationIndex, ConfigurationError, Target};
use oapi_serdes::FormatRegistry;
use serde_json::{json, Map, Value};

use crate::annotate::Annotator;
use crate::compile::{resolve_ref, CompiledSchema, StructuralCompiler};

const METHODS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Where a parameter is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterLocation {
    /// Templated path segment.
    Path,
    /// Query string.
    Query,
    /// Request header.
    Header,
    /// Cookie.
    Cookie,
}

impl ParameterLocation {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }

    /// Member of the assembled request holding these parameters.
    pub fn section(self) -> &'static str {
        match self {
            Self::Path => "params",
            Self::Query => "query",
            Self::Header => "headers",
            Self::Cookie => "cookies",
        }
    }
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct ResponseSchema {
    key: String,
    schema: Option<CompiledSchema>,
}

/// One compiled `method` + `path` pair.
#[derive(Debug)]
pub struct Operation {
    method: String,
    path: String,
    request: CompiledSchema,
    responses: Vec<ResponseSchema>,
    annotations: AnnotationIndex,
}

impl Operation {
    /// Lower-case HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path template, e.g. `/users/{id}`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Schema of the assembled request.
    pub fn request_schema(&self) -> &CompiledSchema {
        &self.request
    }

    /// Annotations of the assembled request.
    pub fn request_annotations(&self) -> &[Annotation] {
        self.annotations.for_target(&Target::Request)
    }

    /// Resolve `status` to its declared response key and body schema.
    ///
    /// Returns `None` if the operation declares neither the status, its
    /// class nor `default`. A declared response without JSON content has no
    /// schema.
    pub fn response(&self, status: u16) -> Option<(&str, Option<&CompiledSchema>)> {
        let exact = status.to_string();
        let class = format!("{}XX", status / 100);
        [exact.as_str(), class.as_str(), "default"]
            .iter()
            .find_map(|key| {
                self.responses
                    .iter()
                    .find(|r| r.key.eq_ignore_ascii_case(key))
            })
            .map(|r| (r.key.as_str(), r.schema.as_ref()))
    }

    /// Annotations of the response body declared under `key`.
    pub fn response_annotations(&self, key: &str) -> &[Annotation] {
        self.annotations.for_target(&Target::Response(key.to_string()))
    }

    /// Every annotation of the operation.
    pub fn annotations(&self) -> &AnnotationIndex {
        &self.annotations
    }
}

/// All operations of one OpenAPI document.
#[derive(Debug)]
pub struct Contract {
    document: Value,
    base_path: String,
    operations: Vec<Operation>,
}

impl Contract {
    /// Build a contract from a parsed OpenAPI document.
    ///
    /// # Errors
    ///
    /// Any problem with the document (unknown format, unresolvable
    /// reference, uncompilable schema, missing `paths`) is returned as a
    /// [`ConfigurationError`].
    pub fn from_document(
        mut document: Value,
        registry: &FormatRegistry,
    ) -> Result<Self, ConfigurationError> {
        normalize(&mut document);
        let base_path = base_path(&document);
        let paths = document
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| ConfigurationError::InvalidDocument("missing 'paths' object".into()))?;

        let operations = {
            let builder = OperationBuilder {
                document: &document,
                compiler: StructuralCompiler::new(&document),
                annotator: Annotator::new(&document, registry),
            };
            let mut operations = Vec::new();
            for (template, item) in paths {
                let item = builder.dereference(item, &format!("#/paths/{}", escape(template)))?;
                for method in METHODS {
                    if let Some(op) = item.get(method) {
                        operations.push(builder.build(template, method, item, op)?);
                    }
                }
            }
            operations
        };

        let annotation_count: usize = operations.iter().map(|o| o.annotations.len()).sum();
        tracing::info!(
            operations = operations.len(),
            annotations = annotation_count,
            base_path = %base_path,
            "contract compiled"
        );
        Ok(Self {
            document,
            base_path,
            operations,
        })
    }

    /// Parse a YAML document and build a contract from it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidDocument`] if the YAML does not
    /// parse, or any error of [`from_document`](Self::from_document).
    pub fn from_yaml_str(
        source: &str,
        registry: &FormatRegistry,
    ) -> Result<Self, ConfigurationError> {
        let document: Value = serde_yaml::from_str(source)
            .map_err(|e| ConfigurationError::InvalidDocument(e.to_string()))?;
        Self::from_document(document, registry)
    }

    /// Parse a JSON document and build a contract from it.
    ///
    /// # Errors
    ///
    /// See [`from_yaml_str`](Self::from_yaml_str).
    pub fn from_json_str(
        source: &str,
        registry: &FormatRegistry,
    ) -> Result<Self, ConfigurationError> {
        let document: Value = serde_json::from_str(source)
            .map_err(|e| ConfigurationError::InvalidDocument(e.to_string()))?;
        Self::from_document(document, registry)
    }

    /// The normalized document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Path of the first server URL (`/v1`), empty when there is none.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// All operations, in document order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    /// Find the operation for `method` and a route template.
    ///
    /// The template may carry the server base path (`/v1/users/{id}`) or
    /// not (`/users/{id}`).
    pub fn operation(&self, method: &str, template: &str) -> Option<&Operation> {
        let method = method.to_ascii_lowercase();
        let find = |path: &str| {
            self.operations
                .iter()
                .find(|op| op.method == method && op.path == path)
        };
        find(template).or_else(|| {
            template
                .strip_prefix(self.base_path.as_str())
                .filter(|rest| !self.base_path.is_empty() && rest.starts_with('/'))
                .and_then(find)
        })
    }
}

struct OperationBuilder<'a> {
    document: &'a Value,
    compiler: StructuralCompiler,
    annotator: Annotator<'a>,
}

struct Parameter<'a> {
    name: String,
    location: ParameterLocation,
    required: bool,
    schema: &'a Value,
}

impl<'a> OperationBuilder<'a> {
    fn build(
        &self,
        template: &str,
        method: &str,
        item: &'a Value,
        op: &'a Value,
    ) -> Result<Operation, ConfigurationError> {
        let location = format!("#/paths/{}/{method}", escape(template));
        let mut annotations = AnnotationIndex::new();

        let request_schema = self.request_schema(item, op, &location)?;
        let request_location = format!("{location}/request");
        let request = self.compiler.compile(&request_schema, &request_location)?;
        annotations.insert(
            Target::Request,
            self.annotator.annotate(&request_schema, &request_location)?,
        );

        let mut responses = Vec::new();
        if let Some(declared) = op.get("responses").and_then(Value::as_object) {
            for (key, response) in declared {
                let response_location = format!("{location}/responses/{key}");
                let response = self.dereference(response, &response_location)?;
                let schema = match json_schema(response.get("content")) {
                    Some(schema) => {
                        annotations.insert(
                            Target::Response(key.clone()),
                            self.annotator.annotate(schema, &response_location)?,
                        );
                        Some(self.compiler.compile(schema, &response_location)?)
                    }
                    None => None,
                };
                responses.push(ResponseSchema {
                    key: key.clone(),
                    schema,
                });
            }
        }

        tracing::debug!(
            method,
            path = template,
            responses = responses.len(),
            annotations = annotations.len(),
            "operation compiled"
        );
        Ok(Operation {
            method: method.to_string(),
            path: template.to_string(),
            request,
            responses,
            annotations,
        })
    }

    /// Assemble `{params, query, headers, body}` for one operation.
    fn request_schema(
        &self,
        item: &'a Value,
        op: &'a Value,
        location: &str,
    ) -> Result<Value, ConfigurationError> {
        let mut merged: Vec<Parameter<'a>> = Vec::new();
        for (source, owner) in [(item, "parameters"), (op, "parameters")] {
            let Some(list) = source.get(owner).and_then(Value::as_array) else {
                continue;
            };
            for (i, raw) in list.iter().enumerate() {
                let parameter = self.parameter(raw, &format!("{location}/parameters/{i}"))?;
                merged.retain(|p| !(p.name == parameter.name && p.location == parameter.location));
                merged.push(parameter);
            }
        }

        let mut sections = Map::new();
        for section in [
            ParameterLocation::Path,
            ParameterLocation::Query,
            ParameterLocation::Header,
        ] {
            let mut properties = Map::new();
            let mut required = Vec::new();
            for p in merged.iter().filter(|p| p.location == section) {
                properties.insert(p.name.clone(), p.schema.clone());
                if p.required {
                    required.push(Value::String(p.name.clone()));
                }
            }
            let mut schema = json!({"type": "object", "properties": properties});
            if !required.is_empty() {
                schema["required"] = Value::Array(required);
            }
            sections.insert(section.section().to_string(), schema);
        }

        let mut required = vec![json!("params"), json!("query"), json!("headers")];
        if let Some(body) = op.get("requestBody") {
            let body = self.dereference(body, &format!("{location}/requestBody"))?;
            if let Some(schema) = json_schema(body.get("content")) {
                sections.insert("body".to_string(), schema.clone());
                if body.get("required").and_then(Value::as_bool) == Some(true) {
                    required.push(json!("body"));
                }
            }
        }

        Ok(json!({
            "type": "object",
            "properties": sections,
            "required": required,
        }))
    }

    fn parameter(
        &self,
        raw: &'a Value,
        location: &str,
    ) -> Result<Parameter<'a>, ConfigurationError> {
        let raw = self.dereference(raw, location)?;
        let invalid = |what: &str| {
            ConfigurationError::InvalidDocument(format!("parameter at {location}: {what}"))
        };
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing 'name'"))?;
        let location_kind = raw
            .get("in")
            .and_then(Value::as_str)
            .and_then(ParameterLocation::parse)
            .ok_or_else(|| invalid("missing or unknown 'in'"))?;
        static ANY: Value = Value::Bool(true);
        let schema = raw
            .get("schema")
            .or_else(|| json_schema(raw.get("content")))
            .unwrap_or(&ANY);
        let name = match location_kind {
            ParameterLocation::Header => name.to_ascii_lowercase(),
            _ => name.to_string(),
        };
        Ok(Parameter {
            name,
            location: location_kind,
            required: location_kind == ParameterLocation::Path
                || raw.get("required").and_then(Value::as_bool) == Some(true),
            schema,
        })
    }

    /// Follow a chain of `$ref`s on a non-schema object.
    fn dereference(
        &self,
        mut node: &'a Value,
        location: &str,
    ) -> Result<&'a Value, ConfigurationError> {
        let mut hops = 0;
        while let Some(reference) = node.get("$ref").and_then(Value::as_str) {
            hops += 1;
            node = resolve_ref(self.document, reference)
                .filter(|_| hops <= crate::MAX_SCHEMA_DEPTH)
                .ok_or_else(|| ConfigurationError::UnresolvedReference {
                    reference: reference.to_string(),
                    location: location.to_string(),
                })?;
        }
        Ok(node)
    }
}

/// Schema of the JSON media type in a `content` map, falling back to the
/// first media type that carries a schema.
fn json_schema(content: Option<&Value>) -> Option<&Value> {
    let content = content?.as_object()?;
    let by_kind = |json_only: bool| {
        content
            .iter()
            .filter(|(media, _)| !json_only || media.contains("json"))
            .find_map(|(_, media)| media.get("schema"))
    };
    content
        .get("application/json")
        .and_then(|m| m.get("schema"))
        .or_else(|| by_kind(true))
        .or_else(|| by_kind(false))
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn base_path(document: &Value) -> String {
    let Some(url) = document
        .pointer("/servers/0/url")
        .and_then(Value::as_str)
    else {
        return String::new();
    };
    let path = match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            rest.find('/').map_or("", |i| &rest[i..])
        }
        None => url,
    };
    path.trim_end_matches('/').to_string()
}

/// Rewrite OpenAPI 3.0 schema idioms into their Draft 2020-12 form.
fn normalize(node: &mut Value) {
    match node {
        Value::Object(map) => {
            // Only boolean values are the 3.0 keywords; an object value is a
            // property that happens to share the name.
            if let Some(Value::Bool(nullable)) = map.get("nullable") {
                let nullable = *nullable;
                map.shift_remove("nullable");
                match map.get_mut("type") {
                    Some(Value::String(name)) if nullable => {
                        let name = std::mem::take(name);
                        map.insert("type".to_string(), json!([name, "null"]));
                    }
                    Some(Value::Array(names)) if nullable && !names.contains(&json!("null")) => {
                        names.push(json!("null"));
                    }
                    _ => {}
                }
            }
            let bounds = [("exclusiveMinimum", "minimum"), ("exclusiveMaximum", "maximum")];
            for (exclusive, bound) in bounds {
                let Some(Value::Bool(flag)) = map.get(exclusive) else {
                    continue;
                };
                match (*flag, map.shift_remove(bound)) {
                    (true, Some(limit)) => {
                        map.insert(exclusive.to_string(), limit);
                    }
                    (false, Some(limit)) => {
                        map.shift_remove(exclusive);
                        map.insert(bound.to_string(), limit);
                    }
                    (_, None) => {
                        map.shift_remove(exclusive);
                    }
                }
            }
            map.values_mut().for_each(normalize);
        }
        Value::Array(items) => items.iter_mut().for_each(normalize),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oapi_serdes::FormatEntry;
    use oapi_core::Payload;

    const USERS: &str = r##"
openapi: 3.0.3
info: {title: users, version: "1"}
servers:
  - url: http://localhost:8080/v1
paths:
  /users/{id}:
    parameters:
      - $ref: '#/components/parameters/UserId'
    get:
      parameters:
        - name: X-Trace
          in: header
          schema: {type: string}
        - name: limit
          in: query
          schema: {type: integer}
      responses:
        '200':
          content:
            application/json:
              schema: {$ref: '#/components/schemas/User'}
        4XX:
          description: client error
  /users:
    post:
      requestBody:
        $ref: '#/components/requestBodies/User'
      responses:
        default:
          content:
            application/json:
              schema: {$ref: '#/components/schemas/User'}
components:
  parameters:
    UserId:
      name: id
      in: path
      schema: {$ref: '#/components/schemas/ObjectId'}
  requestBodies:
    User:
      required: true
      content:
        application/json:
          schema: {$ref: '#/components/schemas/User'}
  schemas:
    ObjectId:
      type: string
      format: mongo-objectid
      pattern: '^[0-9a-fA-F]{24}$'
    User:
      type: object
      required: [id]
      properties:
        id: {$ref: '#/components/schemas/ObjectId'}
        nickname: {type: string, nullable: true}
        creationDate: {type: string, format: date}
"##;

    fn registry() -> FormatRegistry {
        let mut registry = FormatRegistry::with_builtins();
        registry
            .register(
                FormatEntry::new("mongo-objectid").deserialize(|v| Ok(Payload::from(v.clone()))),
            )
            .unwrap();
        registry
    }

    #[test]
    fn operations_are_extracted() {
        let contract = Contract::from_yaml_str(USERS, &registry()).unwrap();
        let ops: Vec<(&str, &str)> = contract
            .operations()
            .map(|o| (o.method(), o.path()))
            .collect();
        assert_eq!(ops, vec![("get", "/users/{id}"), ("post", "/users")]);
        assert_eq!(contract.base_path(), "/v1");
        assert!(contract.operation("GET", "/v1/users/{id}").is_some());
        assert!(contract.operation("get", "/users/{id}").is_some());
        assert!(contract.operation("delete", "/users/{id}").is_none());
    }

    #[test]
    fn request_schema_merges_parameters() {
        let contract = Contract::from_yaml_str(USERS, &registry()).unwrap();
        let op = contract.operation("get", "/users/{id}").unwrap();
        let schema = op.request_schema();
        assert!(schema.is_valid(&json!({
            "params": {"id": "5fdefd13a6640bb5fb5fa925"},
            "query": {"limit": 3},
            "headers": {"x-trace": "abc"}
        })));
        let violations: Vec<String> = schema
            .violations(&json!({"params": {"id": "1234"}, "query": {}, "headers": {}}), "request")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(violations, vec![r#"request/params/id must match pattern "^[0-9a-fA-F]{24}$""#]);

        let paths: Vec<String> = op.request_annotations().iter().map(Annotation::path).collect();
        assert_eq!(paths, vec!["/params/id"]);
    }

    #[test]
    fn request_body_reference_is_resolved_and_required() {
        let contract = Contract::from_yaml_str(USERS, &registry()).unwrap();
        let op = contract.operation("post", "/users").unwrap();
        let empty = json!({"params": {}, "query": {}, "headers": {}});
        assert!(!op.request_schema().is_valid(&empty));
        let paths: Vec<String> = op.request_annotations().iter().map(Annotation::path).collect();
        assert_eq!(paths, vec!["/body/id", "/body/creationDate"]);
    }

    #[test]
    fn response_lookup_falls_back_to_class_and_default() {
        let contract = Contract::from_yaml_str(USERS, &registry()).unwrap();
        let get = contract.operation("get", "/users/{id}").unwrap();
        assert_eq!(get.response(200).map(|(k, s)| (k, s.is_some())), Some(("200", true)));
        assert_eq!(get.response(404).map(|(k, s)| (k, s.is_some())), Some(("4XX", false)));
        assert!(get.response(500).is_none());
        let post = contract.operation("post", "/users").unwrap();
        assert_eq!(post.response(201).map(|(k, _)| k), Some("default"));
        assert_eq!(post.response_annotations("default").len(), 2);
    }

    #[test]
    fn nullable_is_normalized() {
        let contract = Contract::from_yaml_str(USERS, &registry()).unwrap();
        assert_eq!(
            contract.document().pointer("/components/schemas/User/properties/nickname/type"),
            Some(&json!(["string", "null"]))
        );
        let (_, schema) = contract.operation("post", "/users").unwrap().response(200).unwrap();
        assert!(schema
            .unwrap()
            .is_valid(&json!({"id": "5fdefd13a6640bb5fb5fa925", "nickname": null})));
    }

    #[test]
    fn boolean_exclusive_bounds_are_rewritten() {
        let mut doc = json!({"minimum": 1, "exclusiveMinimum": true, "exclusiveMaximum": false});
        normalize(&mut doc);
        assert_eq!(doc, json!({"exclusiveMinimum": 1}));
    }

    #[test]
    fn unknown_format_fails_the_contract() {
        let source = USERS.replace("format: date}", "format: color}");
        let err = Contract::from_yaml_str(&source, &registry()).unwrap_err();
        assert!(
            matches!(
                err,
                ConfigurationError::UnknownFormat { ref format, .. } if format == "color"
            ),
            "{err}"
        );
    }

    #[test]
    fn missing_paths_rejected() {
        let err = Contract::from_json_str(r#"{"openapi": "3.1.0"}"#, &registry()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidDocument(_)));
    }

    #[test]
    fn base_path_from_relative_server() {
        assert_eq!(base_path(&json!({"servers": [{"url": "/api/v2/"}]})), "/api/v2");
        assert_eq!(base_path(&json!({"servers": [{"url": "https://example.com"}]})), "");
        assert_eq!(base_path(&json!({})), "");
    }
}
