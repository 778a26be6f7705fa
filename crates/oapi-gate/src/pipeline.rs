//! # Validation Pipeline
//!
//! [`ContractValidator`] owns the compiled contract and the coercion engine
//! and runs the two passes of every exchange.
//!
//! ## Request Pass
//!
//! 1. Primitive type coercion. Path, query and header sections always; the
//!    body only with `validateRequests.coerceTypes`.
//! 2. Structural validation of `{params, query, headers, body}` plus the
//!    predicates of registered formats. Skipped with
//!    `validateRequests: false`.
//! 3. Format coercion (deserialize). Always runs.
//!
//! ## Response Pass
//!
//! 1. Format coercion (serialize), then conversion to wire. A domain value
//!    left behind has no way back to JSON and fails at its location.
//! 2. Structural validation of the serialized value, optionally after type
//!    coercion. Skipped with `validateResponses: false`.
//!
//! Issues are collected for the whole phase; a phase with any issue ends
//! the pass. Request rejections are client faults, response rejections are
//! server faults.

use std::sync::Arc;

use oapi_core::{
    Annotation, CoercionFailure, Direction, FormatError, Issue, Payload, ValidationViolation,
};
use oapi_schema::{coerce_types, CompiledSchema, Contract, Operation};
use oapi_serdes::{CoercionEngine, FormatEntry, FormatRegistry};
use serde_json::{Map, Value};

use crate::config::ValidatorConfig;
use crate::error::{BuildError, GateError, Rejection};

/// Location prefix of request issues.
pub const REQUEST_PREFIX: &str = "request";

/// Location prefix of response issues.
pub const RESPONSE_PREFIX: &str = "/response";

/// Result of one validation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome<T> {
    /// The value passed; for requests it now carries domain values, for
    /// responses it is pure wire.
    Accepted(T),
    /// Every issue the failing phase found.
    Rejected(Rejection),
}

impl<T> ValidationOutcome<T> {
    /// Returns true for [`ValidationOutcome::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> Result<T, Rejection> {
        match self {
            Self::Accepted(value) => Ok(value),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}

/// Parts of an incoming request, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParts {
    /// Path parameters by name.
    pub params: Map<String, Value>,
    /// Query parameters by name; repeated keys hold an array.
    pub query: Map<String, Value>,
    /// Headers by lower-case name.
    pub headers: Map<String, Value>,
    /// Parsed JSON body, if there was one.
    pub body: Option<Value>,
}

impl RequestParts {
    /// Assemble the `{params, query, headers, body}` object the request
    /// schema describes.
    pub fn into_value(self) -> Value {
        let mut request = Map::new();
        request.insert("params".to_string(), Value::Object(self.params));
        request.insert("query".to_string(), Value::Object(self.query));
        request.insert("headers".to_string(), Value::Object(self.headers));
        if let Some(body) = self.body {
            request.insert("body".to_string(), body);
        }
        Value::Object(request)
    }
}

/// Validates requests and responses against one OpenAPI contract.
///
/// Built once at startup and shared behind an `Arc`; every pass only reads
/// it.
#[derive(Debug)]
pub struct ContractValidator {
    contract: Contract,
    engine: CoercionEngine,
    config: ValidatorConfig,
}

impl ContractValidator {
    /// Start building a validator.
    pub fn builder() -> ContractValidatorBuilder {
        ContractValidatorBuilder::default()
    }

    /// The compiled contract.
    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// The configuration the validator was built with.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Find the operation for `method` and a route template.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnknownOperation`] if the contract has none.
    pub fn operation(&self, method: &str, template: &str) -> Result<&Operation, GateError> {
        self.contract
            .operation(method, template)
            .ok_or_else(|| GateError::UnknownOperation {
                method: method.to_ascii_lowercase(),
                path: template.to_string(),
            })
    }

    /// Run the request pass over an assembled request object.
    pub async fn validate_request(
        &self,
        operation: &Operation,
        mut request: Value,
    ) -> ValidationOutcome<Payload> {
        let schema = operation.request_schema();
        let annotations = operation.request_annotations();
        let switch = self.config.validate_requests;

        coerce_sections(schema, &mut request, switch.coerce_types());

        let request = if switch.enabled() {
            let mut issues: Vec<Issue> = schema
                .violations(&request, REQUEST_PREFIX)
                .into_iter()
                .map(Issue::from)
                .collect();
            let request = Payload::from(request);
            issues.extend(
                self.engine
                    .check_formats(Direction::Request, &request, annotations, REQUEST_PREFIX)
                    .into_iter()
                    .map(Issue::from),
            );
            if !issues.is_empty() {
                return self.reject(operation, Direction::Request, issues);
            }
            request
        } else {
            Payload::from(request)
        };

        match self
            .coerce(Direction::Request, request, annotations, REQUEST_PREFIX)
            .await
        {
            Ok(coerced) => {
                tracing::debug!(
                    method = operation.method(),
                    path = operation.path(),
                    "request accepted"
                );
                ValidationOutcome::Accepted(coerced)
            }
            Err(failures) => self.reject(
                operation,
                Direction::Request,
                failures.into_iter().map(Issue::from).collect(),
            ),
        }
    }

    /// Run the response pass over the handler's payload for `status`.
    pub async fn validate_response(
        &self,
        operation: &Operation,
        status: u16,
        body: Payload,
    ) -> ValidationOutcome<Value> {
        let declared = operation.response(status);
        let annotations = declared
            .map(|(key, _)| operation.response_annotations(key))
            .unwrap_or_default();

        let serialized = match self
            .coerce(Direction::Response, body, annotations, RESPONSE_PREFIX)
            .await
        {
            Ok(serialized) => serialized,
            Err(failures) => {
                return self.reject(
                    operation,
                    Direction::Response,
                    failures.into_iter().map(Issue::from).collect(),
                )
            }
        };
        let mut wire = match serialized.into_wire() {
            Ok(wire) => wire,
            Err(leftovers) => {
                let issues = leftovers
                    .into_iter()
                    .map(|location| {
                        Issue::from(CoercionFailure {
                            location: format!("{RESPONSE_PREFIX}{location}"),
                            direction: Direction::Response,
                            format: None,
                            error: FormatError::new("domain value has no serializer"),
                        })
                    })
                    .collect();
                return self.reject(operation, Direction::Response, issues);
            }
        };

        let switch = self.config.validate_responses;
        if switch.enabled() {
            let issues: Vec<Issue> = match declared {
                None => vec![Issue::from(ValidationViolation {
                    location: RESPONSE_PREFIX.to_string(),
                    keyword: "responses".to_string(),
                    message: format!("no schema defined for status code '{status}'"),
                })],
                Some((_, None)) => Vec::new(),
                Some((_, Some(schema))) => {
                    if switch.coerce_types() {
                        coerce_types(schema.document(), schema.document(), &mut wire);
                    }
                    let mut issues: Vec<Issue> = schema
                        .violations(&wire, RESPONSE_PREFIX)
                        .into_iter()
                        .map(Issue::from)
                        .collect();
                    let wire_payload = Payload::from(wire.clone());
                    issues.extend(
                        self.engine
                            .check_formats(
                                Direction::Response,
                                &wire_payload,
                                annotations,
                                RESPONSE_PREFIX,
                            )
                            .into_iter()
                            .map(Issue::from),
                    );
                    issues
                }
            };
            if !issues.is_empty() {
                return self.reject(operation, Direction::Response, issues);
            }
        }

        tracing::debug!(
            method = operation.method(),
            path = operation.path(),
            status,
            "response accepted"
        );
        ValidationOutcome::Accepted(wire)
    }

    /// One coercion phase, bounded by the configured time limit.
    async fn coerce(
        &self,
        direction: Direction,
        value: Payload,
        annotations: &[Annotation],
        prefix: &str,
    ) -> Result<Payload, Vec<CoercionFailure>> {
        let pass = self.engine.apply(direction, value, annotations, prefix);
        let outcome = match self.config.coercion_timeout() {
            Some(limit) => match tokio::time::timeout(limit, pass).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(vec![CoercionFailure {
                        location: prefix.to_string(),
                        direction,
                        format: None,
                        error: FormatError::new(format!(
                            "coercion did not finish within {}ms",
                            limit.as_millis()
                        )),
                    }])
                }
            },
            None => pass.await,
        };
        if outcome.is_clean() {
            Ok(outcome.value)
        } else {
            Err(outcome.failures)
        }
    }

    fn reject<T>(
        &self,
        operation: &Operation,
        direction: Direction,
        issues: Vec<Issue>,
    ) -> ValidationOutcome<T> {
        let rejection = Rejection::new(direction, issues);
        match direction {
            Direction::Request => tracing::info!(
                method = operation.method(),
                path = operation.path(),
                issues = rejection.issues().len(),
                message = %rejection,
                "request rejected"
            ),
            Direction::Response => tracing::warn!(
                method = operation.method(),
                path = operation.path(),
                issues = rejection.issues().len(),
                message = %rejection,
                "response rejected"
            ),
        }
        ValidationOutcome::Rejected(rejection)
    }
}

/// Coerce the parameter sections of a request and, if asked, its body.
fn coerce_sections(schema: &CompiledSchema, request: &mut Value, body: bool) {
    let document = schema.document();
    let Some(sections) = document.get("properties").and_then(Value::as_object) else {
        return;
    };
    let Value::Object(members) = request else {
        return;
    };
    for (name, value) in members.iter_mut() {
        if name == "body" && !body {
            continue;
        }
        if let Some(section) = sections.get(name) {
            coerce_types(document, section, value);
        }
    }
}

/// Builder for [`ContractValidator`].
#[derive(Debug, Default)]
pub struct ContractValidatorBuilder {
    config: ValidatorConfig,
    serdes: Vec<FormatEntry>,
}

impl ContractValidatorBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a format after the configured built-ins. A later entry for
    /// the same name replaces an earlier one.
    pub fn serdes(mut self, entry: FormatEntry) -> Self {
        self.serdes.push(entry);
        self
    }

    /// Build against a parsed OpenAPI document.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if a `serDes` name is unknown or the
    /// contract does not compile against the registry.
    pub fn build(self, document: Value) -> Result<ContractValidator, BuildError> {
        let mut registry = FormatRegistry::new();
        for entry in self.config.builtin_entries()? {
            registry.register_override(entry);
        }
        for entry in self.serdes {
            if let Some(previous) = registry.register_override(entry) {
                tracing::debug!(format = previous.name(), "format entry replaced");
            }
        }
        for name in &self.config.unknown_formats {
            registry.allow_unknown(name.clone());
        }

        let contract = Contract::from_document(document, &registry)?;
        tracing::info!(
            formats = registry.len(),
            operations = contract.operations().count(),
            validate_requests = self.config.validate_requests.enabled(),
            validate_responses = self.config.validate_responses.enabled(),
            "contract validator ready"
        );
        Ok(ContractValidator {
            contract,
            engine: CoercionEngine::new(Arc::new(registry)),
            config: self.config,
        })
    }

    /// Build against a YAML (or JSON) OpenAPI document.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build); a source that does not parse is a
    /// [`oapi_core::ConfigurationError::InvalidDocument`].
    pub fn build_yaml(self, source: &str) -> Result<ContractValidator, BuildError> {
        let document: Value = serde_yaml::from_str(source).map_err(|e| {
            oapi_core::ConfigurationError::InvalidDocument(e.to_string())
        })?;
        self.build(document)
    }
}
