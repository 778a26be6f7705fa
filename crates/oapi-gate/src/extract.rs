//! # Axum Integration
//!
//! [`ValidatedRequest`] runs the request pass inside extraction, so a
//! handler only ever sees a request that passed, with domain values at
//! every formatted location. [`ValidatedRequest::respond`] runs the
//! response pass over what the handler returns.
//!
//! ```ignore
//! async fn get_user(request: ValidatedRequest) -> Response {
//!     let id = request.param("id").and_then(|p| p.downcast_ref::<ObjectId>());
//!     let user = load(id).await;
//!     request.respond(StatusCode::OK, user).await
//! }
//!
//! let app = Router::new()
//!     .route("/v1/users/{id}", get(get_user))
//!     .with_state(Arc::new(validator));
//! ```
//!
//! The operation is found from the matched route template, which axum 0.8
//! writes in the same `{name}` syntax as OpenAPI.

use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{
    FromRef, FromRequest, FromRequestParts, MatchedPath, Query, RawPathParams, Request,
};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use oapi_core::Payload;
use serde_json::{Map, Value};

use crate::error::GateError;
use crate::pipeline::{ContractValidator, RequestParts, ValidationOutcome};

/// Largest request body read by the extractor.
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

static MISSING: Payload = Payload::Null;

/// A request that passed validation.
///
/// Holds the coerced `{params, query, headers, body}` payload and enough of
/// the route to validate the matching response.
#[derive(Debug)]
pub struct ValidatedRequest {
    validator: Arc<ContractValidator>,
    method: String,
    template: String,
    payload: Payload,
}

impl ValidatedRequest {
    /// Lower-case method of the matched operation.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path template of the matched operation.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Coerced path parameters.
    pub fn params(&self) -> &Payload {
        self.section("params")
    }

    /// Coerced query parameters.
    pub fn query(&self) -> &Payload {
        self.section("query")
    }

    /// Coerced headers, by lower-case name.
    pub fn headers(&self) -> &Payload {
        self.section("headers")
    }

    /// Coerced body; `null` when the request had none.
    pub fn body(&self) -> &Payload {
        self.section("body")
    }

    /// One path parameter.
    pub fn param(&self, name: &str) -> Option<&Payload> {
        self.params().get(name)
    }

    /// One query parameter.
    pub fn query_param(&self, name: &str) -> Option<&Payload> {
        self.query().get(name)
    }

    /// Move the body out, leaving `null` behind.
    pub fn take_body(&mut self) -> Payload {
        self.payload.remove("body").unwrap_or_default()
    }

    /// The whole coerced request.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Run the response pass and render the result.
    ///
    /// An accepted body is sent with `status`; a rejected one becomes a 500
    /// error response.
    pub async fn respond(&self, status: StatusCode, body: Payload) -> Response {
        let operation = match self.validator.operation(&self.method, &self.template) {
            Ok(operation) => operation,
            Err(err) => return err.into_response(),
        };
        match self
            .validator
            .validate_response(operation, status.as_u16(), body)
            .await
        {
            ValidationOutcome::Accepted(wire) => (status, Json(wire)).into_response(),
            ValidationOutcome::Rejected(rejection) => GateError::from(rejection).into_response(),
        }
    }

    fn section(&self, name: &str) -> &Payload {
        self.payload.get(name).unwrap_or(&MISSING)
    }
}

impl<S> FromRequest<S> for ValidatedRequest
where
    Arc<ContractValidator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GateError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let validator = Arc::<ContractValidator>::from_ref(state);
        let (mut parts, body) = req.into_parts();

        let template = parts
            .extensions
            .get::<MatchedPath>()
            .map_or_else(|| parts.uri.path().to_string(), |m| m.as_str().to_string());
        let operation = validator.operation(parts.method.as_str(), &template)?;
        let (method, template) = (operation.method().to_string(), operation.path().to_string());

        let request = RequestParts {
            params: path_params(&mut parts, state).await?,
            query: query_params(&parts)?,
            headers: headers(&parts),
            body: json_body(body).await?,
        };

        let payload = match validator.validate_request(operation, request.into_value()).await {
            ValidationOutcome::Accepted(payload) => payload,
            ValidationOutcome::Rejected(rejection) => return Err(rejection.into()),
        };
        Ok(Self {
            validator,
            method,
            template,
            payload,
        })
    }
}

/// Raw path parameters; a request routed without any has none.
async fn path_params<S: Send + Sync>(
    parts: &mut Parts,
    state: &S,
) -> Result<Map<String, Value>, GateError> {
    match RawPathParams::from_request_parts(parts, state).await {
        Ok(raw) => Ok(raw
            .iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect()),
        Err(RawPathParamsRejection::MissingPathParams(_)) => Ok(Map::new()),
        Err(rejection) => Err(GateError::MalformedPath(rejection.body_text())),
    }
}

/// Decode the query string; a repeated key collects its values in order.
fn query_params(parts: &Parts) -> Result<Map<String, Value>, GateError> {
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
        .map_err(|e| GateError::MalformedQuery(e.body_text()))?;
    let mut query = Map::new();
    for (name, value) in pairs {
        let value = Value::String(value);
        match query.get_mut(&name) {
            Some(Value::Array(values)) => values.push(value),
            Some(first) => {
                let first = first.take();
                query.insert(name, Value::Array(vec![first, value]));
            }
            None => {
                query.insert(name, value);
            }
        }
    }
    Ok(query)
}

/// Headers by lower-case name; repeated headers are joined with `", "`.
/// Values that are not visible ASCII are skipped.
fn headers(parts: &Parts) -> Map<String, Value> {
    let mut headers = Map::new();
    for (name, value) in &parts.headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        match headers.get_mut(name.as_str()) {
            Some(Value::String(joined)) => {
                joined.push_str(", ");
                joined.push_str(value);
            }
            _ => {
                headers.insert(name.as_str().to_string(), Value::String(value.to_string()));
            }
        }
    }
    headers
}

async fn json_body(body: Body) -> Result<Option<Value>, GateError> {
    let bytes = body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|e| GateError::MalformedBody(e.to_string()))?;
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| GateError::MalformedBody(e.to_string()))
}
