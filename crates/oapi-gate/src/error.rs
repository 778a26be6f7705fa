//! # Error Aggregation & HTTP Mapping
//!
//! A rejected pass carries every issue it found. The HTTP mapping is fixed:
//!
//! | source                         | status | body                       |
//! |--------------------------------|--------|----------------------------|
//! | request pass                   | 400    | `{message, code: 400}`     |
//! | response pass                  | 500    | `{message, code: 500}`     |
//! | no matching operation          | 404    | `{message, code: 404}`     |
//! | request body is not JSON       | 400    | `{message, code: 400}`     |
//! | query string does not decode   | 400    | `{message, code: 400}`     |
//! | path parameter does not decode | 400    | `{message, code: 400}`     |
//! | handler error with own status  | as is  | `{message, code: status}`  |
//!
//! `message` joins the rendered issues with `", "`.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use oapi_core::{ConfigurationError, Direction, Issue};
use serde::Serialize;
use thiserror::Error;

/// Every issue of one rejected pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    direction: Direction,
    issues: Vec<Issue>,
}

impl Rejection {
    /// Create a rejection for a pass in `direction`.
    pub fn new(direction: Direction, issues: Vec<Issue>) -> Self {
        Self { direction, issues }
    }

    /// Direction of the rejected pass.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The issues, in discovery order.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// 400 for requests (client fault), 500 for responses (server fault).
    pub fn status(&self) -> StatusCode {
        match self.direction {
            Direction::Request => StatusCode::BAD_REQUEST,
            Direction::Response => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// All issues joined with `", "`.
    pub fn message(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Errors that turn into HTTP responses.
#[derive(Error, Debug)]
pub enum GateError {
    /// A validation pass rejected the value.
    #[error("{0}")]
    Rejected(Rejection),

    /// No operation of the contract matches the route.
    #[error("no operation for {method} {path}")]
    UnknownOperation {
        /// Request method.
        method: String,
        /// Matched route template, or the raw path.
        path: String,
    },

    /// The request body could not be read or is not JSON.
    #[error("request body is not valid JSON: {0}")]
    MalformedBody(String),

    /// The query string does not decode.
    #[error("query string is malformed: {0}")]
    MalformedQuery(String),

    /// A path parameter does not decode.
    #[error("path parameters are malformed: {0}")]
    MalformedPath(String),

    /// A handler failure that already knows its status.
    #[error("{message}")]
    Handler {
        /// Status to answer with.
        status: StatusCode,
        /// Client-visible message.
        message: String,
    },
}

impl GateError {
    /// A handler error with its own status.
    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Handler {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rejected(rejection) => rejection.status(),
            Self::UnknownOperation { .. } => StatusCode::NOT_FOUND,
            Self::MalformedBody(_) | Self::MalformedQuery(_) | Self::MalformedPath(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Handler { status, .. } => *status,
        }
    }
}

impl From<Rejection> for GateError {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected(rejection)
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub message: String,
    /// HTTP status code, repeated in the body.
    pub code: u16,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::Rejected(r) if r.direction() == Direction::Response => {
                tracing::error!(error = %self, "response failed validation");
            }
            Self::Handler { .. } if status.is_server_error() => {
                tracing::error!(error = %self, %status, "handler error");
            }
            _ => tracing::debug!(error = %self, %status, "request rejected"),
        }

        let body = ErrorBody {
            message: self.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Errors building a [`ContractValidator`](crate::ContractValidator).
///
/// A validator that fails to build must keep the service from starting.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The contract or the format registrations are inconsistent.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The validator configuration does not parse.
    #[error("invalid validator configuration: {0}")]
    Config(String),

    /// `serDes` names something that is not a built-in format.
    #[error("unknown built-in format '{0}'")]
    UnknownBuiltin(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use oapi_core::{CoercionFailure, FormatError, ValidationViolation};

    fn violation(location: &str, message: &str) -> Issue {
        Issue::from(ValidationViolation {
            location: location.into(),
            keyword: "maxLength".into(),
            message: message.into(),
        })
    }

    #[test]
    fn request_rejection_is_a_client_error() {
        let rejection = Rejection::new(
            Direction::Request,
            vec![
                violation("request/body/shortOrLong", "must NOT have more than 2 characters"),
                violation("request/body/shortOrLong", "must match a schema in anyOf"),
            ],
        );
        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            rejection.message(),
            "request/body/shortOrLong must NOT have more than 2 characters, \
             request/body/shortOrLong must match a schema in anyOf"
        );
    }

    #[test]
    fn response_rejection_is_a_server_error() {
        let rejection = Rejection::new(
            Direction::Response,
            vec![Issue::from(CoercionFailure {
                location: "/response/creationDate".into(),
                direction: Direction::Response,
                format: Some("date".into()),
                error: FormatError::new("cannot serialize ObjectId as date"),
            })],
        );
        let err = GateError::from(rejection);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "/response/creationDate format is invalid");
    }

    #[test]
    fn handler_status_passes_through() {
        let err = GateError::handler(StatusCode::CONFLICT, "already exists");
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unknown_operation_is_not_found() {
        let err = GateError::UnknownOperation {
            method: "get".into(),
            path: "/nowhere".into(),
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
