//! # Integration Tests for oapi-gate
//!
//! Drives axum routers guarded by a [`ContractValidator`] through
//! `tower::ServiceExt::oneshot`: path and body deserialization into domain
//! types, Ajv-worded rejections, response serialization (full, serializer
//! only, custom list format) and nested date-times in arrays.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::handler::Handler;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, NaiveDate, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use tracing_subscriber::EnvFilter;

use oapi_gate::{
    ContractValidator, FormatEntry, FormatError, GateError, Payload, ValidatedRequest,
    ValidatorConfig,
};

const USERS: &str = include_str!("fixtures/users.yaml");
const EXPORT: &str = include_str!("fixtures/export.json");

const GOOD_ID: &str = "5fdefd13a6640bb5fb5fa925";
const INSTANT: &str = "2020-12-20T07:28:19.213Z";

#[derive(Debug, Clone, PartialEq)]
struct ObjectId(String);

impl Default for ObjectId {
    fn default() -> Self {
        Self(GOOD_ID.to_string())
    }
}

/// A `mongo-objectid` entry with both functions.
fn mongo_objectid() -> FormatEntry {
    FormatEntry::new("mongo-objectid")
        .deserialize(|wire| {
            wire.as_str()
                .map(|s| Payload::domain(ObjectId(s.to_string())))
                .ok_or_else(|| FormatError::new("ObjectId must be a string"))
        })
        .serialize(|domain| {
            domain
                .downcast_ref::<ObjectId>()
                .map(|id| Value::String(id.0.clone()))
                .ok_or_else(|| FormatError::new("not an ObjectId"))
        })
}

/// A `string-list` entry: `"a, b"` ⇄ `["a", "b"]`.
fn string_list() -> FormatEntry {
    FormatEntry::new("string-list")
        .deserialize(|wire| {
            let s = wire
                .as_str()
                .ok_or_else(|| FormatError::new("string-list must be a string"))?;
            Ok(Payload::from(
                s.split(',')
                    .map(|item| Payload::from(item.trim()))
                    .collect::<Vec<_>>(),
            ))
        })
        .serialize(|domain| {
            let items = domain
                .as_array()
                .ok_or_else(|| FormatError::new("string-list must be an array"))?;
            let parts = items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| FormatError::new("list item must be a string"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::String(parts.join(",")))
        })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(source: &str) -> ValidatorConfig {
    ValidatorConfig::from_yaml_str(source).unwrap()
}

fn instant() -> DateTime<Utc> {
    INSTANT.parse().unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send one request and decode the JSON answer.
async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    init_tracing();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn message(body: &Value) -> &str {
    body["message"].as_str().unwrap_or_default()
}

type SharedValidator = Arc<ContractValidator>;

fn users_router<G, GT, P, PT>(validator: ContractValidator, get_user: G, post_user: P) -> Router
where
    G: Handler<GT, SharedValidator>,
    P: Handler<PT, SharedValidator>,
    GT: 'static,
    PT: 'static,
{
    Router::new()
        .route("/v1/users/{id}", get(get_user))
        .route("/v1/users", post(post_user))
        .route("/v1/unlisted", get(unlisted))
        .with_state(Arc::new(validator))
}

async fn unlisted(_request: ValidatedRequest) -> StatusCode {
    StatusCode::OK
}

fn handler_error(message: &str) -> GateError {
    GateError::handler(StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn history(entries: usize) -> Payload {
    Payload::from(
        (0..entries)
            .map(|_| [("modificationDate", Payload::domain(instant()))].into_iter().collect())
            .collect::<Vec<Payload>>(),
    )
}

// -- Full serDes: date, date-time and mongo-objectid ---------------------------

fn full_app() -> Router {
    let validator = ContractValidator::builder()
        .config(config(
            r#"
validateRequests: {coerceTypes: true}
validateResponses: {coerceTypes: true}
serDes: [date, date-time]
unknownFormats: [string-list]
"#,
        ))
        .serdes(mongo_objectid())
        .build_yaml(USERS)
        .unwrap();
    users_router(validator, full_get_user, full_post_user)
}

async fn full_get_user(request: ValidatedRequest) -> Result<Response, GateError> {
    let id = request
        .param("id")
        .filter(|id| id.downcast_ref::<ObjectId>().is_some())
        .cloned()
        .ok_or_else(|| handler_error("Should be deserialized to ObjectId object"))?;
    let user: Payload = [
        ("id", id),
        ("shortOrLong", Payload::from("a")),
        ("history", history(4)),
    ]
    .into_iter()
    .collect();
    Ok(request.respond(StatusCode::OK, user).await)
}

async fn full_post_user(mut request: ValidatedRequest) -> Result<Response, GateError> {
    let body = request.take_body();
    if body.get("id").and_then(|p| p.downcast_ref::<ObjectId>()).is_none() {
        return Err(handler_error("Should be deserialized to ObjectId object"));
    }
    if body.get("creationDate").and_then(|p| p.downcast_ref::<NaiveDate>()).is_none() {
        return Err(handler_error("Should be deserialized to a date"));
    }
    if body
        .get("creationDateTime")
        .and_then(|p| p.downcast_ref::<DateTime<Utc>>())
        .is_none()
    {
        return Err(handler_error("Should be deserialized to a date-time"));
    }
    Ok(request.respond(StatusCode::OK, body).await)
}

#[tokio::test]
async fn full_bad_id_format_is_rejected() {
    let (status, body) = send(full_app(), get_request("/v1/users/1234")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message(&body), r#"request/params/id must match pattern "^[0-9a-fA-F]{24}$""#);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn undecodable_path_parameter_is_a_bad_request() {
    let (status, body) = send(full_app(), get_request("/v1/users/%FF")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(message(&body).starts_with("path parameters are malformed"), "{body}");
    assert!(message(&body).contains("`id`"), "{body}");
}

#[tokio::test]
async fn full_good_id_round_trips_and_dates_lose_their_time() {
    let (status, body) = send(full_app(), get_request(&format!("/v1/users/{GOOD_ID}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], GOOD_ID);
    assert_eq!(body["history"].as_array().map(Vec::len), Some(4));
    for entry in body["history"].as_array().unwrap() {
        assert_eq!(entry["modificationDate"], "2020-12-20");
    }
}

#[tokio::test]
async fn full_post_deserializes_then_serializes() {
    let (status, body) = send(
        full_app(),
        post_json(
            "/v1/users",
            json!({
                "id": GOOD_ID,
                "tags": "aa,bb,cc",
                "creationDateTime": INSTANT,
                "creationDate": "2020-12-20",
                "shortOrLong": "ab"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], GOOD_ID);
    assert_eq!(body["creationDate"], "2020-12-20");
    assert_eq!(body["creationDateTime"], INSTANT);
    // allow-listed format: untouched both ways
    assert_eq!(body["tags"], "aa,bb,cc");
}

#[tokio::test]
async fn full_post_bad_object_id() {
    let (status, body) = send(
        full_app(),
        post_json(
            "/v1/users",
            json!({
                "id": "5fdefd13a6640bb5fb5fa",
                "creationDateTime": INSTANT,
                "creationDate": "2020-12-20",
                "shortOrLong": "abcd"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message(&body), r#"request/body/id must match pattern "^[0-9a-fA-F]{24}$""#);
}

#[tokio::test]
async fn full_post_bad_date() {
    let (status, body) = send(
        full_app(),
        post_json(
            "/v1/users",
            json!({"id": GOOD_ID, "creationDateTime": INSTANT, "creationDate": "2020-1f-20"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message(&body), r#"request/body/creationDate must match format "date""#);
}

#[tokio::test]
async fn full_any_of_reports_every_branch_then_the_summary() {
    let (status, body) = send(
        full_app(),
        post_json(
            "/v1/users",
            json!({
                "id": GOOD_ID,
                "creationDateTime": INSTANT,
                "creationDate": "2020-12-20",
                "shortOrLong": "abc"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        message(&body),
        [
            "request/body/shortOrLong must NOT have more than 2 characters",
            "request/body/shortOrLong must NOT have fewer than 4 characters",
            "request/body/shortOrLong must match a schema in anyOf",
        ]
        .join(", ")
    );
}

#[tokio::test]
async fn missing_required_property() {
    let (status, body) = send(
        full_app(),
        post_json("/v1/users", json!({"creationDate": "2020-12-20"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message(&body), "request/body must have required property 'id'");
}

#[tokio::test]
async fn malformed_json_body_is_a_client_error() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/users")
        .header("content-type", "application/json")
        .body(Body::from("{\"id\": "))
        .unwrap();
    let (status, body) = send(full_app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn route_outside_the_contract_is_not_found() {
    let (status, body) = send(full_app(), get_request("/v1/unlisted")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}

// -- Serializer-only: responses carry domain values, requests stay wire --------

fn serializer_only_app() -> Router {
    let validator = ContractValidator::builder()
        .config(config(
            r#"
validateRequests: {coerceTypes: true}
validateResponses: {coerceTypes: true}
serDes: [date.serializer, date-time.serializer]
unknownFormats: [mongo-objectid, string-list]
"#,
        ))
        .serdes(mongo_objectid().serializer_only())
        .build_yaml(USERS)
        .unwrap();
    users_router(
        validator,
        serializer_only_get_user,
        serializer_only_post_user,
    )
}

async fn serializer_only_get_user(request: ValidatedRequest) -> Result<Response, GateError> {
    let id = request
        .param("id")
        .and_then(Payload::as_str)
        .ok_or_else(|| handler_error("Should not be deserialized to ObjectId object"))?;
    let creation_date = match request.query_param("baddateresponse").and_then(Payload::as_str) {
        Some("functionNotExists") => Payload::domain(ObjectId::default()),
        _ => Payload::domain(instant()),
    };
    let user: Payload = [
        ("id", Payload::domain(ObjectId(id.to_string()))),
        ("creationDateTime", Payload::domain(instant())),
        ("creationDate", creation_date),
        ("shortOrLong", Payload::from("a")),
        ("history", history(1)),
    ]
    .into_iter()
    .collect();
    Ok(request.respond(StatusCode::OK, user).await)
}

async fn serializer_only_post_user(mut request: ValidatedRequest) -> Result<Response, GateError> {
    let mut body = request.take_body();
    let id = body
        .get("id")
        .and_then(Payload::as_str)
        .ok_or_else(|| handler_error("Should not be deserialized to ObjectId object"))?
        .to_string();
    if body.get("creationDate").and_then(Payload::as_str).is_none() {
        return Err(handler_error("Should not be deserialized to a date"));
    }
    let created: DateTime<Utc> = body
        .get("creationDateTime")
        .and_then(Payload::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| handler_error("Should not be deserialized to a date-time"))?;
    body.insert("id", Payload::domain(ObjectId(id)));
    body.insert("creationDateTime", Payload::domain(created));
    // creationDate stays a wire string and passes through the serializer
    Ok(request.respond(StatusCode::OK, body).await)
}

#[tokio::test]
async fn serializer_only_bad_id_format_is_rejected() {
    let (status, body) = send(serializer_only_app(), get_request("/v1/users/1234")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message(&body), r#"request/params/id must match pattern "^[0-9a-fA-F]{24}$""#);
}

#[tokio::test]
async fn serializer_only_response_is_serialized() {
    let (status, body) = send(
        serializer_only_app(),
        get_request(&format!("/v1/users/{GOOD_ID}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], GOOD_ID);
    assert_eq!(body["creationDate"], "2020-12-20");
    assert_eq!(body["creationDateTime"], INSTANT);
    assert_eq!(body["history"][0]["modificationDate"], "2020-12-20");
}

#[tokio::test]
async fn serializer_only_post_echoes_wire_and_domain_values() {
    let (status, body) = send(
        serializer_only_app(),
        post_json(
            "/v1/users",
            json!({"id": GOOD_ID, "creationDateTime": INSTANT, "creationDate": "2020-12-20"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], GOOD_ID);
    assert_eq!(body["creationDate"], "2020-12-20");
    assert_eq!(body["creationDateTime"], INSTANT);
}

#[tokio::test]
async fn serializer_only_request_checks_still_apply() {
    let (status, body) = send(
        serializer_only_app(),
        post_json(
            "/v1/users",
            json!({
                "id": "5fdefd13a6640bb5fb5fa",
                "creationDateTime": INSTANT,
                "creationDate": "2020-12-20"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message(&body), r#"request/body/id must match pattern "^[0-9a-fA-F]{24}$""#);

    let (status, body) = send(
        serializer_only_app(),
        post_json(
            "/v1/users",
            json!({"id": GOOD_ID, "creationDateTime": INSTANT, "creationDate": "2020-1f-20"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message(&body), r#"request/body/creationDate must match format "date""#);
}

#[tokio::test]
async fn value_without_matching_serializer_is_a_server_error() {
    let (status, body) = send(
        serializer_only_app(),
        get_request(&format!("/v1/users/{GOOD_ID}?baddateresponse=functionNotExists")),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(message(&body), "/response/creationDate format is invalid");
    assert_eq!(body["code"], 500);
}

#[tokio::test]
async fn serializer_producing_a_bad_string_is_caught_after_serialization() {
    let validator = ContractValidator::builder()
        .config(config("unknownFormats: [mongo-objectid, string-list]"))
        .serdes(mongo_objectid().serializer_only())
        .serdes(FormatEntry::new("date-time").serialize(|_| Ok(json!("oh no a bad iso date"))))
        .build_yaml(USERS)
        .unwrap();
    let app = users_router(
        validator,
        serializer_only_get_user,
        serializer_only_post_user,
    );
    let (status, body) = send(app, get_request(&format!("/v1/users/{GOOD_ID}"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        message(&body),
        r#"/response/creationDateTime must match format "date-time""#
    );
}

// -- Custom string-list format ---------------------------------------------------

fn string_list_app() -> Router {
    let validator = ContractValidator::builder()
        .config(config(
            r#"
validateRequests: {coerceTypes: true}
validateResponses: {coerceTypes: true}
"#,
        ))
        .serdes(mongo_objectid())
        .serdes(string_list())
        .build_yaml(USERS)
        .unwrap();
    users_router(
        validator,
        string_list_get_user,
        string_list_post_user,
    )
}

async fn string_list_get_user(request: ValidatedRequest) -> Result<Response, GateError> {
    let id = request
        .param("id")
        .filter(|id| id.downcast_ref::<ObjectId>().is_some())
        .cloned()
        .ok_or_else(|| handler_error("Should be deserialized to ObjectId object"))?;
    let user: Payload = [
        ("id", id),
        (
            "tags",
            Payload::from(vec![
                Payload::from("aa"),
                Payload::from("bb"),
                Payload::from("cc"),
            ]),
        ),
        ("creationDateTime", Payload::domain(instant())),
        ("creationDate", Payload::domain(instant())),
        ("history", history(1)),
    ]
    .into_iter()
    .collect();
    Ok(request.respond(StatusCode::OK, user).await)
}

async fn string_list_post_user(mut request: ValidatedRequest) -> Result<Response, GateError> {
    let body = request.take_body();
    if body.get("id").and_then(|p| p.downcast_ref::<ObjectId>()).is_none() {
        return Err(handler_error("Should be deserialized to ObjectId object"));
    }
    if body.get("tags").and_then(Payload::as_array).is_none() {
        return Err(handler_error("Should be deserialized to an array"));
    }
    Ok(request.respond(StatusCode::OK, body).await)
}

#[tokio::test]
async fn string_list_response_is_joined() {
    let (status, body) = send(
        string_list_app(),
        get_request(&format!("/v1/users/{GOOD_ID}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], GOOD_ID);
    assert_eq!(body["tags"], "aa,bb,cc");
    assert_eq!(body["creationDate"], "2020-12-20");
    assert_eq!(body["creationDateTime"], INSTANT);
    assert_eq!(body["history"][0]["modificationDate"], "2020-12-20");
}

#[tokio::test]
async fn string_list_post_splits_then_joins() {
    let (status, body) = send(
        string_list_app(),
        post_json(
            "/v1/users",
            json!({
                "id": GOOD_ID,
                "tags": "aa,bb,cc",
                "creationDateTime": INSTANT,
                "creationDate": "2020-12-20",
                "shortOrLong": "abcdef"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tags"], "aa,bb,cc");
    assert_eq!(body["creationDate"], "2020-12-20");
    assert_eq!(body["creationDateTime"], INSTANT);
}

#[tokio::test]
async fn string_list_rejects_an_array_on_the_wire() {
    let (status, body) = send(
        string_list_app(),
        post_json(
            "/v1/users",
            json!({
                "id": GOOD_ID,
                "tags": ["aa", "bb", "cc"],
                "creationDateTime": INSTANT,
                "creationDate": "2020-12-20"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message(&body), "request/body/tags must be string");
}

// -- Nested date-times in arrays -------------------------------------------------

async fn export(request: ValidatedRequest) -> Response {
    let at = |s: &str| Payload::domain(s.parse::<DateTime<Utc>>().unwrap());
    let step = |index: u64, started: &str, finished: &str| -> Payload {
        [
            ("index", Payload::from(json!(index))),
            ("startedAt", at(started)),
            ("finishedAt", at(finished)),
        ]
        .into_iter()
        .collect()
    };
    let job: Payload = [
        ("id", Payload::from(json!(8))),
        ("timeStarted", at("2022-06-16T08:00:01.000Z")),
        ("timeFinished", at("2022-06-16T08:00:27.000Z")),
        (
            "jobSteps",
            Payload::from(vec![
                step(0, "2022-06-16T08:00:00.071Z", "2022-06-16T08:00:00.071Z"),
                step(1, "2022-06-16T08:00:00.071Z", "2022-06-16T08:00:01.148Z"),
            ]),
        ),
    ]
    .into_iter()
    .collect();
    let entry: Payload = [
        ("id", Payload::from(json!(8))),
        ("createdAt", at("2022-06-16T08:00:00.051Z")),
        ("job", job),
    ]
    .into_iter()
    .collect();
    let page: Payload = [
        ("total", Payload::from(json!(8))),
        ("rootTestDate", at("2022-06-16T08:00:00.051Z")),
        ("data", Payload::from(vec![entry])),
    ]
    .into_iter()
    .collect();
    request.respond(StatusCode::OK, page).await
}

#[tokio::test]
async fn nested_date_times_are_serialized() {
    let document: Value = serde_json::from_str(EXPORT).unwrap();
    let validator = ContractValidator::builder().build(document).unwrap();
    let app = Router::new()
        .route("/api/v1/export", get(export))
        .with_state(Arc::new(validator));

    let (status, body) = send(app, get_request("/api/v1/export")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["rootTestDate"], "2022-06-16T08:00:00.051Z");
    let job = &body["data"][0]["job"];
    assert_eq!(body["data"][0]["createdAt"], "2022-06-16T08:00:00.051Z");
    assert_eq!(job["timeStarted"], "2022-06-16T08:00:01.000Z");
    assert_eq!(job["timeFinished"], "2022-06-16T08:00:27.000Z");
    assert_eq!(job["jobSteps"][1]["finishedAt"], "2022-06-16T08:00:01.148Z");
    assert_eq!(job["jobSteps"][0]["index"], 0);
}

#[tokio::test]
async fn disabled_response_validation_still_serializes() {
    let document: Value = serde_json::from_str(EXPORT).unwrap();
    let validator = ContractValidator::builder()
        .config(config("validateResponses: false"))
        .build(document)
        .unwrap();
    let app = Router::new()
        .route("/api/v1/export", get(export))
        .with_state(Arc::new(validator));

    let (status, body) = send(app, get_request("/api/v1/export")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["job"]["timeFinished"], "2022-06-16T08:00:27.000Z");
}
