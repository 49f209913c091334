//! Route handlers of the stub services

use std::collections::HashMap;
use std::sync::MutexGuard;

use axum::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{lock, RecordedRequest, SharedData, StubData};

/// Page size the real services use when none is requested
const SERVICE_DEFAULT_PAGE_SIZE: usize = 10;

const STUB_USER: &str = "Stub User";

pub(crate) fn router(data: SharedData) -> Router {
    Router::new()
        .route(
            "/v3/contexts/:ctx/tests",
            get(list_tests).post(create_tests).patch(delete_tests),
        )
        .route("/v3/contexts/:ctx/tests/run", post(run_tests))
        .route("/v3/contexts/:ctx/tests/:id", get(get_test).put(update_test))
        .route("/v3/contexts/:ctx/ruletemplates", get(list_templates))
        .route(
            "/v3/contexts/:ctx/suppressionrules",
            get(list_rules).post(create_rule),
        )
        .route(
            "/v3/contexts/:ctx/suppressionrules/:id",
            get(get_rule).patch(update_rule).delete(delete_rule),
        )
        .route("/v2/results", get(list_results))
        .route("/v2/results/canceljobs", post(cancel_jobs))
        .route(
            "/v2/results/2/suppress",
            get(suppression_history)
                .post(apply_suppression)
                .delete(remove_suppression),
        )
        .route("/v2/results/:id", get(get_result))
        .with_state(data)
}

/// Everything about a request the handlers look at
pub(crate) struct Incoming {
    method: String,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Option<Value>,
}

#[async_trait]
impl<S: Send + Sync> FromRequest<S> for Incoming {
    type Rejection = Response;

    async fn from_request(req: Request<Body>, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        let bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;
        let body = if bytes.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?,
            )
        };

        Ok(Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            query,
            headers: parts.headers,
            body,
        })
    }
}

impl Incoming {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Paging parameter from a header, falling back to the query string
    fn paging(&self, name: &str) -> Option<&str> {
        self.header(name)
            .or_else(|| self.query.get(name).map(String::as_str))
    }

    fn body_array(&self) -> Vec<Value> {
        self.body
            .as_ref()
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn body_object(&self) -> Map<String, Value> {
        self.body
            .as_ref()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": {"message": message}}))).into_response()
}

fn ok(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

/// Record the request, then enforce auth and injected failures
fn admit<'a>(
    data: &'a SharedData,
    operation: &str,
    call: &Incoming,
) -> Result<MutexGuard<'a, StubData>, Response> {
    let mut db = lock(data);
    db.requests.push(RecordedRequest {
        operation: operation.to_string(),
        method: call.method.clone(),
        path: call.path.clone(),
        query: call.query.clone(),
        headers: call
            .headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body: call.body.clone(),
    });
    debug!(operation, method = %call.method, path = %call.path, "Stub request");

    let authorized = call
        .header("authorization")
        .is_some_and(|value| value.starts_with("Bearer ") && value.len() > 7);
    if !authorized {
        return Err(error(StatusCode::UNAUTHORIZED, "missing bearer token"));
    }
    if let Some(failure) = db.failures.get_mut(operation) {
        if failure.after > 0 {
            failure.after -= 1;
        } else {
            let status =
                StatusCode::from_u16(failure.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Err(error(status, "injected failure"));
        }
    }
    Ok(db)
}

/// Give `row` an id if it has none and return it
pub(crate) fn ensure_id(row: &mut Value) -> String {
    match row.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = Uuid::new_v4().to_string();
            if let Some(object) = row.as_object_mut() {
                object.insert("id".into(), Value::String(id.clone()));
            }
            id
        }
    }
}

/// One page of `rows`; the continuation token is the next row offset
fn page(rows: Vec<Value>, call: &Incoming, db: &StubData) -> Value {
    let requested = call
        .paging("pagesize")
        .or_else(|| call.paging("pageSize"))
        .and_then(|size| size.parse::<usize>().ok())
        .unwrap_or(SERVICE_DEFAULT_PAGE_SIZE)
        .max(1);
    let size = db.max_page_size.map_or(requested, |max| requested.min(max));
    let offset = call
        .paging("continuationtoken")
        .or_else(|| call.paging("continuationToken"))
        .and_then(|token| token.parse::<usize>().ok())
        .unwrap_or(0);

    let end = (offset + size).min(rows.len());
    let slice = rows.get(offset..end).map(<[Value]>::to_vec).unwrap_or_default();
    if db.stuck_paging {
        return json!({
            "rows": slice,
            "hasMoreData": true,
            "continuationToken": offset.to_string(),
        });
    }
    let has_more = end < rows.len();
    json!({
        "rows": slice,
        "hasMoreData": has_more,
        "continuationToken": if has_more { end.to_string() } else { String::new() },
    })
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn stub_user() -> Value {
    json!({"id": "stub-user", "name": STUB_USER, "email": "stub@example.com"})
}

fn find<'a>(rows: &'a mut [Value], id: &str) -> Option<&'a mut Value> {
    rows.iter_mut()
        .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
}

/// Store a create/update body in the shape the list endpoint returns
fn test_row_from_body(id: &str, body: &Map<String, Value>, existing: Option<&Value>) -> Value {
    let mut row = existing.cloned().unwrap_or_else(|| {
        json!({
            "id": id,
            "userMetadata": {"createdBy": stub_user(), "modifiedBy": stub_user()},
            "creationDate": now(),
        })
    });
    if let Some(object) = row.as_object_mut() {
        for (key, value) in body {
            match key.as_str() {
                "id" | "configType" => {}
                "tag" => {
                    let tag = json!({
                        "id": value.get("repositoryId").cloned().unwrap_or(Value::Null),
                        "type": value.get("repositoryType").cloned().unwrap_or(Value::Null),
                    });
                    object.insert("tag".into(), tag);
                }
                _ => {
                    object.insert(key.clone(), value.clone());
                }
            }
        }
        let rules = object
            .get("suppressionRules")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        object.insert("rulesCount".into(), json!(rules));
        object.insert("modificationDate".into(), json!(now()));
    }
    row
}

async fn list_tests(
    State(data): State<SharedData>,
    Path(_ctx): Path<String>,
    call: Incoming,
) -> Response {
    let db = match admit(&data, "list tests", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let repository = call.query.get("repositoryId");
    let rows: Vec<Value> = db
        .tests
        .iter()
        .filter(|row| {
            repository.map_or(true, |repository| {
                row.pointer("/tag/id").and_then(Value::as_str) == Some(repository.as_str())
            })
        })
        .cloned()
        .collect();
    ok(page(rows, &call, &db))
}

async fn get_test(
    State(data): State<SharedData>,
    Path((_ctx, id)): Path<(String, String)>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "get test", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    match find(&mut db.tests, &id) {
        Some(row) => ok(row.clone()),
        None => error(StatusCode::NOT_FOUND, "test not found"),
    }
}

async fn create_tests(
    State(data): State<SharedData>,
    Path(_ctx): Path<String>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "create tests", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let mut status = Vec::new();
    for body in call.body_array() {
        let Some(body) = body.as_object() else {
            return error(StatusCode::UNPROCESSABLE_ENTITY, "test body must be an object");
        };
        let id = Uuid::new_v4().to_string();
        let row = test_row_from_body(&id, body, None);
        status.push(json!({"id": id, "name": row.get("name").cloned().unwrap_or(Value::Null)}));
        db.tests.push(row);
    }
    (StatusCode::CREATED, Json(json!({ "status": status }))).into_response()
}

async fn update_test(
    State(data): State<SharedData>,
    Path((_ctx, id)): Path<(String, String)>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "update test", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let body = call.body_object();
    match find(&mut db.tests, &id) {
        Some(row) => {
            *row = test_row_from_body(&id, &body, Some(&*row));
            ok(row.clone())
        }
        None => error(StatusCode::NOT_FOUND, "test not found"),
    }
}

async fn delete_tests(
    State(data): State<SharedData>,
    Path(_ctx): Path<String>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "delete tests", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let ids: Vec<String> = call
        .body_array()
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    db.tests.retain(|row| {
        row.get("id")
            .and_then(Value::as_str)
            .map_or(true, |id| !ids.iter().any(|deleted| deleted == id))
    });
    StatusCode::NO_CONTENT.into_response()
}

async fn run_tests(
    State(data): State<SharedData>,
    Path(ctx): Path<String>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "run tests", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let in_place = call
        .header("in-place")
        .is_some_and(|value| value.eq_ignore_ascii_case("force"));

    let mut status = Vec::new();
    for run in call.body_array() {
        let configuration_id = run
            .get("configurationId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let changeset_id = run
            .get("changesetId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(test) = find(&mut db.tests, &configuration_id).map(|test| test.clone()) else {
            return error(StatusCode::NOT_FOUND, "test not found");
        };

        if in_place {
            db.results.retain(|result| {
                result.get("configurationId").and_then(Value::as_str)
                    != Some(configuration_id.as_str())
                    || result.get("changesetId").and_then(Value::as_str)
                        != Some(changeset_id.as_str())
            });
        }

        let result_id = Uuid::new_v4().to_string();
        db.results.push(json!({
            "id": result_id,
            "iTwinId": ctx,
            "repositoryId": run.get("iModelId").cloned().unwrap_or(Value::Null),
            "iModelName": "Stub iModel",
            "changesetName": changeset_id,
            "changesetId": changeset_id,
            "numElements": 0,
            "numIssues": 0,
            "numRules": test.get("rulesCount").cloned().unwrap_or(json!(0)),
            "numValidations": 1,
            "status": 1,
            "configurationType": 2,
            "executed": now(),
            "userName": STUB_USER,
            "configurationId": configuration_id,
            "configurationName": test.get("name").cloned().unwrap_or(Value::Null),
            "duration": 0.5,
        }));
        if let Some(body) = db.run_body.clone() {
            db.result_bodies.insert(result_id.clone(), body);
        }
        status.push(json!({"configurationId": configuration_id, "resultId": result_id}));
    }
    ok(json!({ "status": status }))
}

async fn list_templates(
    State(data): State<SharedData>,
    Path(_ctx): Path<String>,
    call: Incoming,
) -> Response {
    let db = match admit(&data, "list rule templates", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    ok(page(db.templates.clone(), &call, &db))
}

async fn list_rules(
    State(data): State<SharedData>,
    Path(_ctx): Path<String>,
    call: Incoming,
) -> Response {
    let db = match admit(&data, "list suppression rules", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    ok(page(db.rules.clone(), &call, &db))
}

async fn get_rule(
    State(data): State<SharedData>,
    Path((_ctx, id)): Path<(String, String)>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "get suppression rule", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    match find(&mut db.rules, &id) {
        Some(row) => ok(row.clone()),
        None => error(StatusCode::NOT_FOUND, "suppression rule not found"),
    }
}

async fn create_rule(
    State(data): State<SharedData>,
    Path(_ctx): Path<String>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "create suppression rule", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let body = call.body_object();
    let Some(template_id) = body.get("templateId").and_then(Value::as_str) else {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "templateId is required");
    };
    let row = json!({
        "id": Uuid::new_v4().to_string(),
        "templateId": template_id,
        "name": body.get("name").cloned().unwrap_or(Value::Null),
        "reason": body.get("reason").cloned().unwrap_or(Value::Null),
        "parameters": body.get("parameters").cloned().unwrap_or_else(|| json!({})),
        "createdBy": stub_user(),
        "createdDateTime": now(),
        "modifiedDateTime": now(),
    });
    db.rules.push(row.clone());
    (StatusCode::CREATED, Json(row)).into_response()
}

async fn update_rule(
    State(data): State<SharedData>,
    Path((_ctx, id)): Path<(String, String)>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "update suppression rule", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let body = call.body_object();
    let Some(row) = find(&mut db.rules, &id).and_then(Value::as_object_mut) else {
        return error(StatusCode::NOT_FOUND, "suppression rule not found");
    };
    for key in ["name", "reason", "parameters"] {
        if let Some(value) = body.get(key) {
            row.insert(key.to_string(), value.clone());
        }
    }
    row.insert("modifiedDateTime".into(), json!(now()));
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_rule(
    State(data): State<SharedData>,
    Path((_ctx, id)): Path<(String, String)>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "delete suppression rule", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let before = db.rules.len();
    db.rules
        .retain(|row| row.get("id").and_then(Value::as_str) != Some(id.as_str()));
    if db.rules.len() == before {
        return error(StatusCode::NOT_FOUND, "suppression rule not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn list_results(State(data): State<SharedData>, call: Incoming) -> Response {
    let db = match admit(&data, "list results", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let repository = call.header("repository-id");
    let rows: Vec<Value> = db
        .results
        .iter()
        .filter(|row| {
            repository.map_or(true, |repository| {
                row.get("repositoryId").and_then(Value::as_str) == Some(repository)
            })
        })
        .cloned()
        .collect();
    ok(page(rows, &call, &db))
}

async fn get_result(
    State(data): State<SharedData>,
    Path(id): Path<String>,
    call: Incoming,
) -> Response {
    let mut db = match admit(&data, "result by id", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let Some(metadata) = find(&mut db.results, &id).map(|row| row.clone()) else {
        return error(StatusCode::NOT_FOUND, "result not found");
    };
    let mut response = json!({
        "resultMetadata": {
            "id": id,
            "status": metadata.get("status").cloned().unwrap_or(Value::Null),
        }
    });
    if let Some(body) = db.result_bodies.get(&id) {
        response["result"] = body.clone();
    }
    ok(response)
}

async fn cancel_jobs(State(data): State<SharedData>, call: Incoming) -> Response {
    let mut db = match admit(&data, "cancel jobs", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let ids = call.body_array();
    for id in ids.iter().filter_map(Value::as_str) {
        if let Some(row) = find(&mut db.results, id).and_then(Value::as_object_mut) {
            row.insert("status".into(), json!(7));
        }
    }
    ok(json!({"message": "cancel requested"}))
}

/// Flip the manual suppression flag of matching clashes in every result
fn set_manual_suppression(db: &mut StubData, call: &Incoming, suppressed: bool) -> Response {
    let Some(report_id) = call.header("clash-report-id").map(str::to_string) else {
        return error(StatusCode::BAD_REQUEST, "clash-report-id header is required");
    };
    let body = call.body_object();
    let reason = body
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let pairs: Vec<(String, String)> = body
        .get("elementIds")
        .and_then(Value::as_array)
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|pair| {
                    let a = pair.get(0)?.as_str()?;
                    let b = pair.get(1)?.as_str()?;
                    Some((a.to_string(), b.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    for body in db.result_bodies.values_mut() {
        let Some(clashes) = body.get_mut("clashes").and_then(Value::as_array_mut) else {
            continue;
        };
        for clash in clashes {
            let same_report =
                clash.get("clashReportId").and_then(Value::as_str) == Some(report_id.as_str());
            let a = clash.get("elementAId").and_then(Value::as_str).unwrap_or_default();
            let b = clash.get("elementBId").and_then(Value::as_str).unwrap_or_default();
            if same_report && pairs.iter().any(|(pa, pb)| pa == a && pb == b) {
                clash["isMSupp"] = json!(suppressed);
            }
        }
    }

    if suppressed {
        for (a, b) in &pairs {
            db.history.push(json!({
                "id": Uuid::new_v4().to_string(),
                "clashReportId": report_id,
                "elementAId": a,
                "elementBId": b,
                "reason": reason,
                "createdBy": stub_user(),
                "createdDateTime": now(),
            }));
        }
    }
    ok(json!({}))
}

async fn apply_suppression(State(data): State<SharedData>, call: Incoming) -> Response {
    let mut db = match admit(&data, "suppress", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    set_manual_suppression(&mut db, &call, true)
}

async fn remove_suppression(State(data): State<SharedData>, call: Incoming) -> Response {
    let mut db = match admit(&data, "suppress", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    set_manual_suppression(&mut db, &call, false)
}

async fn suppression_history(State(data): State<SharedData>, call: Incoming) -> Response {
    let db = match admit(&data, "suppression history", &call) {
        Ok(db) => db,
        Err(response) => return response,
    };
    let matches = |entry: &&Value, field: &str, param: &str| {
        call.query.get(param).map_or(true, |expected| {
            entry.get(field).and_then(Value::as_str) == Some(expected.as_str())
        })
    };
    let top = call
        .query
        .get("top")
        .and_then(|top| top.parse::<usize>().ok())
        .unwrap_or(usize::MAX);
    let rows: Vec<Value> = db
        .history
        .iter()
        .filter(|entry| {
            matches(entry, "clashReportId", "clashReportId")
                && matches(entry, "elementAId", "elementAId")
                && matches(entry, "elementBId", "elementBId")
        })
        .take(top)
        .cloned()
        .collect();
    ok(json!({ "rows": rows }))
}
