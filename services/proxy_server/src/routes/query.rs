//! `POST /` query handling: parse the JSON body, acquire a pooled
//! connection, run the query, release, and return the result as JSON.

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use uuid::Uuid;
use wire_protocol::{self as wire};

use crate::state::AppState;

pub async fn handle(state: &AppState, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return respond(wire::Response::failure(Uuid::new_v4().to_string(), 400, "Error parsing JSON")),
    };

    let id = value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let query = match value.get("query").and_then(Value::as_str) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => {
            return respond(wire::Response::failure(
                id,
                400,
                "`query` must be a non-empty string",
            ));
        }
    };

    let params = match parse_params(value.get("params")) {
        Ok(params) => params,
        Err(message) => return respond(wire::Response::failure(id, 400, message)),
    };

    let conn = match state.pool.acquire().await {
        Ok(conn) => conn,
        Err(_) => {
            return respond(wire::Response::failure(id, 500, "Error acquiring connection"));
        }
    };

    let outcome = conn.query(&query, &params).await;
    let _ = state.pool.release(conn).await;

    match outcome {
        Ok(outcome) => respond(wire::Response::success(
            id,
            outcome.command,
            outcome.row_count,
            outcome.fields,
            outcome.rows,
        )),
        Err(e) => respond(wire::Response::failure(id, 400, e.to_string())),
    }
}

fn parse_params(value: Option<&Value>) -> Result<Vec<Option<String>>, &'static str> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => Ok(None),
                Value::String(s) => Ok(Some(s.clone())),
                _ => Err("`params` must be an array of string|null"),
            })
            .collect(),
        Some(_) => Err("`params` must be an array of string|null"),
    }
}

fn respond(response: wire::Response) -> Response {
    let status = StatusCode::from_u16(response.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}
