//! WebSocket query sessions: one pooled connection is acquired for the
//! lifetime of the socket, so multiple statements sent over it form one
//! transaction scope (the pool rolls back on release).

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use serde_json::Value;
use wire_protocol::{self as wire};

use crate::{request_id::RequestId, state::AppState};

enum Outcome {
    Response(wire::Response),
    ProtocolViolation(&'static str),
}

pub async fn handle_session(mut socket: WebSocket, state: AppState, request_id: RequestId) {
    tracing::debug!(%request_id, "websocket session starting");
    let conn = match state.pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(%request_id, error = %e, "websocket session failed to acquire a pooled connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: 1011,
                    reason: "no available connection".into(),
                })))
                .await;
            return;
        }
    };

    let mut shutdown = state.shutdown.subscribe();
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = socket.send(Message::Close(Some(CloseFrame {
                        code: 1000,
                        reason: "server shutting down".into(),
                    }))).await;
                    break;
                }
            }
            frame = socket.recv() => {
                let Some(frame) = frame else { break };
                let message = match frame {
                    Ok(m) => m,
                    Err(_) => break,
                };
                match message {
                    Message::Text(text) => match dispatch(&conn, text.as_str()).await {
                        Outcome::Response(response) => {
                            let payload = serde_json::to_string(&response)
                                .expect("Response always serializes to JSON");
                            if socket.send(Message::Text(payload.into())).await.is_err() {
                                break;
                            }
                        }
                        Outcome::ProtocolViolation(reason) => {
                            let _ = socket.send(Message::Close(Some(CloseFrame {
                                code: 1003,
                                reason: reason.into(),
                            }))).await;
                            break;
                        }
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    let _ = state.pool.release(conn).await;
    tracing::debug!(%request_id, "websocket session ended");
}

async fn dispatch(conn: &std::sync::Arc<pg_pool::Connection>, text: &str) -> Outcome {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Outcome::ProtocolViolation("unparseable payload"),
    };

    let Some(id) = value.get("id").and_then(Value::as_str).map(str::to_string) else {
        return Outcome::ProtocolViolation("request missing a correlatable id");
    };

    let query = match value.get("query").and_then(Value::as_str) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => {
            return Outcome::Response(wire::Response::failure(
                id,
                400,
                "`query` must be a non-empty string",
            ));
        }
    };

    let params = match parse_params(value.get("params")) {
        Ok(params) => params,
        Err(message) => return Outcome::Response(wire::Response::failure(id, 400, message)),
    };

    match conn.query(&query, &params).await {
        Ok(outcome) => Outcome::Response(wire::Response::success(
            id,
            outcome.command,
            outcome.row_count,
            outcome.fields,
            outcome.rows,
        )),
        Err(e) => Outcome::Response(wire::Response::failure(id, 400, e.to_string())),
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
