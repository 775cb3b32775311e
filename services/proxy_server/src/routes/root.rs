//! The single `/` endpoint multiplexed by method: `GET` is either the
//! authenticated health check or, when the request carries
//! `Upgrade: websocket`, the start of a query session; `POST` dispatches
//! one query and returns its result; anything else is rejected.

use axum::{
    extract::{
        ws::WebSocketUpgrade,
        FromRequestParts, Query, Request, State,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::{
    auth::AuthParams,
    error::{forbidden, internal_server_error, method_not_allowed, missing_auth, unsupported_media_type},
    health, request_id::RequestId, routes, state::AppState,
};

pub async fn dispatch(
    State(state): State<AppState>,
    Query(auth): Query<AuthParams>,
    request_id: RequestId,
    method: Method,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let response = dispatch_inner(state.clone(), auth, request_id, method.clone(), headers, request).await;
    state
        .telemetry
        .maybe_use_metrics(|m| m.record_request(method.as_str(), response.status().as_u16()));
    response
}

async fn dispatch_inner(
    state: AppState,
    auth: AuthParams,
    request_id: RequestId,
    method: Method,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let identity = match &auth.auth {
        None => return missing_auth().into_response(),
        Some(token) => match state.auth.verify(token) {
            Ok(identity) => identity,
            Err(e) => return forbidden(e.to_string()).into_response(),
        },
    };
    tracing::debug!(%request_id, identity, method = %method, "authenticated request");

    match method {
        Method::GET if is_websocket_upgrade(&headers) => {
            let (mut parts, _body) = request.into_parts();
            match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
                Ok(upgrade) => upgrade.on_upgrade(move |socket| {
                    let span = tracing::info_span!("websocket_session", %request_id);
                    routes::ws::handle_session(socket, state, request_id).instrument(span)
                }),
                Err(rejection) => rejection.into_response(),
            }
        }
        Method::GET => {
            health::handler(&state)
                .instrument(tracing::info_span!("request", %request_id))
                .await
        }
        Method::POST => {
            if !is_json_content_type(&headers) {
                return unsupported_media_type().into_response();
            }
            let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
                Ok(bytes) => bytes,
                Err(_) => return internal_server_error("failed to read request body").into_response(),
            };
            routes::query::handle(&state, body)
                .instrument(tracing::info_span!("request", %request_id))
                .await
        }
        _ => method_not_allowed().into_response(),
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let has_connection_upgrade = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    let has_upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    has_connection_upgrade && has_upgrade_websocket
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .map(|mime| mime.type_() == mime::APPLICATION && mime.subtype() == mime::JSON)
        .unwrap_or(false)
}

pub async fn unauthenticated_health(State(state): State<AppState>) -> Response {
    health::handler(&state).await
}

pub async fn metrics(State(state): State<AppState>, Query(auth): Query<AuthParams>) -> Response {
    let treat_as_public = state.config.health_check_path.as_deref() == Some("metrics");
    if !treat_as_public {
        match &auth.auth {
            None => return missing_auth().into_response(),
            Some(token) => {
                if let Err(e) = state.auth.verify(token) {
                    return forbidden(e.to_string()).into_response();
                }
            }
        }
    }

    let body = state.telemetry.get_metrics().await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
