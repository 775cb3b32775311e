pub mod query;
pub mod root;
pub mod ws;

use axum::response::{IntoResponse, Response};

use crate::error::not_found;

pub async fn fallback() -> Response {
    not_found().into_response()
}
