//! Manager surface: rule CRUD under `/api/v1beta1`.

pub mod proxies;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::json;

use batproxy_core::Error;

use crate::access_log;
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1beta1",
            Router::new()
                .route(
                    "/proxies",
                    get(proxies::list_proxies).post(proxies::create_proxy),
                )
                .route(
                    "/proxies/{proxy_id}",
                    delete(proxies::delete_proxy)
                        .put(proxies::update_proxy)
                        .patch(proxies::update_proxy),
                ),
        )
        .layer(middleware::from_fn(access_log::log_requests))
        .with_state(state)
}

/// Render a domain error as its mapped status plus a JSON body.
pub(crate) fn error_response(err: &Error) -> Response {
    let status = StatusCode::from_u16(err.kind.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.message }))).into_response()
}
