use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use batproxy_core::{CreateProxyOptions, Error, ListProxiesOptions, Proxy};

use super::error_response;
use crate::state::AppState;

pub async fn create_proxy(
    State(state): State<AppState>,
    opts: Result<Query<CreateProxyOptions>, QueryRejection>,
    payload: Result<Json<Proxy>, JsonRejection>,
) -> Response {
    let Query(opts) = match opts {
        Ok(query) => query,
        Err(rejection) => return error_response(&Error::invalid(rejection.body_text())),
    };
    let Json(proxy) = match payload {
        Ok(json) => json,
        Err(rejection) => return error_response(&Error::invalid(rejection.body_text())),
    };

    match state.proxies.create_proxy(proxy, opts).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn list_proxies(
    State(state): State<AppState>,
    opts: Result<Query<ListProxiesOptions>, QueryRejection>,
) -> Response {
    let Query(opts) = match opts {
        Ok(query) => query,
        Err(rejection) => return error_response(&Error::invalid(rejection.body_text())),
    };

    match state.proxies.list_proxies(opts).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn delete_proxy(State(state): State<AppState>, Path(proxy_id): Path<String>) -> Response {
    match state.proxies.delete_proxy(&proxy_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn update_proxy(Path(_proxy_id): Path<String>) -> Response {
    error_response(&Error::not_implemented("update proxy is not implemented"))
}
