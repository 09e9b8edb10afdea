//! The reverse-proxy surface: route by Host label, tunnel upstream through
//! the rule's SSH session.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Uri};
use axum::middleware;
use axum::response::Response;
use axum::Router;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};

use batproxy_core::ssh::{IdentityKey, SharedDialer, TunnelStream};
use batproxy_core::{Error, ListProxiesOptions, Result};

use crate::access_log;
use crate::routes::error_response;
use crate::state::AppState;

const POOL_MAX_IDLE: usize = 100;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Headers that belong to one hop and must not be forwarded.
const HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(middleware::from_fn(access_log::log_requests))
        .with_state(state)
}

async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    match proxy_request(&state, req).await {
        Ok(response) => response,
        Err(err) => error_response(&err),
    }
}

/// Serve one exchange: resolve the rule for the Host label, borrow the SSH
/// session, and proxy to `http://{node}:{port}` dialing through it.
///
/// The upstream client is built per request on purpose; rule edits take
/// effect on the next request, while channels and sessions stay pooled in
/// the session cache.
async fn proxy_request(state: &AppState, mut req: Request) -> Result<Response> {
    let host_header = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default();
    let proxy_id = host_header.split(':').next().unwrap_or("").to_string();

    let page = state
        .proxies
        .list_proxies(ListProxiesOptions {
            proxy_id,
            ..Default::default()
        })
        .await?;
    let Some(rule) = page.proxies.into_iter().next() else {
        return Err(Error::not_found("invalid proxy"));
    };

    let session = state.sessions.get(IdentityKey::from_proxy(&rule)).await?;

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target: Uri = format!("http://{}:{}{}", rule.node, rule.port, path_and_query)
        .parse()
        .map_err(|e| Error::internal(format!("upstream url: {e}")))?;
    *req.uri_mut() = target;

    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    strip_hop_headers(req.headers_mut());
    if let Some(ip) = client_ip {
        append_forwarded_for(req.headers_mut(), &ip);
    }

    let client: Client<TunnelConnector, Body> = Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(POOL_MAX_IDLE)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build(TunnelConnector { session });

    match client.request(req).await {
        Ok(mut response) => {
            strip_hop_headers(response.headers_mut());
            Ok(response.map(Body::new))
        }
        Err(err) => {
            tracing::error!(host = %host_header, error = %err, "reverse proxy");
            Err(Error::bad_gateway(err.to_string()))
        }
    }
}

/// Drop hop-by-hop headers, including any named by `Connection`.
fn strip_hop_headers(headers: &mut HeaderMap) {
    let connection_names: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    for name in connection_names {
        headers.remove(name.as_str());
    }
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: &str) {
    let value = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        Some(prev) => format!("{prev}, {ip}"),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

/// Connector whose "TCP" is a channel through the rule's SSH session.
#[derive(Clone)]
struct TunnelConnector {
    session: SharedDialer,
}

impl tower_service::Service<Uri> for TunnelConnector {
    type Response = TunnelIo;
    type Error = std::io::Error;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<TunnelIo, std::io::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let session = self.session.clone();
        Box::pin(async move {
            let host = dst.host().unwrap_or_default().to_string();
            let port = dst.port_u16().unwrap_or(80);
            let stream = session
                .dial(&host, port)
                .await
                .map_err(std::io::Error::other)?;
            Ok(TunnelIo {
                inner: TokioIo::new(stream),
            })
        })
    }
}

/// Adapter giving a [`TunnelStream`] the traits the pooled client needs.
struct TunnelIo {
    inner: TokioIo<TunnelStream>,
}

impl hyper::rt::Read for TunnelIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl hyper::rt::Write for TunnelIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Connection for TunnelIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}
