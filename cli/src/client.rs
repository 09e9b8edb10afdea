//! HTTP client for the manager surface, speaking over TCP or a unix
//! socket.

use std::path::PathBuf;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

use batproxy_core::{
    CreateProxyOptions, Error, ErrorKind, ListProxiesOptions, ListProxiesPage, Proxy, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum BaseUrl {
    Unix(PathBuf),
    Http(String),
}

#[derive(Debug)]
pub struct Client {
    base: BaseUrl,
}

impl Client {
    /// Parse a manager base url. Schemes: `unix` and `http`; `tcp` and
    /// `udp` normalize to `http`; a bare value is a unix socket path.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = match base_url.split_once("://") {
            None => BaseUrl::Unix(PathBuf::from(base_url)),
            Some(("unix", rest)) => BaseUrl::Unix(PathBuf::from(rest)),
            Some(("http", rest)) => BaseUrl::Http(rest.to_string()),
            Some(("tcp", rest)) | Some(("udp", rest)) => BaseUrl::Http(rest.to_string()),
            Some(("https", _)) => {
                return Err(Error::invalid(
                    "https base-url: batproxy does not terminate tls, use http or unix",
                ))
            }
            Some((scheme, _)) => {
                return Err(Error::invalid(format!(
                    "expect scheme ['unix', 'http'], got {scheme}"
                )))
            }
        };
        Ok(Self { base })
    }

    pub async fn create_proxy(&self, proxy: &Proxy, opts: &CreateProxyOptions) -> Result<Proxy> {
        let mut path = String::from("/api/v1beta1/proxies");
        if !opts.suffix.is_empty() {
            path.push_str("?suffix=");
            path.push_str(&opts.suffix);
        }
        let body = serde_json::to_vec(proxy)
            .map_err(|e| Error::internal(format!("encode proxy: {e}")))?;

        let (status, bytes) = self.request(Method::POST, &path, Some(body)).await?;
        expect_status(status, StatusCode::CREATED, &bytes)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::internal(format!("decode proxy: {e}")))
    }

    pub async fn list_proxies(&self, opts: &ListProxiesOptions) -> Result<ListProxiesPage> {
        let mut query = Vec::new();
        if !opts.proxy_id.is_empty() {
            query.push(format!("proxy_id={}", opts.proxy_id));
        }
        if opts.page_size > 0 {
            query.push(format!("page_size={}", opts.page_size));
        }
        if !opts.page_token.is_empty() {
            query.push(format!("page_token={}", opts.page_token));
        }
        let mut path = String::from("/api/v1beta1/proxies");
        if !query.is_empty() {
            path.push('?');
            path.push_str(&query.join("&"));
        }

        let (status, bytes) = self.request(Method::GET, &path, None).await?;
        expect_status(status, StatusCode::OK, &bytes)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::internal(format!("decode page: {e}")))
    }

    pub async fn delete_proxy(&self, proxy_id: &str) -> Result<()> {
        let path = format!("/api/v1beta1/proxies/{proxy_id}");
        let (status, bytes) = self.request(Method::DELETE, &path, None).await?;
        expect_status(status, StatusCode::NO_CONTENT, &bytes)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes)> {
        match &self.base {
            BaseUrl::Unix(socket) => {
                let stream = UnixStream::connect(socket)
                    .await
                    .map_err(|e| Error::internal(format!("connect {}: {e}", socket.display())))?;
                exchange(stream, "localhost", method, path, body).await
            }
            BaseUrl::Http(authority) => {
                let stream = TcpStream::connect(authority)
                    .await
                    .map_err(|e| Error::internal(format!("connect {authority}: {e}")))?;
                exchange(stream, authority, method, path, body).await
            }
        }
    }
}

async fn exchange<S>(
    stream: S,
    host: &str,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
) -> Result<(StatusCode, Bytes)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::internal(format!("handshake: {e}")))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::debug!(error = %err, "manager connection closed");
        }
    });

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(hyper::header::HOST, host);
    if body.is_some() {
        builder = builder.header(hyper::header::CONTENT_TYPE, "application/json");
    }
    let request = builder
        .body(Full::new(Bytes::from(body.unwrap_or_default())))
        .map_err(|e| Error::internal(format!("build request: {e}")))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| Error::internal(format!("send request: {e}")))?;
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::internal(format!("read response: {e}")))?
        .to_bytes();
    Ok((status, bytes))
}

/// Turn a non-matching status back into the domain error it was mapped
/// from; the body's `error` field, when present, carries the message.
fn expect_status(status: StatusCode, want: StatusCode, body: &[u8]) -> Result<()> {
    if status == want {
        return Ok(());
    }
    let kind = ErrorKind::from_http_status(status.as_u16());
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    Err(Error::new(kind, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_known_schemes() {
        assert!(Client::new("batproxy.sock").is_ok());
        assert!(Client::new("unix:///run/batproxy.sock").is_ok());
        assert!(Client::new("http://127.0.0.1:8080").is_ok());
        assert!(Client::new("tcp://127.0.0.1:8080").is_ok());
    }

    #[test]
    fn test_new_rejects_unknown_schemes() {
        let err = Client::new("ftp://x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(Client::new("https://x").is_err());
    }

    #[test]
    fn test_tcp_normalizes_to_http() {
        let tcp = Client::new("tcp://h:1").unwrap();
        let http = Client::new("http://h:1").unwrap();
        assert_eq!(tcp.base, http.base);
    }

    #[test]
    fn test_expect_status_reconstructs_kind() {
        let body = br#"{"error": "proxy x already exists"}"#;
        let err = expect_status(StatusCode::CONFLICT, StatusCode::CREATED, body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.message, "proxy x already exists");

        let err = expect_status(StatusCode::NOT_FOUND, StatusCode::OK, b"plain text").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "plain text");
    }
}
