//! Per-operation logging decorator for the rule store.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::Result;
use crate::proxy::{
    CreateProxyOptions, ListProxiesOptions, ListProxiesPage, Proxy, ProxyService,
};

/// Wraps a [`ProxyService`] and logs every operation with its duration and
/// outcome. Credentials never appear in the fields.
pub struct LoggingProxyService {
    next: Arc<dyn ProxyService>,
}

impl LoggingProxyService {
    pub fn new(next: Arc<dyn ProxyService>) -> Self {
        Self { next }
    }
}

#[async_trait]
impl ProxyService for LoggingProxyService {
    async fn create_proxy(&self, proxy: Proxy, opts: CreateProxyOptions) -> Result<Proxy> {
        let started = Instant::now();
        let result = self.next.create_proxy(proxy, opts).await;
        let took_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(created) => tracing::info!(
                proxy_id = %created.id,
                user = %created.user,
                host = %created.host,
                node = %created.node,
                port = created.port,
                took_ms,
                "create proxy"
            ),
            Err(err) => tracing::error!(
                kind = %err.kind,
                error = %err,
                took_ms,
                "create proxy"
            ),
        }
        result
    }

    async fn list_proxies(&self, opts: ListProxiesOptions) -> Result<ListProxiesPage> {
        let started = Instant::now();
        let proxy_id = opts.proxy_id.clone();
        let page_size = opts.page_size;
        let page_token = opts.page_token.clone();
        let result = self.next.list_proxies(opts).await;
        let took_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(page) => tracing::debug!(
                proxy_id = %proxy_id,
                page_size,
                page_token = %page_token,
                num = page.proxies.len(),
                took_ms,
                "list proxies"
            ),
            Err(err) => tracing::error!(
                proxy_id = %proxy_id,
                kind = %err.kind,
                error = %err,
                took_ms,
                "list proxies"
            ),
        }
        result
    }

    async fn delete_proxy(&self, proxy_id: &str) -> Result<()> {
        let started = Instant::now();
        let result = self.next.delete_proxy(proxy_id).await;
        let took_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => tracing::info!(proxy_id = %proxy_id, took_ms, "delete proxy"),
            Err(err) => tracing::error!(
                proxy_id = %proxy_id,
                kind = %err.kind,
                error = %err,
                took_ms,
                "delete proxy"
            ),
        }
        result
    }
}
