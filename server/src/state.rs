use std::sync::Arc;

use batproxy_core::ssh::SessionCache;
use batproxy_core::ProxyService;

/// Shared state for both HTTP surfaces: the (decorated) rule service and
/// the SSH session cache.
#[derive(Clone)]
pub struct AppState {
    pub proxies: Arc<dyn ProxyService>,
    pub sessions: Arc<SessionCache>,
}

impl AppState {
    pub fn new(proxies: Arc<dyn ProxyService>, sessions: Arc<SessionCache>) -> Self {
        Self { proxies, sessions }
    }
}
