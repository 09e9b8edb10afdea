//! SSH identities and the session cache the reverse proxy dials through.

mod client;

pub use client::{dial_builder, HostKeyPolicy, SshClient, Tunnel, DIAL_TIMEOUT, EVICT_DELAY};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::memo::{Eviction, Memo};
use crate::proxy::Proxy;

/// The tuple deciding which SSH session may be shared. Two rules with equal
/// keys ride the same session.
///
/// Equality is structural over all five fields. `Display` and `Debug` print
/// `user@host` only; credentials never reach the logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub user: String,
    pub host: String,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
}

impl IdentityKey {
    pub fn from_proxy(proxy: &Proxy) -> Self {
        Self {
            user: proxy.user.clone(),
            host: proxy.host.clone(),
            private_key: proxy.private_key.clone(),
            passphrase: proxy.passphrase.clone(),
            password: proxy.password.clone(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({}@{})", self.user, self.host)
    }
}

/// Anything that can carry bytes both ways.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Bidirectional byte stream to a backend, tunneled through the bastion.
pub type TunnelStream = Box<dyn AsyncStream>;

/// The one capability an established session exposes to the rest of the
/// system: open a TCP channel to a backend.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> Result<TunnelStream>;
}

pub type SharedDialer = Arc<dyn Dialer>;

pub type SessionFuture = Pin<Box<dyn Future<Output = Result<SharedDialer>> + Send>>;

/// Builds a session for an identity key. The [`Eviction`] handle lets the
/// build schedule its own removal (failure backoff, session teardown).
pub type SessionBuilder =
    Box<dyn Fn(IdentityKey, Eviction<IdentityKey, SharedDialer>) -> SessionFuture + Send + Sync>;

/// The SSH session cache: at most one dial in flight per identity key, the
/// established session shared by every later request.
pub type SessionCache = Memo<IdentityKey, SharedDialer, SessionBuilder>;

/// Production session cache, dialing bastions under `policy`.
pub fn session_cache(policy: HostKeyPolicy) -> SessionCache {
    Memo::new(dial_builder(policy))
}

/// Session cache with a caller-supplied builder. Tests inject stub dialers
/// through this seam.
pub fn session_cache_with(builder: SessionBuilder) -> SessionCache {
    Memo::new(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IdentityKey {
        IdentityKey {
            user: "deploy".to_string(),
            host: "bastion:22".to_string(),
            private_key: None,
            passphrase: None,
            password: Some("hunter2".to_string()),
        }
    }

    #[test]
    fn test_display_never_shows_credentials() {
        let k = key();
        assert_eq!(k.to_string(), "deploy@bastion:22");
        assert!(!format!("{k:?}").contains("hunter2"));
    }

    #[test]
    fn test_equality_is_structural() {
        let a = key();
        let mut b = key();
        assert_eq!(a, b);
        b.password = Some("other".to_string());
        assert_ne!(a, b);
    }
}
