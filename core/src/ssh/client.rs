use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Handler};
use russh::keys::ssh_key::PublicKey;
use russh::keys::{decode_secret_key, load_secret_key, PrivateKeyWithHashAlg};
use russh::Disconnect;
use tokio::time::{sleep, timeout};

use super::{Dialer, IdentityKey, SessionBuilder, SessionFuture, SharedDialer, TunnelStream};
use crate::error::{Error, Result};
use crate::memo::Eviction;

/// Hard ceiling on connect + auth, independent of the request context.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a failed dial stays in the cache before the entry is removed.
/// A burst of requests against a dead bastion shares one failure instead of
/// redialing per request.
pub const EVICT_DELAY: Duration = Duration::from_secs(15);

const DEFAULT_SERVER_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_SERVER_ALIVE_COUNT_MAX: u32 = 3;

/// How the bastion's host key is checked during dial.
#[derive(Debug, Clone, Default)]
pub enum HostKeyPolicy {
    /// Accept any host key. Insecure: a man in the middle between gateway
    /// and bastion goes undetected.
    #[default]
    AcceptAny,
    /// Require the key to appear in the given known-hosts file.
    Strict { known_hosts: PathBuf },
}

/// SSH client settings for one identity.
pub struct SshClient {
    pub user: String,
    pub host: String,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
    /// Interval between liveness probes; zero means "use the default".
    pub server_alive_interval: Duration,
    /// Missed probes tolerated before the session counts as dead.
    pub server_alive_count_max: u32,
    pub host_key_policy: HostKeyPolicy,
}

impl SshClient {
    pub fn from_key(key: &IdentityKey, host_key_policy: HostKeyPolicy) -> Self {
        Self {
            user: key.user.clone(),
            host: key.host.clone(),
            private_key: key.private_key.clone(),
            passphrase: key.passphrase.clone(),
            password: key.password.clone(),
            server_alive_interval: Duration::ZERO,
            server_alive_count_max: 0,
            host_key_policy,
        }
    }

    /// Apply defaults and reject identities with no credential.
    pub fn validate(&mut self) -> Result<()> {
        let no_key = self.private_key.as_deref().unwrap_or("").is_empty();
        let no_password = self.password.as_deref().unwrap_or("").is_empty();
        if no_key && no_password {
            return Err(Error::invalid("one of [password, private_key] required"));
        }

        if self.server_alive_interval == Duration::ZERO {
            self.server_alive_interval = DEFAULT_SERVER_ALIVE_INTERVAL;
        }
        if self.server_alive_count_max <= 1 {
            self.server_alive_count_max = DEFAULT_SERVER_ALIVE_COUNT_MAX;
        }

        Ok(())
    }

    async fn connect(&self) -> Result<Handle<ClientHandler>> {
        let (host, port) = split_host_port(&self.host);
        let config = Arc::new(client::Config {
            keepalive_interval: Some(self.server_alive_interval),
            inactivity_timeout: Some(self.server_alive_interval * self.server_alive_count_max),
            ..Default::default()
        });
        let handler = ClientHandler {
            host: host.clone(),
            policy: self.host_key_policy.clone(),
        };

        let mut session = client::connect(config, (host, port), handler).await?;
        self.authenticate(&mut session).await?;
        Ok(session)
    }

    /// Authenticate preferring the private key; a password, when also
    /// present, is offered after a rejected key.
    async fn authenticate(&self, session: &mut Handle<ClientHandler>) -> Result<()> {
        if let Some(pem) = self.private_key.as_deref().filter(|s| !s.is_empty()) {
            let passphrase = self.passphrase.as_deref().filter(|s| !s.is_empty());
            let key_path = expand_tilde(pem);
            let key_pair = if key_path.exists() {
                load_secret_key(&key_path, passphrase)
            } else {
                decode_secret_key(pem, passphrase)
            }
            .map_err(|e| Error::invalid(format!("parse private key: {e}")))?;

            let auth = session
                .authenticate_publickey(
                    &self.user,
                    PrivateKeyWithHashAlg::new(Arc::new(key_pair), None),
                )
                .await?;
            if auth.success() {
                tracing::debug!(client = %self, "public key authentication");
                return Ok(());
            }
        }

        if let Some(password) = self.password.as_deref().filter(|s| !s.is_empty()) {
            let auth = session.authenticate_password(&self.user, password).await?;
            if auth.success() {
                tracing::debug!(client = %self, "password authentication");
                return Ok(());
            }
        }

        Err(Error::internal(format!("ssh authentication failed for {self}")))
    }
}

impl std::fmt::Display for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

#[derive(Clone)]
struct ClientHandler {
    host: String,
    policy: HostKeyPolicy,
}

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::Strict { known_hosts } => {
                let Ok(openssh) = server_public_key.to_openssh() else {
                    return Ok(false);
                };
                let entries = std::fs::read_to_string(known_hosts)?;
                let found = entries.contains(openssh.as_str());
                if !found {
                    tracing::warn!(host = %self.host, "host key not found in known_hosts");
                }
                Ok(found)
            }
        }
    }
}

/// An established SSH session. Owned by the session cache; the rest of the
/// system only sees its [`Dialer`] face.
pub struct Tunnel {
    handle: Handle<ClientHandler>,
    identity: String,
}

impl Tunnel {
    fn new(handle: Handle<ClientHandler>, identity: String) -> Self {
        Self { handle, identity }
    }

    /// Probe the session by opening and closing a throwaway channel.
    pub async fn is_alive(&self) -> bool {
        match self.handle.channel_open_session().await {
            Ok(channel) => {
                let _ = channel.close().await;
                true
            }
            Err(_) => false,
        }
    }

    async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

#[async_trait]
impl Dialer for Tunnel {
    async fn dial(&self, host: &str, port: u16) -> Result<TunnelStream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                Error::bad_gateway(format!(
                    "open channel to {host}:{port} via {}: {e}",
                    self.identity
                ))
            })?;
        Ok(Box::new(channel.into_stream()))
    }
}

/// Builder for the session cache: validates the identity, dials the
/// bastion under `policy`, and wires liveness monitoring and eviction.
pub fn dial_builder(policy: HostKeyPolicy) -> SessionBuilder {
    Box::new(move |key, eviction| -> SessionFuture {
        Box::pin(dial_session(key, eviction, policy.clone()))
    })
}

async fn dial_session(
    key: IdentityKey,
    eviction: Eviction<IdentityKey, SharedDialer>,
    policy: HostKeyPolicy,
) -> Result<SharedDialer> {
    let mut ssh = SshClient::from_key(&key, policy);
    ssh.validate()
        .map_err(|e| Error::invalid(format!("ssh client config: {}", e.message)))?;

    let handle = match timeout(DIAL_TIMEOUT, ssh.connect()).await {
        Ok(Ok(handle)) => handle,
        Ok(Err(err)) => return Err(dial_failed(&key, eviction, err)),
        Err(_) => return Err(dial_failed(&key, eviction, Error::internal("dial timed out"))),
    };

    tracing::info!(key = %key, "ssh session established");
    let tunnel = Arc::new(Tunnel::new(handle, key.to_string()));
    spawn_liveness(
        Arc::clone(&tunnel),
        ssh.server_alive_interval,
        key.to_string(),
        eviction,
    );
    Ok(tunnel)
}

/// Log the failure and schedule the entry's removal after [`EVICT_DELAY`];
/// until then every request for this key shares the same error.
fn dial_failed(
    key: &IdentityKey,
    eviction: Eviction<IdentityKey, SharedDialer>,
    err: Error,
) -> Error {
    tracing::error!(key = %key, error = %err, "ssh dial failed");
    let key_label = key.to_string();
    tokio::spawn(async move {
        sleep(EVICT_DELAY).await;
        eviction.evict().await;
        tracing::debug!(key = %key_label, "removed failed ssh session entry");
    });
    Error::internal(format!("dial to {key}"))
}

/// Probe the session at `interval`; on the first failed probe, close it and
/// evict the cache entry so the next request redials.
fn spawn_liveness(
    tunnel: Arc<Tunnel>,
    interval: Duration,
    key: String,
    eviction: Eviction<IdentityKey, SharedDialer>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // the first tick completes immediately
        loop {
            ticker.tick().await;
            if tunnel.is_alive().await {
                tracing::trace!(key = %key, "keepalive");
                continue;
            }
            tracing::error!(key = %key, "ssh session lost, evicting");
            tunnel.close().await;
            eviction.evict().await;
            break;
        }
    });
}

fn split_host_port(host: &str) -> (String, u16) {
    match host.split_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(22)),
        None => (host.to_string(), 22),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IdentityKey {
        IdentityKey {
            user: "u".to_string(),
            host: "bastion".to_string(),
            private_key: None,
            passphrase: None,
            password: Some("p".to_string()),
        }
    }

    #[test]
    fn test_validate_applies_defaults() {
        let mut ssh = SshClient::from_key(&key(), HostKeyPolicy::default());
        ssh.validate().unwrap();
        assert_eq!(ssh.server_alive_interval, DEFAULT_SERVER_ALIVE_INTERVAL);
        assert_eq!(ssh.server_alive_count_max, DEFAULT_SERVER_ALIVE_COUNT_MAX);

        let mut ssh = SshClient::from_key(&key(), HostKeyPolicy::default());
        ssh.server_alive_interval = Duration::from_secs(5);
        ssh.server_alive_count_max = 2;
        ssh.validate().unwrap();
        assert_eq!(ssh.server_alive_interval, Duration::from_secs(5));
        assert_eq!(ssh.server_alive_count_max, 2);
    }

    #[test]
    fn test_validate_requires_credential() {
        let mut bare = key();
        bare.password = None;
        let mut ssh = SshClient::from_key(&bare, HostKeyPolicy::default());
        assert!(ssh.validate().is_err());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("bastion:2222"), ("bastion".to_string(), 2222));
        assert_eq!(split_host_port("bastion"), ("bastion".to_string(), 22));
        assert_eq!(split_host_port("bastion:nan"), ("bastion".to_string(), 22));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/.ssh/id_ed25519");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_tilde("/abs/key"), PathBuf::from("/abs/key"));
    }
}
