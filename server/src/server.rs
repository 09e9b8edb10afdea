//! Process supervisor for the two HTTP listeners.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use batproxy_core::{Error, Result};

use crate::listen::ListenAddr;
use crate::state::AppState;
use crate::{reverse_proxy, routes};

/// Time given to outstanding requests once shutdown begins.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

enum AdminListener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

pub struct Server {
    reverse_listen: String,
    listen: ListenAddr,
    state: AppState,
}

impl Server {
    pub fn new(reverse_listen: impl Into<String>, listen: ListenAddr, state: AppState) -> Self {
        Self {
            reverse_listen: reverse_listen.into(),
            listen,
            state,
        }
    }

    /// Bind both listeners and serve until `shutdown` completes, then drain
    /// connections for at most [`SHUTDOWN_TIMEOUT`].
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let admin_listener = match &self.listen {
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| Error::internal(format!("listen {}: {e}", self.listen)))?;
                AdminListener::Tcp(listener)
            }
            ListenAddr::Unix(path) => {
                // A previous run may have left its socket file behind.
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)
                    .map_err(|e| Error::internal(format!("listen {}: {e}", self.listen)))?;
                AdminListener::Unix(listener)
            }
            ListenAddr::Udp(addr) => {
                return Err(Error::invalid(format!(
                    "listen udp://{addr}: http requires a stream listener"
                )))
            }
        };
        let reverse_listener = TcpListener::bind(&self.reverse_listen)
            .await
            .map_err(|e| Error::internal(format!("listen {}: {e}", self.reverse_listen)))?;

        tracing::info!(addr = %self.reverse_listen, "reverse proxy listening");
        tracing::info!(addr = %self.listen, "manager listening");

        let (stop_tx, stop_rx) = watch::channel(());
        let reverse_task = spawn_tcp(
            reverse_listener,
            reverse_proxy::create_router(self.state.clone()),
            stop_rx.clone(),
        );
        let admin_app = routes::create_routes(self.state.clone());
        let admin_task = match admin_listener {
            AdminListener::Tcp(listener) => spawn_tcp(listener, admin_app, stop_rx.clone()),
            AdminListener::Unix(listener) => spawn_unix(listener, admin_app, stop_rx),
        };

        shutdown.await;
        tracing::info!("shutting down");
        let _ = stop_tx.send(());

        let drain = async {
            let _ = reverse_task.await;
            let _ = admin_task.await;
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            tracing::warn!("shutdown drain timed out, abandoning open connections");
        }
        Ok(())
    }
}

fn spawn_tcp(listener: TcpListener, app: Router, mut stop: watch::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        });
        if let Err(err) = serve.await {
            tracing::error!(error = %err, "http server");
        }
    })
}

fn spawn_unix(listener: UnixListener, app: Router, mut stop: watch::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let serve = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(
            async move {
                let _ = stop.changed().await;
            },
        );
        if let Err(err) = serve.await {
            tracing::error!(error = %err, "http server");
        }
    })
}
