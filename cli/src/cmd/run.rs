use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use batproxy_core::cache::CacheProxyService;
use batproxy_core::logging::LoggingProxyService;
use batproxy_core::ssh::{session_cache, HostKeyPolicy};
use batproxy_core::store::{Db, SqlProxyService};
use batproxy_server::{AppState, ListenAddr, Server};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The reverse proxy http server listen address
    #[arg(
        short = 'r',
        long,
        default_value = "0.0.0.0:8888",
        env = "BATPROXY_REVERSE_LISTEN"
    )]
    pub reverse_listen: String,

    /// The manager listen address, `<scheme>://<addr>` with scheme one of
    /// unix, tcp, udp; a bare value is a unix socket path
    #[arg(
        short = 'l',
        long,
        default_value = "unix://batproxy.sock",
        env = "BATPROXY_LISTEN"
    )]
    pub listen: String,

    /// Default suffix for generated proxy ids
    #[arg(short = 's', long, default_value = "", env = "BATPROXY_SUFFIX")]
    pub suffix: String,

    /// The database dsn (a bare path means sqlite)
    #[arg(short = 'd', long, default_value = "batproxy.db", env = "BATPROXY_DSN")]
    pub dsn: String,

    /// Rule cache entry lifetime
    #[arg(
        short = 'e',
        long,
        default_value = "15s",
        env = "BATPROXY_EXPIRATION",
        value_parser = humantime::parse_duration
    )]
    pub expiration: Duration,

    /// Verify bastion host keys against this known_hosts file instead of
    /// accepting any key
    #[arg(long, env = "BATPROXY_KNOWN_HOSTS")]
    pub known_hosts: Option<std::path::PathBuf>,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,batproxy=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listen = ListenAddr::parse(&args.listen)?;

    let db = Db::open(&args.dsn).await?;
    let store = Arc::new(SqlProxyService::new(db, &args.suffix));
    let logged = Arc::new(LoggingProxyService::new(store));
    let cached = Arc::new(CacheProxyService::new(logged, args.expiration));

    let policy = match args.known_hosts {
        Some(known_hosts) => HostKeyPolicy::Strict { known_hosts },
        None => HostKeyPolicy::AcceptAny,
    };
    let state = AppState::new(cached, Arc::new(session_cache(policy)));

    tracing::info!(
        reverse_listen = %args.reverse_listen,
        listen = %listen,
        dsn = %args.dsn,
        "starting batproxy"
    );

    Server::new(args.reverse_listen, listen, state)
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
