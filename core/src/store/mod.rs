//! Durable rule storage.

mod proxy;

pub use proxy::SqlProxyService;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{Error, Result};

/// An open database handle. The DSN takes the form `<driver>://<rest>`; a
/// bare value is treated as a sqlite file path. Only the sqlite driver is
/// compiled in.
#[derive(Clone, Debug)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn open(dsn: &str) -> Result<Self> {
        if dsn.is_empty() {
            return Err(Error::invalid("dsn required"));
        }

        let (driver, path) = match dsn.split_once("://") {
            None => ("sqlite", dsn),
            Some((driver, rest)) => (driver, rest),
        };
        if driver != "sqlite" {
            return Err(Error::invalid(format!(
                "dsn driver {driver} is not compiled in, expected sqlite"
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if path == ":memory:" {
            // Every sqlite connection gets its own in-memory database;
            // pin the pool to a single long-lived connection.
            pool_options = pool_options.max_connections(1).min_connections(1);
        }
        let pool = pool_options.connect_with(options).await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS t_bat_proxy (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                proxy_id    TEXT NOT NULL UNIQUE,
                user        TEXT NOT NULL,
                host        TEXT NOT NULL,
                private_key TEXT,
                passphrase  TEXT,
                password    TEXT,
                node        TEXT NOT NULL,
                port        INTEGER NOT NULL,
                create_time TEXT NOT NULL,
                update_time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// The current time at the precision the store persists: UTC, whole
/// seconds.
pub(crate) fn now_second_truncated() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[tokio::test]
    async fn test_open_bare_path_is_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batproxy.db");
        let db = Db::open(path.to_str().unwrap()).await.unwrap();
        db.close().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_driver() {
        let err = Db::open("mysql://root@localhost/batproxy").await.unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Invalid);
        assert!(err.message.contains("mysql"));
    }

    #[tokio::test]
    async fn test_open_rejects_empty_dsn() {
        assert!(Db::open("").await.is_err());
    }

    #[test]
    fn test_now_is_second_truncated() {
        assert_eq!(now_second_truncated().nanosecond(), 0);
    }
}
