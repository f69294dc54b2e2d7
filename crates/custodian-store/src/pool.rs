use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, Sqlite};
use sqlx::{Pool, Transaction};

use custodian_core::LedgerError;

/// The backing relational store. Postgres is the primary target (supports
/// server-side cursors, §4.2/§4.8); SQLite is the zero-infrastructure target
/// used by tests and standalone deployments, which falls back to keyset
/// pagination since it has no server-side cursor concept.
pub enum StorePool {
    Postgres(Pool<Postgres>),
    Sqlite(Pool<Sqlite>),
}

/// A transaction borrowed from either backend, used by callers that need
/// begin/commit/rollback (§6 persistence contract).
pub enum StoreTx<'a> {
    Postgres(Transaction<'a, Postgres>),
    Sqlite(Transaction<'a, Sqlite>),
}

impl StorePool {
    pub async fn connect_postgres(url: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await
            .map_err(LedgerError::from)?;
        Ok(StorePool::Postgres(pool))
    }

    /// Connect to a SQLite database at `path`, creating it if absent.
    pub async fn connect_sqlite(path: &str) -> Result<Self, LedgerError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(LedgerError::from)?;
        Ok(StorePool::Sqlite(pool))
    }

    /// True when the backend supports server-side cursors (§4.2/§4.8's
    /// "database strategy selection"): Postgres does, SQLite does not and
    /// must fall back to keyset pagination.
    pub fn supports_server_side_cursor(&self) -> bool {
        matches!(self, StorePool::Postgres(_))
    }

    pub fn identifier(&self) -> &'static str {
        match self {
            StorePool::Postgres(_) => "postgres",
            StorePool::Sqlite(_) => "sqlite",
        }
    }

    pub async fn begin(&self) -> Result<StoreTx<'_>, LedgerError> {
        match self {
            StorePool::Postgres(p) => Ok(StoreTx::Postgres(p.begin().await?)),
            StorePool::Sqlite(p) => Ok(StoreTx::Sqlite(p.begin().await?)),
        }
    }
}

impl<'a> StoreTx<'a> {
    pub async fn commit(self) -> Result<(), LedgerError> {
        match self {
            StoreTx::Postgres(t) => t.commit().await.map_err(LedgerError::from),
            StoreTx::Sqlite(t) => t.commit().await.map_err(LedgerError::from),
        }
    }

    pub async fn rollback(self) -> Result<(), LedgerError> {
        match self {
            StoreTx::Postgres(t) => t.rollback().await.map_err(LedgerError::from),
            StoreTx::Sqlite(t) => t.rollback().await.map_err(LedgerError::from),
        }
    }
}
