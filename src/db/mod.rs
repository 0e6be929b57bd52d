//! Connection Pool
//! Mission: Bounded pool of database handles with lease/return, a liveness
//! probe, and idempotent schema bootstrap.
//!
//! The store is "Postgres-shaped" per the design but realized here on top
//! of `rusqlite`, the database the rest of this codebase already depends
//! on; the pool itself is `r2d2` + `r2d2_sqlite`, the same bounded-handle
//! shape used elsewhere for relational pools.

pub mod schema;

use anyhow::Context;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::time::Duration;
use tracing::{info, warn};

pub type Handle = r2d2::PooledConnection<SqliteConnectionManager>;

/// Errors surfaced by the pool to upper layers. Every variant maps onto an
/// entry of the error taxonomy at the HTTP boundary.
#[derive(Debug)]
pub enum PoolError {
    Exhausted,
    Unavailable,
    DbFailure(String),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Exhausted => write!(f, "connection pool exhausted"),
            PoolError::Unavailable => write!(f, "no live database handle could be revived"),
            PoolError::DbFailure(msg) => write!(f, "database failure: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<r2d2::Error> for PoolError {
    fn from(_: r2d2::Error) -> Self {
        PoolError::Exhausted
    }
}

impl From<rusqlite::Error> for PoolError {
    fn from(e: rusqlite::Error) -> Self {
        PoolError::DbFailure(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub path: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            path: "regulens.db".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Bounded pool of SQLite handles. Internally synchronized by `r2d2` — no
/// additional locking is required by callers.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let manager = SqliteConnectionManager::file(&config.path);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(config.acquire_timeout)
            .build(manager)
            .map_err(|_| PoolError::Unavailable)?;

        Ok(Self { pool })
    }

    /// Lease a handle from the pool. Fails `Exhausted` if none becomes
    /// available within the configured acquire timeout, `Unavailable` if
    /// the manager itself cannot open a fresh connection.
    pub fn lease(&self) -> Result<Handle, PoolError> {
        self.pool.get().map_err(|e| {
            warn!(error = %e, "failed to lease database handle");
            PoolError::Exhausted
        })
    }

    /// `r2d2` returns handles to the pool automatically on drop; this is a
    /// named no-op so call sites can express "I am done with this handle"
    /// the way the design's `release(Handle)` operation reads, and so a
    /// future fault-detecting wrapper has one place to hook in.
    pub fn release(&self, _handle: Handle) {}

    /// Probe liveness with a zero-row query.
    pub fn ping(&self) -> Result<(), PoolError> {
        let conn = self.lease()?;
        conn.query_row("SELECT 1 WHERE 0", [], |_| Ok(()))
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(()),
                other => Err(other),
            })
            .map_err(PoolError::from)
    }

    /// Idempotent bootstrap: executes every statement in `ddl_text`,
    /// tolerating statements that are already satisfied (`CREATE TABLE IF
    /// NOT EXISTS`, etc).
    pub fn bootstrap(&self, ddl_text: &str) -> Result<(), PoolError> {
        let conn = self.lease()?;
        for statement in ddl_text.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            conn.execute(statement, params![]).map_err(|e| {
                warn!(error = %e, statement, "bootstrap statement failed");
                PoolError::DbFailure(e.to_string())
            })?;
        }
        info!("database schema bootstrap complete");
        Ok(())
    }
}

pub fn open(config: PoolConfig) -> anyhow::Result<ConnectionPool> {
    let pool = ConnectionPool::new(config).context("failed to build connection pool")?;
    pool.bootstrap(schema::BOOTSTRAP_DDL)
        .context("failed to bootstrap schema")?;
    Ok(pool)
}
