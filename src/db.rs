//! Data store gateway: owns the connection pool and the trivial health
//! check used by the `/health` endpoints. Scoped transactions are opened
//! directly by the match engine (see `engine`) with `pool.begin()` /
//! `tx.commit()` / `tx.rollback()` — a generic `with_transaction` combinator
//! would need to hand a live `&mut Transaction` across an `.await` boundary
//! through a closure, which isn't expressible without unstable async
//! closures, so each call site manages its own transaction explicitly.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use crate::error::{classify_sqlx_error, AppError};

pub type DbPool = sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl From<&crate::config::DatabaseConfig> for DbConfig {
    fn from(cfg: &crate::config::DatabaseConfig) -> Self {
        Self {
            database_url: cfg.url.clone(),
            max_connections: cfg.max_pool,
            min_connections: cfg.min_pool,
            acquire_timeout: cfg.query_timeout,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Initialize the connection pool and run migrations.
pub async fn init_db(config: DbConfig) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Trivial `SELECT 1` used by the liveness/readiness endpoints.
pub async fn health_check(pool: &DbPool) -> Result<(), AppError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(classify_sqlx_error)
}

/// Opens a transaction and pins its isolation level explicitly, even though
/// `READ COMMITTED` is Postgres's default — explicit beats implicit for a
/// property every optimistic-lock retry in `engine` depends on.
pub async fn begin_read_committed(
    pool: &DbPool,
) -> Result<sqlx::Transaction<'_, sqlx::Postgres>, AppError> {
    let mut tx = pool.begin().await.map_err(classify_sqlx_error)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(tx)
}
