//! Database access: the connection-source seam and its Postgres-backed
//! implementation.
//!
//! A checked-out connection is owned by exactly one in-flight request and is
//! returned to the pool when dropped; the request-context core decides when
//! that drop happens.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::AppConfig;
use crate::error::AppResult;

/// Connection owned by one request until released.
pub type DbConn = sqlx::pool::PoolConnection<sqlx::Postgres>;

/// Hands out exclusive connections. The pool is the only shared mutable
/// resource in the system; this trait is the seam that lets the core be
/// exercised without a live database.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    type Conn: Send + 'static;
    async fn acquire(&self) -> AppResult<Self::Conn>;
}

pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &AppConfig) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.database_url)
            .await?;
        info!("connected to database, pool_size={}", config.pool_size);
        Ok(Self { pool })
    }
}

#[async_trait]
impl ConnectionSource for Db {
    type Conn = DbConn;

    async fn acquire(&self) -> AppResult<DbConn> {
        Ok(self.pool.acquire().await?)
    }
}
