// libs/shared/database/src/redis_pool.rs
use deadpool_redis::{Config, Connection, Pool, Runtime};
use thiserror::Error;
use tracing::{debug, info};

use shared_config::AppConfig;

pub type RedisPool = Pool;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Redis URL is not configured")]
    MissingUrl,

    #[error("Failed to create Redis pool: {0}")]
    PoolCreation(String),

    #[error("Failed to get Redis connection: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Build a pool from config and verify it with a PING before handing it out.
pub async fn create_redis_pool(config: &AppConfig) -> Result<RedisPool, DatabaseError> {
    let redis_url = config.redis_url.clone().ok_or(DatabaseError::MissingUrl)?;

    let cfg = Config::from_url(redis_url);
    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| DatabaseError::PoolCreation(e.to_string()))?;

    let mut conn = connect(&pool).await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    info!("Redis pool initialized successfully");

    Ok(pool)
}

pub async fn connect(pool: &RedisPool) -> Result<Connection, DatabaseError> {
    debug!("Acquiring Redis connection");
    pool.get()
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))
}
