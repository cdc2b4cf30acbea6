pub mod redis_pool;

pub use redis_pool::{connect, create_redis_pool, DatabaseError, RedisPool};
