pub mod lifecycle;
pub mod store;
pub mod redis_store;
pub mod engine;

pub use lifecycle::*;
pub use store::*;
pub use redis_store::*;
pub use engine::*;
