pub mod clock;
pub mod channel;
pub mod store;
pub mod redis_store;
pub mod planner;
pub mod orchestrator;

pub use clock::*;
pub use channel::*;
pub use store::*;
pub use redis_store::*;
pub use planner::*;
pub use orchestrator::*;
