pub mod models;
pub mod services;
pub mod handlers;
pub mod router;
pub mod error;

pub use models::*;
pub use error::*;
pub use services::*;
pub use router::coordination_routes;
