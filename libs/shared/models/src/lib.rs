pub mod appointment;
pub mod error;
pub mod locks;

pub use appointment::AppointmentId;
pub use error::AppError;
pub use locks::{AppointmentGuard, AppointmentLocks};
