use thiserror::Error;

use crate::models::{Actor, AppointmentStatus};

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Invalid status transition from {from} to {to} by {actor}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
        actor: Actor,
    },

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Status store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt status record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StatusError {
    /// Validation failures leave the current status untouched and are safe to show to users.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StatusError::InvalidTransition { .. } | StatusError::MissingData(_)
        )
    }
}

impl From<redis::RedisError> for StatusError {
    fn from(error: redis::RedisError) -> Self {
        StatusError::StoreUnavailable(error.to_string())
    }
}

impl From<shared_database::DatabaseError> for StatusError {
    fn from(error: shared_database::DatabaseError) -> Self {
        StatusError::StoreUnavailable(error.to_string())
    }
}
