use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Reminder store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid reminder configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<redis::RedisError> for ReminderError {
    fn from(error: redis::RedisError) -> Self {
        ReminderError::StoreUnavailable(error.to_string())
    }
}

impl From<shared_database::DatabaseError> for ReminderError {
    fn from(error: shared_database::DatabaseError) -> Self {
        ReminderError::StoreUnavailable(error.to_string())
    }
}

/// A channel failed to deliver. Recorded on the entry; this engine never retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationDeliveryError {
    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Notification transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for NotificationDeliveryError {
    fn from(error: reqwest::Error) -> Self {
        NotificationDeliveryError::Transport(error.to_string())
    }
}
