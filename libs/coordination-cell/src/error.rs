use thiserror::Error;

use appointment_status_cell::{AppointmentStatus, StatusError};
use reminder_cell::ReminderError;
use shared_models::AppError;

/// Infrastructure failures surfaced by the coordinator. Rejected transitions are not errors.
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Reminder(#[from] ReminderError),

    #[error("Appointment is {status}; reminders can no longer be planned")]
    AppointmentClosed { status: AppointmentStatus },
}

impl From<CoordinationError> for AppError {
    fn from(error: CoordinationError) -> Self {
        match error {
            CoordinationError::Status(e) if e.is_validation() => AppError::ValidationError(e.to_string()),
            CoordinationError::Status(StatusError::StoreUnavailable(msg)) => AppError::StoreUnavailable(msg),
            CoordinationError::Status(e) => AppError::Internal(e.to_string()),
            CoordinationError::Reminder(ReminderError::StoreUnavailable(msg)) => AppError::StoreUnavailable(msg),
            CoordinationError::Reminder(e) => AppError::Internal(e.to_string()),
            CoordinationError::AppointmentClosed { status } => {
                AppError::ValidationError(format!("Appointment is {}; reminders can no longer be planned", status))
            }
        }
    }
}
