// libs/coordination-cell/src/models.rs
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use appointment_status_cell::{Actor, AppointmentStatus, RescheduleDetails, StatusRecord, StatusSummary};
use reminder_cell::{ReminderChannel, ReminderEvent, ReminderPlan, ReminderStatistics};
use shared_config::AppConfig;
use shared_models::AppointmentId;

// ==============================================================================
// RESULTS
// ==============================================================================

/// Result of a status update. Validation failures are values so callers can show them inline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied {
        record: StatusRecord,
        reminder_plan: Option<ReminderPlan>,
        reminders_cancelled: usize,
    },
    Rejected {
        current_status: AppointmentStatus,
        reason: String,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    pub fn record(&self) -> Option<&StatusRecord> {
        match self {
            TransitionOutcome::Applied { record, .. } => Some(record),
            TransitionOutcome::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializeOutcome {
    pub status: AppointmentStatus,
    pub reminder_plan: Option<ReminderPlan>,
}

/// Everything the dashboard renders in one read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub summary: StatusSummary,
    pub needing_attention: Vec<StatusRecord>,
    pub reminder_statistics: ReminderStatistics,
}

// ==============================================================================
// EVENTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    StatusChanged {
        record: StatusRecord,
    },
    RemindersReplanned {
        appointment_id: AppointmentId,
        generation: u64,
        pending: usize,
    },
    RemindersCancelled {
        appointment_id: AppointmentId,
        count: usize,
    },
    Reminder {
        event: ReminderEvent,
    },
}

impl CoordinationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationEvent::StatusChanged { .. } => "status_changed",
            CoordinationEvent::RemindersReplanned { .. } => "reminders_replanned",
            CoordinationEvent::RemindersCancelled { .. } => "reminders_cancelled",
            CoordinationEvent::Reminder { .. } => "reminder",
        }
    }

    pub fn appointment_id(&self) -> &AppointmentId {
        match self {
            CoordinationEvent::StatusChanged { record } => &record.appointment_id,
            CoordinationEvent::RemindersReplanned { appointment_id, .. }
            | CoordinationEvent::RemindersCancelled { appointment_id, .. } => appointment_id,
            CoordinationEvent::Reminder { event } => match event {
                ReminderEvent::Delivered { appointment_id, .. } | ReminderEvent::Failed { appointment_id, .. } => {
                    appointment_id
                }
            },
        }
    }
}

// ==============================================================================
// OPTIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub recent_updates_limit: usize,
    pub event_channel_capacity: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            recent_updates_limit: 20,
            event_channel_capacity: 256,
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            recent_updates_limit: config.recent_updates_limit,
            event_channel_capacity: config.event_channel_capacity,
        }
    }
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeAppointmentRequest {
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<NaiveTime>,
    #[serde(default)]
    pub channels: Vec<ReminderChannel>,
}

impl InitializeAppointmentRequest {
    pub fn slot(&self) -> Option<RescheduleDetails> {
        match (self.appointment_date, self.appointment_time) {
            (Some(date), Some(time)) => Some(RescheduleDetails::new(date, time)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
    pub actor: Actor,
    pub reason: Option<String>,
    pub reschedule_details: Option<RescheduleDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRemindersRequest {
    pub new_date: NaiveDate,
    pub new_time: NaiveTime,
    #[serde(default)]
    pub channels: Vec<ReminderChannel>,
}

#[derive(Debug, Deserialize)]
pub struct RecentUpdatesQuery {
    pub limit: Option<usize>,
}
