// libs/appointment-status-cell/src/models.rs
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use shared_models::AppointmentId;

// ==============================================================================
// STATUS & ACTOR
// ==============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Pending,
    Scheduled,
    Confirmed,
    Declined,
    RescheduleRequested,
    Rescheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 9] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Declined,
        AppointmentStatus::RescheduleRequested,
        AppointmentStatus::Rescheduled,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// Statuses that wait on a human follow-up.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Declined | AppointmentStatus::RescheduleRequested
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Declined => "declined",
            AppointmentStatus::RescheduleRequested => "reschedule_requested",
            AppointmentStatus::Rescheduled => "rescheduled",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown appointment status '{}'", value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Provider,
    Patient,
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Provider => write!(f, "provider"),
            Actor::Patient => write!(f, "patient"),
            Actor::System => write!(f, "system"),
        }
    }
}

// ==============================================================================
// HISTORY RECORDS
// ==============================================================================

/// New date/time for an appointment, interpreted as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleDetails {
    pub new_date: NaiveDate,
    pub new_time: NaiveTime,
}

impl RescheduleDetails {
    pub fn new(new_date: NaiveDate, new_time: NaiveTime) -> Self {
        Self { new_date, new_time }
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.new_date.and_time(self.new_time))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub appointment_id: AppointmentId,
    pub previous_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
    pub actor: Actor,
    pub reason: Option<String>,
    pub reschedule_details: Option<RescheduleDetails>,
    pub timestamp: DateTime<Utc>,
    /// Store-wide write counter; strictly increasing per appointment as well.
    pub sequence: u64,
}

impl StatusRecord {
    /// Ordering key used for cross-appointment listings.
    pub fn ordering_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}

/// A record that has been validated but not yet written; the store assigns the sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecordDraft {
    pub appointment_id: AppointmentId,
    pub previous_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
    pub actor: Actor,
    pub reason: Option<String>,
    pub reschedule_details: Option<RescheduleDetails>,
    pub timestamp: DateTime<Utc>,
}

impl StatusRecordDraft {
    pub fn into_record(self, sequence: u64) -> StatusRecord {
        StatusRecord {
            appointment_id: self.appointment_id,
            previous_status: self.previous_status,
            new_status: self.new_status,
            actor: self.actor,
            reason: self.reason,
            reschedule_details: self.reschedule_details,
            timestamp: self.timestamp,
            sequence,
        }
    }
}

/// Current projection of one appointment as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentSnapshot {
    pub appointment_id: AppointmentId,
    pub status: AppointmentStatus,
    pub last_record: Option<StatusRecord>,
}

// ==============================================================================
// READ MODELS
// ==============================================================================

pub type StatusSummary = BTreeMap<AppointmentStatus, usize>;

/// Summary with every status present, zero-filled.
pub fn empty_summary() -> StatusSummary {
    AppointmentStatus::ALL.iter().map(|status| (*status, 0)).collect()
}

/// Which rule admitted a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionRule {
    Table,
    SystemCancellation,
}
