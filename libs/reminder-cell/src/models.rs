// libs/reminder-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use shared_config::{AppConfig, MAX_REMINDER_OFFSET_MINUTES};
use shared_models::AppointmentId;

use crate::error::ReminderError;

// ==============================================================================
// CHANNELS & STATES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChannel {
    Push,
    Sms,
    Email,
}

impl fmt::Display for ReminderChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderChannel::Push => write!(f, "push"),
            ReminderChannel::Sms => write!(f, "sms"),
            ReminderChannel::Email => write!(f, "email"),
        }
    }
}

impl FromStr for ReminderChannel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(ReminderChannel::Push),
            "sms" => Ok(ReminderChannel::Sms),
            "email" => Ok(ReminderChannel::Email),
            other => Err(format!("unknown reminder channel '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderState {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl ReminderState {
    pub fn is_final(&self) -> bool {
        !matches!(self, ReminderState::Pending)
    }
}

// ==============================================================================
// PLANS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderEntry {
    pub id: Uuid,
    pub offset_minutes: i64,
    pub fire_at: DateTime<Utc>,
    pub channel: ReminderChannel,
    pub state: ReminderState,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ReminderEntry {
    pub fn pending(offset: Duration, fire_at: DateTime<Utc>, channel: ReminderChannel, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            offset_minutes: offset.num_minutes(),
            fire_at,
            channel,
            state: ReminderState::Pending,
            failure_reason: None,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == ReminderState::Pending
    }
}

/// The reminder firings tied to one appointment date/time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderPlan {
    pub appointment_id: AppointmentId,
    pub appointment_at: DateTime<Utc>,
    /// Increments every time the plan is replaced.
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ReminderEntry>,
}

impl ReminderPlan {
    pub fn pending_entries(&self) -> impl Iterator<Item = &ReminderEntry> {
        self.entries.iter().filter(|entry| entry.is_pending())
    }

    pub fn entry(&self, entry_id: Uuid) -> Option<&ReminderEntry> {
        self.entries.iter().find(|entry| entry.id == entry_id)
    }
}

/// Stored unit per appointment: the live plan plus entries of superseded plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderSchedule {
    pub active: ReminderPlan,
    pub retired: Vec<ReminderEntry>,
}

impl ReminderSchedule {
    pub fn appointment_id(&self) -> &AppointmentId {
        &self.active.appointment_id
    }

    pub fn all_entries(&self) -> impl Iterator<Item = &ReminderEntry> {
        self.active.entries.iter().chain(self.retired.iter())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderStatistics {
    pub sent: usize,
    pub pending: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl ReminderStatistics {
    pub fn record(&mut self, state: ReminderState) {
        match state {
            ReminderState::Pending => self.pending += 1,
            ReminderState::Sent => self.sent += 1,
            ReminderState::Failed => self.failed += 1,
            ReminderState::Cancelled => self.cancelled += 1,
        }
        self.total += 1;
    }
}

// ==============================================================================
// POLICY
// ==============================================================================

/// Offsets before the appointment and the channels used when a caller names none.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderPolicy {
    pub offsets: Vec<Duration>,
    pub default_channels: Vec<ReminderChannel>,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            offsets: vec![Duration::hours(24), Duration::hours(1)],
            default_channels: vec![ReminderChannel::Push],
        }
    }
}

impl ReminderPolicy {
    pub fn new(offsets: Vec<Duration>, default_channels: Vec<ReminderChannel>) -> Self {
        Self {
            offsets,
            default_channels,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let offsets = config
            .reminder_offsets_minutes
            .iter()
            .filter(|minutes| (1..=MAX_REMINDER_OFFSET_MINUTES).contains(*minutes))
            .filter_map(|minutes| Duration::try_minutes(*minutes))
            .collect::<Vec<_>>();

        let mut default_channels = Vec::new();
        for raw in &config.reminder_channels {
            match raw.parse::<ReminderChannel>() {
                Ok(channel) if !default_channels.contains(&channel) => default_channels.push(channel),
                Ok(_) => {}
                Err(e) => warn!("Ignoring configured reminder channel: {}", e),
            }
        }

        let defaults = Self::default();
        Self {
            offsets: if offsets.is_empty() { defaults.offsets } else { offsets },
            default_channels: if default_channels.is_empty() {
                defaults.default_channels
            } else {
                default_channels
            },
        }
    }

    pub fn validate(&self) -> Result<(), ReminderError> {
        if self.offsets.is_empty() {
            return Err(ReminderError::InvalidConfiguration("no reminder offsets".into()));
        }
        if let Some(offset) = self.offsets.iter().find(|offset| **offset <= Duration::zero()) {
            return Err(ReminderError::InvalidConfiguration(format!(
                "reminder offset must be positive, got {}m",
                offset.num_minutes()
            )));
        }
        if let Some(offset) = self
            .offsets
            .iter()
            .find(|offset| offset.num_minutes() > MAX_REMINDER_OFFSET_MINUTES)
        {
            return Err(ReminderError::InvalidConfiguration(format!(
                "reminder offset {}m exceeds {}m",
                offset.num_minutes(),
                MAX_REMINDER_OFFSET_MINUTES
            )));
        }
        if self.default_channels.is_empty() {
            return Err(ReminderError::InvalidConfiguration("no default reminder channel".into()));
        }
        Ok(())
    }

    /// The caller's channels, or the configured defaults when none are given.
    pub fn channels_or_default(&self, channels: &[ReminderChannel]) -> Vec<ReminderChannel> {
        if channels.is_empty() {
            self.default_channels.clone()
        } else {
            channels.to_vec()
        }
    }
}

// ==============================================================================
// DELIVERY
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub appointment_id: AppointmentId,
    pub channel: ReminderChannel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub reminder_id: Uuid,
    pub appointment_id: AppointmentId,
    pub appointment_at: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    pub offset_minutes: i64,
    pub message: String,
}

impl ReminderPayload {
    pub fn for_entry(plan: &ReminderPlan, entry: &ReminderEntry) -> Self {
        Self {
            reminder_id: entry.id,
            appointment_id: plan.appointment_id.clone(),
            appointment_at: plan.appointment_at,
            fire_at: entry.fire_at,
            offset_minutes: entry.offset_minutes,
            message: format!(
                "Reminder: your appointment is scheduled for {}",
                plan.appointment_at.format("%Y-%m-%d %H:%M UTC")
            ),
        }
    }
}

/// Handle returned by the clock for one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CancelToken(Uuid);

impl CancelToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReminderEvent {
    Delivered {
        appointment_id: AppointmentId,
        reminder_id: Uuid,
        channel: ReminderChannel,
        fire_at: DateTime<Utc>,
    },
    Failed {
        appointment_id: AppointmentId,
        reminder_id: Uuid,
        channel: ReminderChannel,
        fire_at: DateTime<Utc>,
        reason: String,
    },
}
