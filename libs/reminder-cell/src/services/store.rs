use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use shared_models::AppointmentId;

use crate::error::ReminderError;
use crate::models::ReminderSchedule;

/// Reminder schedules keyed by appointment, replaced wholesale on every write.
#[async_trait]
pub trait ReminderPlanStore: Send + Sync {
    async fn load(&self, appointment_id: &AppointmentId) -> Result<Option<ReminderSchedule>, ReminderError>;

    async fn save(&self, schedule: &ReminderSchedule) -> Result<(), ReminderError>;

    async fn all(&self) -> Result<Vec<ReminderSchedule>, ReminderError>;

    async fn remove(&self, appointment_id: &AppointmentId) -> Result<bool, ReminderError>;
}

#[derive(Debug, Default)]
pub struct InMemoryReminderPlanStore {
    schedules: RwLock<HashMap<AppointmentId, ReminderSchedule>>,
}

impl InMemoryReminderPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReminderPlanStore for InMemoryReminderPlanStore {
    async fn load(&self, appointment_id: &AppointmentId) -> Result<Option<ReminderSchedule>, ReminderError> {
        let schedules = self.schedules.read().await;
        Ok(schedules.get(appointment_id).cloned())
    }

    async fn save(&self, schedule: &ReminderSchedule) -> Result<(), ReminderError> {
        let mut schedules = self.schedules.write().await;
        schedules.insert(schedule.appointment_id().clone(), schedule.clone());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<ReminderSchedule>, ReminderError> {
        let schedules = self.schedules.read().await;
        let mut all: Vec<ReminderSchedule> = schedules.values().cloned().collect();
        all.sort_by(|a, b| a.appointment_id().cmp(b.appointment_id()));
        Ok(all)
    }

    async fn remove(&self, appointment_id: &AppointmentId) -> Result<bool, ReminderError> {
        let mut schedules = self.schedules.write().await;
        Ok(schedules.remove(appointment_id).is_some())
    }
}
