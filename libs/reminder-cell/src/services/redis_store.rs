// libs/reminder-cell/src/services/redis_store.rs
use async_trait::async_trait;
use deadpool_redis::Connection;
use redis::AsyncCommands;
use tracing::debug;

use shared_database::{connect, RedisPool};
use shared_models::AppointmentId;

use crate::error::ReminderError;
use crate::models::ReminderSchedule;
use crate::services::store::ReminderPlanStore;

/// `{prefix}reminder_plans` hash: appointment id -> JSON schedule.
pub struct RedisReminderPlanStore {
    pool: RedisPool,
    prefix: String,
}

impl RedisReminderPlanStore {
    pub fn new(pool: RedisPool) -> Self {
        Self::with_prefix(pool, "")
    }

    pub fn with_prefix(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn plans_key(&self) -> String {
        format!("{}reminder_plans", self.prefix)
    }

    async fn get_connection(&self) -> Result<Connection, ReminderError> {
        Ok(connect(&self.pool).await?)
    }
}

#[async_trait]
impl ReminderPlanStore for RedisReminderPlanStore {
    async fn load(&self, appointment_id: &AppointmentId) -> Result<Option<ReminderSchedule>, ReminderError> {
        let mut conn = self.get_connection().await?;
        let data: Option<String> = conn.hget(self.plans_key(), appointment_id.as_str()).await?;
        data.map(|raw| serde_json::from_str(&raw).map_err(ReminderError::from))
            .transpose()
    }

    async fn save(&self, schedule: &ReminderSchedule) -> Result<(), ReminderError> {
        let mut conn = self.get_connection().await?;
        let data = serde_json::to_string(schedule)?;
        let _: () = conn
            .hset(self.plans_key(), schedule.appointment_id().as_str(), data)
            .await?;

        debug!(
            appointment_id = %schedule.appointment_id(),
            generation = schedule.active.generation,
            "Reminder schedule saved to Redis"
        );
        Ok(())
    }

    async fn all(&self) -> Result<Vec<ReminderSchedule>, ReminderError> {
        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn.hvals(self.plans_key()).await?;

        let mut schedules = raw
            .iter()
            .map(|data| serde_json::from_str::<ReminderSchedule>(data))
            .collect::<Result<Vec<_>, _>>()?;
        schedules.sort_by(|a, b| a.appointment_id().cmp(b.appointment_id()));
        Ok(schedules)
    }

    async fn remove(&self, appointment_id: &AppointmentId) -> Result<bool, ReminderError> {
        let mut conn = self.get_connection().await?;
        let removed: u32 = conn.hdel(self.plans_key(), appointment_id.as_str()).await?;
        Ok(removed > 0)
    }
}
