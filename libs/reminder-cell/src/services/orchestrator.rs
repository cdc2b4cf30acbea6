// libs/reminder-cell/src/services/orchestrator.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_models::AppointmentId;

use crate::error::ReminderError;
use crate::models::{
    CancelToken, NotificationTarget, ReminderChannel, ReminderEvent, ReminderPayload, ReminderPlan,
    ReminderState, ReminderStatistics,
};
use crate::services::channel::NotificationChannel;
use crate::services::clock::ClockPort;
use crate::services::planner::ReminderPlanner;

pub type ReminderEventSender = broadcast::Sender<ReminderEvent>;
pub type ReminderEventReceiver = broadcast::Receiver<ReminderEvent>;

type ArmedTimers = HashMap<AppointmentId, HashMap<Uuid, CancelToken>>;

/// Arms clock callbacks for pending reminders and records delivery outcomes.
pub struct ReminderOrchestrator {
    planner: Arc<ReminderPlanner>,
    clock: Arc<dyn ClockPort>,
    channel: Arc<dyn NotificationChannel>,
    armed: Arc<Mutex<ArmedTimers>>,
    events: ReminderEventSender,
}

impl Clone for ReminderOrchestrator {
    fn clone(&self) -> Self {
        Self {
            planner: Arc::clone(&self.planner),
            clock: Arc::clone(&self.clock),
            channel: Arc::clone(&self.channel),
            armed: Arc::clone(&self.armed),
            events: self.events.clone(),
        }
    }
}

impl ReminderOrchestrator {
    pub fn new(
        planner: Arc<ReminderPlanner>,
        clock: Arc<dyn ClockPort>,
        channel: Arc<dyn NotificationChannel>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            planner,
            clock,
            channel,
            armed: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn planner(&self) -> &Arc<ReminderPlanner> {
        &self.planner
    }

    pub fn subscribe(&self) -> ReminderEventReceiver {
        self.events.subscribe()
    }

    /// Register a clock callback for every pending entry not already armed.
    pub async fn arm(&self, plan: &ReminderPlan) -> usize {
        let mut armed = self.armed.lock().await;
        let timers = armed.entry(plan.appointment_id.clone()).or_default();

        let mut registered = 0;
        for entry in plan.pending_entries() {
            if timers.contains_key(&entry.id) {
                continue;
            }

            let orchestrator = self.clone();
            let appointment_id = plan.appointment_id.clone();
            let entry_id = entry.id;
            let token = self
                .clock
                .schedule_at(
                    entry.fire_at,
                    Box::pin(async move {
                        orchestrator.fire(appointment_id, entry_id).await;
                    }),
                )
                .await;
            timers.insert(entry.id, token);
            registered += 1;
        }

        if timers.is_empty() {
            armed.remove(&plan.appointment_id);
        }
        if registered > 0 {
            debug!(appointment_id = %plan.appointment_id, "Armed {} reminder timers", registered);
        }
        registered
    }

    /// Replace the plan for a new date/time and arm the new entries.
    #[instrument(skip(self, channels))]
    pub async fn reschedule(
        &self,
        appointment_id: &AppointmentId,
        new_date: NaiveDate,
        new_time: NaiveTime,
        channels: &[ReminderChannel],
    ) -> Result<ReminderPlan, ReminderError> {
        self.disarm(appointment_id).await;
        let plan = self
            .planner
            .replace_plan(appointment_id, new_date, new_time, channels)
            .await?;
        self.arm(&plan).await;
        Ok(plan)
    }

    /// Cancel every pending reminder of an appointment. Unknown ids are a no-op.
    #[instrument(skip(self))]
    pub async fn cancel_all(&self, appointment_id: &AppointmentId) -> Result<usize, ReminderError> {
        self.disarm(appointment_id).await;
        let cancelled = self.planner.cancel_pending(appointment_id).await?;
        if !cancelled.is_empty() {
            info!(appointment_id = %appointment_id, "Cancelled {} reminders", cancelled.len());
        }
        Ok(cancelled.len())
    }

    /// Drop the clock registrations for an appointment without touching stored state.
    pub async fn disarm(&self, appointment_id: &AppointmentId) -> usize {
        let timers = self.armed.lock().await.remove(appointment_id).unwrap_or_default();

        let mut disarmed = 0;
        for token in timers.values() {
            if self.clock.cancel(token).await {
                disarmed += 1;
            }
        }
        disarmed
    }

    /// Re-register timers for every pending entry in the store, e.g. after a restart.
    pub async fn rearm_all(&self) -> Result<usize, ReminderError> {
        let mut armed = 0;
        for schedule in self.planner.all_schedules().await? {
            armed += self.arm(&schedule.active).await;
        }
        info!("Re-armed {} reminder timers from the plan store", armed);
        Ok(armed)
    }

    /// Counts across one appointment, or all of them when `appointment_id` is None.
    pub async fn get_statistics(
        &self,
        appointment_id: Option<&AppointmentId>,
    ) -> Result<ReminderStatistics, ReminderError> {
        let schedules = match appointment_id {
            Some(id) => self.planner.schedule(id).await?.into_iter().collect(),
            None => self.planner.all_schedules().await?,
        };

        let mut statistics = ReminderStatistics::default();
        for entry in schedules.iter().flat_map(|schedule| schedule.all_entries()) {
            statistics.record(entry.state);
        }
        Ok(statistics)
    }

    pub async fn armed_count(&self, appointment_id: &AppointmentId) -> usize {
        self.armed
            .lock()
            .await
            .get(appointment_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    async fn fire(&self, appointment_id: AppointmentId, entry_id: Uuid) {
        let claimed = match self.planner.begin_delivery(&appointment_id, entry_id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(appointment_id = %appointment_id, "Could not load reminder {}: {}", entry_id, e);
                return;
            }
        };
        self.forget_timer(&appointment_id, entry_id).await;

        let Some((plan, entry)) = claimed else {
            debug!("Reminder {} no longer pending, skipping", entry_id);
            return;
        };

        let target = NotificationTarget {
            appointment_id: appointment_id.clone(),
            channel: entry.channel,
        };
        let payload = ReminderPayload::for_entry(&plan, &entry);

        let (state, failure_reason, event) = match self.channel.send(&target, &payload).await {
            Ok(()) => (
                ReminderState::Sent,
                None,
                ReminderEvent::Delivered {
                    appointment_id: appointment_id.clone(),
                    reminder_id: entry.id,
                    channel: entry.channel,
                    fire_at: entry.fire_at,
                },
            ),
            Err(e) => {
                warn!(appointment_id = %appointment_id, "Reminder {} failed: {}", entry.id, e);
                (
                    ReminderState::Failed,
                    Some(e.to_string()),
                    ReminderEvent::Failed {
                        appointment_id: appointment_id.clone(),
                        reminder_id: entry.id,
                        channel: entry.channel,
                        fire_at: entry.fire_at,
                        reason: e.to_string(),
                    },
                )
            }
        };

        if let Err(e) = self
            .planner
            .finish_delivery(&appointment_id, entry.id, state, failure_reason)
            .await
        {
            error!(appointment_id = %appointment_id, "Could not record outcome of reminder {}: {}", entry.id, e);
        }

        if self.events.send(event).is_err() {
            debug!("No subscribers for reminder events");
        }
    }

    async fn forget_timer(&self, appointment_id: &AppointmentId, entry_id: Uuid) {
        let mut armed = self.armed.lock().await;
        if let Some(timers) = armed.get_mut(appointment_id) {
            timers.remove(&entry_id);
            if timers.is_empty() {
                armed.remove(appointment_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::channel::MockNotificationChannel;
    use crate::services::clock::ManualClock;
    use crate::services::store::InMemoryReminderPlanStore;
    use crate::models::ReminderPolicy;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn fire_sends_payload_for_requested_channel() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let planner = Arc::new(ReminderPlanner::new(
            Arc::new(InMemoryReminderPlanStore::new()),
            clock.clone(),
            ReminderPolicy::default(),
        ));

        let mut channel = MockNotificationChannel::new();
        channel
            .expect_send()
            .withf(|target, payload| {
                target.channel == ReminderChannel::Email
                    && payload.appointment_id.as_str() == "mocked"
                    && payload.message.contains("2025-03-02 09:30 UTC")
            })
            .times(2)
            .returning(|_, _| Ok(()));

        let orchestrator = ReminderOrchestrator::new(planner, clock.clone(), Arc::new(channel), 4);
        let id = AppointmentId::from("mocked");
        orchestrator
            .reschedule(
                &id,
                NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
                NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                &[ReminderChannel::Email],
            )
            .await
            .unwrap();

        assert_eq!(clock.advance_by(Duration::days(1)).await, 2);
        assert_eq!(orchestrator.get_statistics(None).await.unwrap().sent, 2);
    }
}
