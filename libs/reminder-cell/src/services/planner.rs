// libs/reminder-cell/src/services/planner.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_models::{AppointmentId, AppointmentLocks};

use crate::error::ReminderError;
use crate::models::{
    ReminderChannel, ReminderEntry, ReminderPlan, ReminderPolicy, ReminderSchedule, ReminderState,
};
use crate::services::clock::ClockPort;
use crate::services::store::ReminderPlanStore;

/// Computes reminder plans and owns every write to the plan store.
pub struct ReminderPlanner {
    store: Arc<dyn ReminderPlanStore>,
    clock: Arc<dyn ClockPort>,
    policy: ReminderPolicy,
    locks: AppointmentLocks,
    // Entries whose delivery has started; cancellation leaves them alone.
    in_flight: Mutex<HashSet<Uuid>>,
}

impl ReminderPlanner {
    pub fn new(store: Arc<dyn ReminderPlanStore>, clock: Arc<dyn ClockPort>, policy: ReminderPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            locks: AppointmentLocks::new(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> &ReminderPolicy {
        &self.policy
    }

    /// Pure plan computation. Offsets already in the past at `now` are dropped, never backdated.
    pub fn plan_for(
        &self,
        appointment_id: &AppointmentId,
        date: NaiveDate,
        time: NaiveTime,
        channels: &[ReminderChannel],
        now: DateTime<Utc>,
    ) -> ReminderPlan {
        let appointment_at = Utc.from_utc_datetime(&date.and_time(time));
        let channels = self.policy.channels_or_default(channels);

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for offset in &self.policy.offsets {
            let Some(fire_at) = appointment_at.checked_sub_signed(*offset) else {
                warn!(
                    appointment_id = %appointment_id,
                    "Skipping {}m reminder, {} is out of range",
                    offset.num_minutes(),
                    appointment_at
                );
                continue;
            };
            if fire_at <= now {
                debug!(
                    appointment_id = %appointment_id,
                    "Skipping {}m reminder, {} already passed",
                    offset.num_minutes(),
                    fire_at
                );
                continue;
            }

            for channel in &channels {
                if seen.insert((fire_at, *channel)) {
                    entries.push(ReminderEntry::pending(*offset, fire_at, *channel, now));
                }
            }
        }
        entries.sort_by(|a, b| (a.fire_at, a.channel).cmp(&(b.fire_at, b.channel)));

        ReminderPlan {
            appointment_id: appointment_id.clone(),
            appointment_at,
            generation: 1,
            created_at: now,
            entries,
        }
    }

    /// Cancel the pending entries of the previous plan and install a freshly computed one.
    #[instrument(skip(self, channels))]
    pub async fn replace_plan(
        &self,
        appointment_id: &AppointmentId,
        new_date: NaiveDate,
        new_time: NaiveTime,
        channels: &[ReminderChannel],
    ) -> Result<ReminderPlan, ReminderError> {
        let _guard = self.locks.lock(appointment_id).await;
        let now = self.clock.now();
        let mut plan = self.plan_for(appointment_id, new_date, new_time, channels, now);

        let existing = self.store.load(appointment_id).await?;
        let schedule = match existing {
            Some(mut schedule) => {
                let in_flight = self.in_flight.lock().await;
                let mut previous = std::mem::take(&mut schedule.active.entries);
                for entry in previous.iter_mut() {
                    if entry.is_pending() && !in_flight.contains(&entry.id) {
                        entry.state = ReminderState::Cancelled;
                        entry.updated_at = now;
                    }
                }
                // An in-flight entry stays live until its delivery outcome lands.
                let (still_live, retired): (Vec<_>, Vec<_>) =
                    previous.into_iter().partition(ReminderEntry::is_pending);
                schedule.retired.extend(retired);

                plan.generation = schedule.active.generation + 1;
                plan.entries.extend(still_live);
                ReminderSchedule {
                    active: plan,
                    retired: schedule.retired,
                }
            }
            None => ReminderSchedule {
                active: plan,
                retired: Vec::new(),
            },
        };

        self.store.save(&schedule).await?;
        info!(
            appointment_id = %appointment_id,
            generation = schedule.active.generation,
            "Reminder plan installed with {} pending entries",
            schedule.active.pending_entries().count()
        );
        Ok(schedule.active)
    }

    pub async fn current_plan(&self, appointment_id: &AppointmentId) -> Result<Option<ReminderPlan>, ReminderError> {
        Ok(self.store.load(appointment_id).await?.map(|schedule| schedule.active))
    }

    pub async fn schedule(&self, appointment_id: &AppointmentId) -> Result<Option<ReminderSchedule>, ReminderError> {
        self.store.load(appointment_id).await
    }

    pub async fn all_schedules(&self) -> Result<Vec<ReminderSchedule>, ReminderError> {
        self.store.all().await
    }

    /// Put back a previously captured schedule, or clear it when there was none.
    pub async fn restore(
        &self,
        appointment_id: &AppointmentId,
        snapshot: Option<ReminderSchedule>,
    ) -> Result<(), ReminderError> {
        let _guard = self.locks.lock(appointment_id).await;
        match snapshot {
            Some(schedule) => self.store.save(&schedule).await,
            None => self.store.remove(appointment_id).await.map(|_| ()),
        }?;
        warn!(appointment_id = %appointment_id, "Reminder schedule restored from snapshot");
        Ok(())
    }

    /// Mark every pending, not-yet-delivering entry of the active plan as cancelled.
    pub async fn cancel_pending(&self, appointment_id: &AppointmentId) -> Result<Vec<ReminderEntry>, ReminderError> {
        let _guard = self.locks.lock(appointment_id).await;
        let Some(mut schedule) = self.store.load(appointment_id).await? else {
            return Ok(Vec::new());
        };

        let now = self.clock.now();
        let in_flight = self.in_flight.lock().await;
        let mut cancelled = Vec::new();
        for entry in schedule.active.entries.iter_mut() {
            if entry.is_pending() && !in_flight.contains(&entry.id) {
                entry.state = ReminderState::Cancelled;
                entry.updated_at = now;
                cancelled.push(entry.clone());
            }
        }
        drop(in_flight);

        if !cancelled.is_empty() {
            self.store.save(&schedule).await?;
            debug!(appointment_id = %appointment_id, "Cancelled {} pending reminders", cancelled.len());
        }
        Ok(cancelled)
    }

    /// Claim a pending entry for delivery. Returns None if it was cancelled, superseded or purged.
    pub async fn begin_delivery(
        &self,
        appointment_id: &AppointmentId,
        entry_id: Uuid,
    ) -> Result<Option<(ReminderPlan, ReminderEntry)>, ReminderError> {
        let _guard = self.locks.lock(appointment_id).await;
        let Some(schedule) = self.store.load(appointment_id).await? else {
            return Ok(None);
        };

        let Some(entry) = schedule.active.entry(entry_id).filter(|entry| entry.is_pending()).cloned() else {
            return Ok(None);
        };

        let mut in_flight = self.in_flight.lock().await;
        if !in_flight.insert(entry_id) {
            return Ok(None);
        }
        Ok(Some((schedule.active, entry)))
    }

    /// Record the outcome of a delivery started with `begin_delivery`.
    pub async fn finish_delivery(
        &self,
        appointment_id: &AppointmentId,
        entry_id: Uuid,
        outcome: ReminderState,
        failure_reason: Option<String>,
    ) -> Result<Option<ReminderEntry>, ReminderError> {
        let _guard = self.locks.lock(appointment_id).await;
        self.in_flight.lock().await.remove(&entry_id);
        self.mark_entry_locked(appointment_id, entry_id, outcome, failure_reason)
            .await
    }

    /// Move a pending entry to a final state. Entries already final are left untouched.
    pub async fn mark_entry(
        &self,
        appointment_id: &AppointmentId,
        entry_id: Uuid,
        state: ReminderState,
        failure_reason: Option<String>,
    ) -> Result<Option<ReminderEntry>, ReminderError> {
        let _guard = self.locks.lock(appointment_id).await;
        self.mark_entry_locked(appointment_id, entry_id, state, failure_reason)
            .await
    }

    /// Drop the whole schedule. Only used when the appointment itself is purged.
    pub async fn purge(&self, appointment_id: &AppointmentId) -> Result<bool, ReminderError> {
        let guard = self.locks.lock(appointment_id).await;
        let removed = self.store.remove(appointment_id).await;
        self.locks.release(guard).await;
        removed
    }

    async fn mark_entry_locked(
        &self,
        appointment_id: &AppointmentId,
        entry_id: Uuid,
        state: ReminderState,
        failure_reason: Option<String>,
    ) -> Result<Option<ReminderEntry>, ReminderError> {
        let Some(mut schedule) = self.store.load(appointment_id).await? else {
            warn!(appointment_id = %appointment_id, "Reminder outcome for unknown schedule dropped");
            return Ok(None);
        };

        let now = self.clock.now();
        let Some(entry) = schedule
            .active
            .entries
            .iter_mut()
            .chain(schedule.retired.iter_mut())
            .find(|entry| entry.id == entry_id)
        else {
            return Ok(None);
        };

        if entry.state.is_final() {
            debug!("Reminder {} already {:?}, ignoring {:?}", entry_id, entry.state, state);
            return Ok(None);
        }

        entry.state = state;
        entry.failure_reason = failure_reason;
        entry.updated_at = now;
        let updated = entry.clone();

        self.store.save(&schedule).await?;
        Ok(Some(updated))
    }
}
