// libs/coordination-cell/src/services/coordinator.rs
use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use appointment_status_cell::{
    Actor, AppointmentStatus, RescheduleDetails, StatusEngine, StatusRecord, StatusSummary,
};
use reminder_cell::{
    ReminderChannel, ReminderOrchestrator, ReminderPlan, ReminderSchedule, ReminderStatistics,
};
use shared_models::{AppointmentGuard, AppointmentId};

use crate::error::CoordinationError;
use crate::models::{
    CoordinationEvent, CoordinatorOptions, DashboardView, InitializeOutcome, TransitionOutcome,
};

pub type CoordinationEventReceiver = broadcast::Receiver<CoordinationEvent>;

/// What the reminder side did for a status change.
enum ReminderChange {
    Unchanged,
    Replanned(ReminderPlan),
    Cancelled(usize),
}

/// Single entry point for status changes and reminder planning of an appointment.
pub struct AppointmentCoordinator {
    engine: Arc<StatusEngine>,
    reminders: ReminderOrchestrator,
    options: CoordinatorOptions,
    events: broadcast::Sender<CoordinationEvent>,
}

impl AppointmentCoordinator {
    pub fn new(engine: Arc<StatusEngine>, reminders: ReminderOrchestrator, options: CoordinatorOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_channel_capacity.max(1));
        Self {
            engine,
            reminders,
            options,
            events,
        }
    }

    pub fn subscribe(&self) -> CoordinationEventReceiver {
        self.events.subscribe()
    }

    /// Register an appointment; a known date/time also plans its reminders.
    #[instrument(skip(self, channels))]
    pub async fn initialize(
        &self,
        appointment_id: &AppointmentId,
        slot: Option<RescheduleDetails>,
        channels: &[ReminderChannel],
    ) -> Result<InitializeOutcome, CoordinationError> {
        let status = self.engine.initialize(appointment_id).await?;
        let reminder_plan = match slot {
            Some(slot) => Some(self.reschedule_reminders(appointment_id, slot, channels).await?),
            None => None,
        };

        Ok(InitializeOutcome { status, reminder_plan })
    }

    /// Apply a status transition and keep the reminder plan in step with it.
    ///
    /// Runs under the appointment's lock. Reminder work happens first; if either side fails the
    /// reminder schedule is put back to what it was and the status is left untouched.
    #[instrument(skip(self, reason, reschedule_details))]
    pub async fn update_status(
        &self,
        appointment_id: &AppointmentId,
        new_status: AppointmentStatus,
        actor: Actor,
        reason: Option<String>,
        reschedule_details: Option<RescheduleDetails>,
    ) -> Result<TransitionOutcome, CoordinationError> {
        let guard = self.engine.lock(appointment_id).await;

        let validation = self
            .engine
            .validate_transition_locked(
                &guard,
                new_status,
                actor,
                reason.as_deref(),
                reschedule_details.as_ref(),
            )
            .await;
        if let Err(e) = validation {
            if !e.is_validation() {
                return Err(e.into());
            }
            let current_status = self.engine.get_current_status(appointment_id).await?;
            info!("Status change rejected: {}", e);
            return Ok(TransitionOutcome::Rejected {
                current_status,
                reason: e.to_string(),
            });
        }

        let snapshot = self.reminders.planner().schedule(appointment_id).await?;
        let change = match self
            .apply_reminder_change(appointment_id, new_status, reschedule_details.as_ref(), snapshot.as_ref())
            .await
        {
            Ok(change) => change,
            Err(e) => {
                self.rollback_reminders(appointment_id, snapshot).await;
                return Err(e);
            }
        };

        let record = match self
            .engine
            .apply_transition_locked(&guard, new_status, actor, reason, reschedule_details)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(appointment_id = %appointment_id, "Status write failed, rolling back reminders: {}", e);
                self.rollback_reminders(appointment_id, snapshot).await;
                return Err(e.into());
            }
        };
        drop(guard);

        self.publish(CoordinationEvent::StatusChanged { record: record.clone() });
        let (reminder_plan, reminders_cancelled) = match change {
            ReminderChange::Unchanged => (None, 0),
            ReminderChange::Replanned(plan) => {
                self.publish_replanned(&plan);
                (Some(plan), 0)
            }
            ReminderChange::Cancelled(count) => {
                self.publish(CoordinationEvent::RemindersCancelled {
                    appointment_id: appointment_id.clone(),
                    count,
                });
                (None, count)
            }
        };

        Ok(TransitionOutcome::Applied {
            record,
            reminder_plan,
            reminders_cancelled,
        })
    }

    /// Replan reminders for a new date/time without a status change.
    #[instrument(skip(self, channels))]
    pub async fn reschedule_reminders(
        &self,
        appointment_id: &AppointmentId,
        slot: RescheduleDetails,
        channels: &[ReminderChannel],
    ) -> Result<ReminderPlan, CoordinationError> {
        let _guard = self.engine.lock(appointment_id).await;

        let status = self.engine.get_current_status(appointment_id).await?;
        if status.is_terminal() {
            return Err(CoordinationError::AppointmentClosed { status });
        }

        let plan = self
            .reminders
            .reschedule(appointment_id, slot.new_date, slot.new_time, channels)
            .await?;
        self.publish_replanned(&plan);
        Ok(plan)
    }

    /// Drop an appointment's history, projection and reminders.
    ///
    /// Status goes first. If the status purge fails the reminders are left armed as they were;
    /// if the reminder purge fails afterwards the call can be repeated to finish the job.
    #[instrument(skip(self))]
    pub async fn purge(&self, appointment_id: &AppointmentId) -> Result<bool, CoordinationError> {
        let guard = self.engine.lock(appointment_id).await;
        let result = self.purge_locked(appointment_id, &guard).await;
        self.engine.release(guard).await;
        result
    }

    async fn purge_locked(
        &self,
        appointment_id: &AppointmentId,
        guard: &AppointmentGuard,
    ) -> Result<bool, CoordinationError> {
        self.reminders.disarm(appointment_id).await;

        let had_status = match self.engine.purge_locked(guard).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(appointment_id = %appointment_id, "Status purge failed, re-arming reminders: {}", e);
                if let Ok(Some(plan)) = self.reminders.planner().current_plan(appointment_id).await {
                    self.reminders.arm(&plan).await;
                }
                return Err(e.into());
            }
        };
        let had_reminders = self.reminders.planner().purge(appointment_id).await?;

        info!(appointment_id = %appointment_id, "Appointment purged");
        Ok(had_reminders || had_status)
    }

    pub async fn get_status(&self, appointment_id: &AppointmentId) -> Result<AppointmentStatus, CoordinationError> {
        Ok(self.engine.get_current_status(appointment_id).await?)
    }

    pub async fn get_history(&self, appointment_id: &AppointmentId) -> Result<Vec<StatusRecord>, CoordinationError> {
        Ok(self.engine.get_history(appointment_id).await?)
    }

    pub async fn get_recent_updates(&self, limit: Option<usize>) -> Result<Vec<StatusRecord>, CoordinationError> {
        let limit = limit.unwrap_or(self.options.recent_updates_limit);
        Ok(self.engine.get_recent_updates(limit).await?)
    }

    pub async fn get_needing_attention(&self) -> Result<Vec<StatusRecord>, CoordinationError> {
        Ok(self.engine.get_needing_attention().await?)
    }

    pub async fn get_status_summary(&self) -> Result<StatusSummary, CoordinationError> {
        Ok(self.engine.get_status_summary().await?)
    }

    pub async fn get_reminder_statistics(
        &self,
        appointment_id: Option<&AppointmentId>,
    ) -> Result<ReminderStatistics, CoordinationError> {
        Ok(self.reminders.get_statistics(appointment_id).await?)
    }

    pub async fn get_reminder_plan(&self, appointment_id: &AppointmentId) -> Result<Option<ReminderPlan>, CoordinationError> {
        Ok(self.reminders.planner().current_plan(appointment_id).await?)
    }

    pub async fn get_dashboard_view(&self) -> Result<DashboardView, CoordinationError> {
        let (summary, needing_attention, reminder_statistics) = tokio::try_join!(
            self.get_status_summary(),
            self.get_needing_attention(),
            self.get_reminder_statistics(None),
        )?;

        Ok(DashboardView {
            summary,
            needing_attention,
            reminder_statistics,
        })
    }

    /// Rebuild the status projection and re-arm stored reminders after a restart.
    pub async fn restore_timers(&self) -> Result<usize, CoordinationError> {
        let appointments = self.engine.rebuild_projection().await?;
        let armed = self.reminders.rearm_all().await?;
        info!("Restored {} appointments and {} reminder timers", appointments, armed);
        Ok(armed)
    }

    /// Republish reminder delivery outcomes on the coordination event stream.
    pub fn forward_reminder_events(&self) -> JoinHandle<()> {
        let mut receiver = self.reminders.subscribe();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let _ = events.send(CoordinationEvent::Reminder { event });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Reminder event forwarder lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Reminder event forwarder stopped");
        })
    }

    async fn apply_reminder_change(
        &self,
        appointment_id: &AppointmentId,
        new_status: AppointmentStatus,
        reschedule_details: Option<&RescheduleDetails>,
        previous: Option<&ReminderSchedule>,
    ) -> Result<ReminderChange, CoordinationError> {
        if new_status.is_terminal() {
            let count = self.reminders.cancel_all(appointment_id).await?;
            return Ok(ReminderChange::Cancelled(count));
        }

        let slot = reschedule_details.filter(|_| {
            matches!(
                new_status,
                AppointmentStatus::Scheduled | AppointmentStatus::Rescheduled
            )
        });
        let Some(slot) = slot else {
            return Ok(ReminderChange::Unchanged);
        };

        let channels = previous.map(planned_channels).unwrap_or_default();
        let plan = self
            .reminders
            .reschedule(appointment_id, slot.new_date, slot.new_time, &channels)
            .await?;
        Ok(ReminderChange::Replanned(plan))
    }

    async fn rollback_reminders(&self, appointment_id: &AppointmentId, snapshot: Option<ReminderSchedule>) {
        self.reminders.disarm(appointment_id).await;
        let active = snapshot.as_ref().map(|schedule| schedule.active.clone());

        if let Err(e) = self.reminders.planner().restore(appointment_id, snapshot).await {
            error!(appointment_id = %appointment_id, "Reminder rollback failed: {}", e);
        }
        // Delivery re-checks the stored entry before sending.
        if let Some(plan) = active {
            self.reminders.arm(&plan).await;
        }
    }

    fn publish_replanned(&self, plan: &ReminderPlan) {
        self.publish(CoordinationEvent::RemindersReplanned {
            appointment_id: plan.appointment_id.clone(),
            generation: plan.generation,
            pending: plan.pending_entries().count(),
        });
    }

    fn publish(&self, event: CoordinationEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscribers for coordination events");
        }
    }
}

/// Channels the previous plan used, so a replan keeps the patient's choice.
fn planned_channels(schedule: &ReminderSchedule) -> Vec<ReminderChannel> {
    schedule
        .active
        .entries
        .iter()
        .map(|entry| entry.channel)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
