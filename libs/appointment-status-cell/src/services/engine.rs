// libs/appointment-status-cell/src/services/engine.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use shared_models::{AppointmentGuard, AppointmentId, AppointmentLocks};

use crate::error::StatusError;
use crate::models::{
    empty_summary, Actor, AppointmentStatus, RescheduleDetails, StatusRecord, StatusRecordDraft,
    StatusSummary, TransitionRule,
};
use crate::services::lifecycle::AppointmentLifecyclePolicy;
use crate::services::store::StatusStore;

/// A transition that passed validation against the current status.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTransition {
    pub current_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
    pub rule: TransitionRule,
}

pub struct StatusEngine {
    store: Arc<dyn StatusStore>,
    policy: AppointmentLifecyclePolicy,
    locks: AppointmentLocks,
}

impl StatusEngine {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self::with_policy(store, AppointmentLifecyclePolicy::default())
    }

    pub fn with_policy(store: Arc<dyn StatusStore>, policy: AppointmentLifecyclePolicy) -> Self {
        Self {
            store,
            policy,
            locks: AppointmentLocks::new(),
        }
    }

    pub fn policy(&self) -> &AppointmentLifecyclePolicy {
        &self.policy
    }

    /// Acquire the serialization lock for one appointment.
    pub async fn lock(&self, appointment_id: &AppointmentId) -> AppointmentGuard {
        self.locks.lock(appointment_id).await
    }

    /// Register an appointment with an implicit `pending` status and empty history.
    #[instrument(skip(self))]
    pub async fn initialize(&self, appointment_id: &AppointmentId) -> Result<AppointmentStatus, StatusError> {
        let guard = self.lock(appointment_id).await;
        let created = self.store.register(guard.appointment_id()).await?;
        if created {
            info!(appointment_id = %appointment_id, "Appointment registered");
        } else {
            debug!(appointment_id = %appointment_id, "Appointment already registered");
        }

        self.current_status_of(guard.appointment_id()).await
    }

    pub async fn apply_transition(
        &self,
        appointment_id: &AppointmentId,
        new_status: AppointmentStatus,
        actor: Actor,
        reason: Option<String>,
        reschedule_details: Option<RescheduleDetails>,
    ) -> Result<StatusRecord, StatusError> {
        let guard = self.lock(appointment_id).await;
        self.apply_transition_locked(&guard, new_status, actor, reason, reschedule_details)
            .await
    }

    /// Validate without writing. The caller must hold the appointment lock for the result to stay valid.
    pub async fn validate_transition_locked(
        &self,
        guard: &AppointmentGuard,
        new_status: AppointmentStatus,
        actor: Actor,
        reason: Option<&str>,
        reschedule_details: Option<&RescheduleDetails>,
    ) -> Result<ValidatedTransition, StatusError> {
        let current_status = self.current_status_of(guard.appointment_id()).await?;
        let rule = self.policy.evaluate(current_status, new_status, actor)?;
        self.policy
            .validate_payload(new_status, reason, reschedule_details)?;

        Ok(ValidatedTransition {
            current_status,
            new_status,
            rule,
        })
    }

    /// Validate and write a transition while the caller holds the appointment lock.
    #[instrument(skip(self, guard, reason, reschedule_details), fields(appointment_id = %guard.appointment_id()))]
    pub async fn apply_transition_locked(
        &self,
        guard: &AppointmentGuard,
        new_status: AppointmentStatus,
        actor: Actor,
        reason: Option<String>,
        reschedule_details: Option<RescheduleDetails>,
    ) -> Result<StatusRecord, StatusError> {
        let reason = reason
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        let validated = self
            .validate_transition_locked(
                guard,
                new_status,
                actor,
                reason.as_deref(),
                reschedule_details.as_ref(),
            )
            .await?;

        // Keep timestamp order aligned with sequence order under clock skew.
        let mut timestamp = Utc::now();
        if let Some(previous) = self.store.last_record(guard.appointment_id()).await? {
            if previous.timestamp > timestamp {
                warn!(
                    appointment_id = %guard.appointment_id(),
                    "Clock behind previous record, clamping timestamp"
                );
                timestamp = previous.timestamp;
            }
        }

        let draft = StatusRecordDraft {
            appointment_id: guard.appointment_id().clone(),
            previous_status: validated.current_status,
            new_status,
            actor,
            reason,
            // Only booking-type transitions carry a date/time.
            reschedule_details: reschedule_details.filter(|_| {
                matches!(
                    new_status,
                    AppointmentStatus::Scheduled | AppointmentStatus::Rescheduled
                )
            }),
            timestamp,
        };

        let record = self.store.append(draft).await?;
        info!(
            "Status transition applied: {} -> {} by {} ({:?})",
            record.previous_status, record.new_status, record.actor, validated.rule
        );
        Ok(record)
    }

    /// Unknown ids read as `pending`.
    pub async fn get_current_status(&self, appointment_id: &AppointmentId) -> Result<AppointmentStatus, StatusError> {
        self.current_status_of(appointment_id).await
    }

    pub async fn get_history(&self, appointment_id: &AppointmentId) -> Result<Vec<StatusRecord>, StatusError> {
        let mut history = self.store.history(appointment_id).await?;
        history.sort_by_key(|record| record.sequence);
        Ok(history)
    }

    pub async fn get_recent_updates(&self, limit: usize) -> Result<Vec<StatusRecord>, StatusError> {
        self.store.recent(limit).await
    }

    /// One record per appointment whose current status waits on a human.
    pub async fn get_needing_attention(&self) -> Result<Vec<StatusRecord>, StatusError> {
        let mut flagged: Vec<StatusRecord> = self
            .store
            .snapshot()
            .await?
            .into_iter()
            .filter(|snapshot| snapshot.status.needs_attention())
            .filter_map(|snapshot| snapshot.last_record)
            .filter(|record| record.new_status.needs_attention())
            .collect();

        flagged.sort_by(|a, b| b.ordering_key().cmp(&a.ordering_key()));
        Ok(flagged)
    }

    pub async fn get_status_summary(&self) -> Result<StatusSummary, StatusError> {
        let mut summary = empty_summary();
        for snapshot in self.store.snapshot().await? {
            *summary.entry(snapshot.status).or_insert(0) += 1;
        }
        Ok(summary)
    }

    pub fn allowed_transitions(&self, status: AppointmentStatus) -> &'static [AppointmentStatus] {
        self.policy.allowed_transitions(status)
    }

    /// Remove an appointment on explicit external request.
    #[instrument(skip(self))]
    pub async fn purge(&self, appointment_id: &AppointmentId) -> Result<bool, StatusError> {
        let guard = self.lock(appointment_id).await;
        let removed = self.purge_locked(&guard).await;
        self.release(guard).await;
        removed
    }

    pub async fn purge_locked(&self, guard: &AppointmentGuard) -> Result<bool, StatusError> {
        self.store.purge(guard.appointment_id()).await
    }

    /// Give back a guard from [`StatusEngine::lock`], dropping its slot once nobody else uses it.
    pub async fn release(&self, guard: AppointmentGuard) {
        self.locks.release(guard).await;
    }

    pub async fn rebuild_projection(&self) -> Result<usize, StatusError> {
        self.store.rebuild_projection().await
    }

    async fn current_status_of(&self, appointment_id: &AppointmentId) -> Result<AppointmentStatus, StatusError> {
        Ok(self
            .store
            .current_status(appointment_id)
            .await?
            .unwrap_or_default())
    }
}
