// libs/appointment-status-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::error::StatusError;
use crate::models::{Actor, AppointmentStatus, RescheduleDetails, TransitionRule};

/// Transition table for the appointment workflow.
///
/// The system actor may cancel any non-terminal appointment (expiry and
/// no-show cleanup). That bypass is the only relaxation of the table and can
/// be switched off for hosts whose backend does not support it.
#[derive(Debug, Clone)]
pub struct AppointmentLifecyclePolicy {
    allow_system_cancellation: bool,
}

impl Default for AppointmentLifecyclePolicy {
    fn default() -> Self {
        Self {
            allow_system_cancellation: true,
        }
    }
}

impl AppointmentLifecyclePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_system_cancellation() -> Self {
        Self {
            allow_system_cancellation: false,
        }
    }

    pub fn allows_system_cancellation(&self) -> bool {
        self.allow_system_cancellation
    }

    /// Get all statuses reachable from the given one through the table.
    pub fn allowed_transitions(&self, current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;

        match current_status {
            Pending => &[Scheduled, Cancelled],
            Scheduled => &[Confirmed, Declined, RescheduleRequested, Cancelled],
            Confirmed => &[InProgress, RescheduleRequested, Cancelled],
            Declined => &[Rescheduled, Cancelled],
            RescheduleRequested => &[Rescheduled, Declined, Cancelled],
            Rescheduled => &[Confirmed, InProgress, RescheduleRequested, Cancelled],
            InProgress => &[Completed, Cancelled],
            // Terminal states - no transitions allowed
            Completed => &[],
            Cancelled => &[],
        }
    }

    /// Decide whether `actor` may move an appointment from `current_status` to `new_status`.
    pub fn evaluate(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
        actor: Actor,
    ) -> Result<TransitionRule, StatusError> {
        debug!("Validating status transition from {} to {} by {}", current_status, new_status, actor);

        if self.allowed_transitions(current_status).contains(&new_status) {
            return Ok(TransitionRule::Table);
        }

        if self.allow_system_cancellation
            && actor == Actor::System
            && new_status == AppointmentStatus::Cancelled
            && !current_status.is_terminal()
        {
            debug!("System cancellation bypass applied from {}", current_status);
            return Ok(TransitionRule::SystemCancellation);
        }

        warn!("Invalid status transition attempted: {} -> {} by {}", current_status, new_status, actor);
        Err(StatusError::InvalidTransition {
            from: current_status,
            to: new_status,
            actor,
        })
    }

    /// Check the payload a transition must carry.
    pub fn validate_payload(
        &self,
        new_status: AppointmentStatus,
        reason: Option<&str>,
        reschedule_details: Option<&RescheduleDetails>,
    ) -> Result<(), StatusError> {
        if new_status == AppointmentStatus::Rescheduled && reschedule_details.is_none() {
            return Err(StatusError::MissingData(
                "rescheduled status requires a new date and time".to_string(),
            ));
        }

        if new_status.needs_attention() && reason.is_none() {
            warn!("{} recorded without a reason", new_status);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    #[test]
    fn terminal_states_allow_nothing() {
        let policy = AppointmentLifecyclePolicy::new();
        assert!(policy.allowed_transitions(Completed).is_empty());
        assert!(policy.allowed_transitions(Cancelled).is_empty());
    }

    #[test]
    fn system_bypass_only_targets_cancelled() {
        let policy = AppointmentLifecyclePolicy::new();

        assert_eq!(
            policy.evaluate(InProgress, Cancelled, Actor::System).unwrap(),
            TransitionRule::Table
        );
        assert!(policy.evaluate(Pending, Completed, Actor::System).is_err());
        assert!(policy.evaluate(Completed, Cancelled, Actor::System).is_err());
    }

    #[test]
    fn disabled_bypass_falls_back_to_table() {
        let policy = AppointmentLifecyclePolicy::without_system_cancellation();
        // Every non-terminal state already lists cancelled in the table.
        assert_eq!(
            policy.evaluate(Scheduled, Cancelled, Actor::System).unwrap(),
            TransitionRule::Table
        );
        assert!(!policy.allows_system_cancellation());
    }

    #[test]
    fn rescheduled_requires_details() {
        let policy = AppointmentLifecyclePolicy::new();
        assert!(matches!(
            policy.validate_payload(Rescheduled, None, None),
            Err(StatusError::MissingData(_))
        ));
        assert!(policy.validate_payload(Declined, None, None).is_ok());
    }
}
