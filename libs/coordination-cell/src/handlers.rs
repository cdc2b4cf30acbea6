// libs/coordination-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use shared_models::{AppError, AppointmentId};

use crate::models::{
    InitializeAppointmentRequest, RecentUpdatesQuery, RescheduleRemindersRequest, TransitionOutcome,
    UpdateStatusRequest,
};
use crate::services::AppointmentCoordinator;

type CoordinatorState = State<Arc<AppointmentCoordinator>>;

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler(state = Arc<AppointmentCoordinator>)]
pub async fn initialize_appointment(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<String>,
    Json(request): Json<InitializeAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = AppointmentId::new(appointment_id);
    let outcome = coordinator
        .initialize(&appointment_id, request.slot(), &request.channels)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment_id": appointment_id,
        "status": outcome.status,
        "reminder_plan": outcome.reminder_plan,
    })))
}

pub async fn purge_appointment(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = AppointmentId::new(appointment_id);
    if !coordinator.purge(&appointment_id).await? {
        return Err(AppError::NotFound(format!("Appointment {} not found", appointment_id)));
    }

    Ok(Json(json!({
        "success": true,
        "message": "Appointment purged"
    })))
}

pub async fn get_appointment_status(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = AppointmentId::new(appointment_id);
    let status = coordinator.get_status(&appointment_id).await?;

    Ok(Json(json!({
        "appointment_id": appointment_id,
        "status": status,
    })))
}

/// Rejected transitions answer 422 with the status that is still in force.
#[axum::debug_handler(state = Arc<AppointmentCoordinator>)]
pub async fn update_appointment_status(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Response, AppError> {
    let appointment_id = AppointmentId::new(appointment_id);
    let outcome = coordinator
        .update_status(
            &appointment_id,
            request.status,
            request.actor,
            request.reason,
            request.reschedule_details,
        )
        .await?;

    let response = match outcome {
        TransitionOutcome::Applied {
            record,
            reminder_plan,
            reminders_cancelled,
        } => Json(json!({
            "success": true,
            "record": record,
            "reminder_plan": reminder_plan,
            "reminders_cancelled": reminders_cancelled,
        }))
        .into_response(),
        TransitionOutcome::Rejected {
            current_status,
            reason,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "success": false,
                "current_status": current_status,
                "error": reason,
            })),
        )
            .into_response(),
    };

    Ok(response)
}

pub async fn get_appointment_history(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = AppointmentId::new(appointment_id);
    let history = coordinator.get_history(&appointment_id).await?;

    Ok(Json(json!({
        "appointment_id": appointment_id,
        "history": history,
        "total": history.len(),
    })))
}

// ==============================================================================
// REMINDER HANDLERS
// ==============================================================================

pub async fn get_appointment_reminders(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = AppointmentId::new(appointment_id);
    let plan = coordinator.get_reminder_plan(&appointment_id).await?;
    let statistics = coordinator.get_reminder_statistics(Some(&appointment_id)).await?;

    Ok(Json(json!({
        "appointment_id": appointment_id,
        "plan": plan,
        "statistics": statistics,
    })))
}

pub async fn reschedule_appointment_reminders(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<String>,
    Json(request): Json<RescheduleRemindersRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = AppointmentId::new(appointment_id);
    let slot = appointment_status_cell::RescheduleDetails::new(request.new_date, request.new_time);
    let plan = coordinator
        .reschedule_reminders(&appointment_id, slot, &request.channels)
        .await?;

    Ok(Json(json!({
        "success": true,
        "plan": plan,
    })))
}

pub async fn get_reminder_statistics(State(coordinator): CoordinatorState) -> Result<Json<Value>, AppError> {
    let statistics = coordinator.get_reminder_statistics(None).await?;
    Ok(Json(json!(statistics)))
}

// ==============================================================================
// READ MODELS
// ==============================================================================

pub async fn get_status_summary(State(coordinator): CoordinatorState) -> Result<Json<Value>, AppError> {
    let summary = coordinator.get_status_summary().await?;
    let total: usize = summary.values().sum();

    Ok(Json(json!({
        "summary": summary,
        "total": total,
    })))
}

pub async fn get_recent_updates(
    State(coordinator): CoordinatorState,
    Query(query): Query<RecentUpdatesQuery>,
) -> Result<Json<Value>, AppError> {
    let updates = coordinator.get_recent_updates(query.limit).await?;
    Ok(Json(json!({ "updates": updates })))
}

pub async fn get_needing_attention(State(coordinator): CoordinatorState) -> Result<Json<Value>, AppError> {
    let updates = coordinator.get_needing_attention().await?;
    Ok(Json(json!({
        "updates": updates,
        "total": updates.len(),
    })))
}

pub async fn get_dashboard(State(coordinator): CoordinatorState) -> Result<Json<Value>, AppError> {
    let view = coordinator.get_dashboard_view().await?;
    Ok(Json(json!(view)))
}

/// Server-sent events replacing client polling.
pub async fn stream_events(
    State(coordinator): CoordinatorState,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let receiver = coordinator.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event.kind()).json_data(&event);
                    return Some((sse, receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream subscriber lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
