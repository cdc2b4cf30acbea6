// libs/coordination-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::services::AppointmentCoordinator;

pub fn coordination_routes(coordinator: Arc<AppointmentCoordinator>) -> Router {
    let appointment_routes = Router::new()
        .route(
            "/{appointment_id}",
            post(handlers::initialize_appointment).delete(handlers::purge_appointment),
        )
        .route(
            "/{appointment_id}/status",
            get(handlers::get_appointment_status).post(handlers::update_appointment_status),
        )
        .route("/{appointment_id}/history", get(handlers::get_appointment_history))
        .route("/{appointment_id}/reminders", get(handlers::get_appointment_reminders))
        .route(
            "/{appointment_id}/reminders/reschedule",
            post(handlers::reschedule_appointment_reminders),
        );

    let status_routes = Router::new()
        .route("/summary", get(handlers::get_status_summary))
        .route("/recent", get(handlers::get_recent_updates))
        .route("/attention", get(handlers::get_needing_attention));

    Router::new()
        .nest("/appointments", appointment_routes)
        .nest("/status", status_routes)
        .route("/reminders/statistics", get(handlers::get_reminder_statistics))
        .route("/dashboard", get(handlers::get_dashboard))
        .route("/events", get(handlers::stream_events))
        .with_state(coordinator)
}
