use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use coordination_cell::{coordination_routes, AppointmentCoordinator};

pub fn create_router(coordinator: Arc<AppointmentCoordinator>) -> Router {
    Router::new()
        .route("/", get(|| async { "Amae appointment engine is running!" }))
        .merge(coordination_routes(coordinator))
}
