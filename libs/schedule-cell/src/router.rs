use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::ScheduleCellState;

pub fn schedule_routes(state: Arc<ScheduleCellState>) -> Router {
    // Schedule configuration is only readable by signed-in users
    let protected_routes = Router::new()
        .route("/clinics", post(handlers::create_clinic).get(handlers::list_clinics))
        .route("/clinics/{clinic_id}", get(handlers::get_clinic))
        .route(
            "/clinics/{clinic_id}/hours",
            get(handlers::get_operating_hours).put(handlers::set_operating_hours),
        )
        .route(
            "/clinics/{clinic_id}/doctors",
            post(handlers::create_doctor).get(handlers::list_doctors),
        )
        .route(
            "/doctors/{doctor_id}/slot-interval",
            get(handlers::get_slot_interval).put(handlers::set_slot_interval),
        )
        .route("/doctors/{doctor_id}", delete(handlers::remove_doctor))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

