// libs/queue-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::QueueCellState;

pub fn queue_routes(state: Arc<QueueCellState>) -> Router {
    // Queue displays in the waiting room connect without credentials
    let public_routes = Router::new()
        .route("/ws/clinics/{clinic_id}", get(handlers::queue_socket));

    let protected_routes = Router::new()
        .route("/check-in/{appointment_id}", post(handlers::check_in))
        .route("/patients/{patient_id}/status", get(handlers::get_patient_status))
        .route("/patients/{patient_id}/notifications", get(handlers::get_patient_notifications))

        // Session control
        .route("/clinics/{clinic_id}/start", post(handlers::start_queue))
        .route("/clinics/{clinic_id}/pause", post(handlers::pause_queue))
        .route("/clinics/{clinic_id}/stop", post(handlers::stop_queue))

        // Queue progress
        .route("/clinics/{clinic_id}/next", post(handlers::call_next))
        .route("/clinics/{clinic_id}/entries/{queue_number}/status", patch(handlers::mark_entry_status))
        .route("/clinics/{clinic_id}/entries/{queue_number}/fast-track", post(handlers::fast_track_entry))

        // Reads
        .route("/clinics/{clinic_id}/status", get(handlers::get_clinic_status))
        .route("/clinics/{clinic_id}/entries", get(handlers::list_entries))
        .route("/clinics/{clinic_id}/report", get(handlers::get_daily_report))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
