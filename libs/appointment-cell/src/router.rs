// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::AppointmentCellState;

pub fn appointment_routes(state: Arc<AppointmentCellState>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/slots", get(handlers::get_available_slots))
        .route("/", post(handlers::book_appointment))
        .route("/walk-in", post(handlers::register_walk_in))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))

        // Appointment listings
        .route("/patients/{patient_id}", get(handlers::get_patient_appointments))
        .route("/clinics/{clinic_id}", get(handlers::get_clinic_appointments))
        .route("/clinics/{clinic_id}/upcoming", get(handlers::get_upcoming_clinic_appointments))
        .route("/doctors/{doctor_id}", get(handlers::get_doctor_appointments))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
