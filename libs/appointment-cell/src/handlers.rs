// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::current_actor;

use crate::models::{
    BookAppointmentRequest, RescheduleAppointmentRequest, UpdateStatusRequest, WalkInRequest,
};
use crate::state::AppointmentCellState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

// ==============================================================================
// SLOTS & BOOKING
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppointmentCellState>>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state
        .store
        .available_slots(query.clinic_id, query.doctor_id, query.date)
        .await?;

    Ok(Json(json!(slots)))
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointment = state.store.book(request, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn register_walk_in(
    State(state): State<Arc<AppointmentCellState>>,
    Extension(user): Extension<User>,
    Json(request): Json<WalkInRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointment = state.store.register_walk_in(request, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Walk-in registered"
    })))
}

// ==============================================================================
// SINGLE APPOINTMENT
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointment = state.store.get_for(appointment_id, &actor).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointment = state.store.reschedule(appointment_id, request, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointment = state.store.cancel(appointment_id, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointment = state
        .store
        .update_status(appointment_id, request.status, &actor)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// LISTINGS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<Arc<AppointmentCellState>>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<DateRangeQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointments = state
        .store
        .list_for_patient(patient_id, query.from, query.to, &actor)
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_clinic_appointments(
    State(state): State<Arc<AppointmentCellState>>,
    Path(clinic_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointments = state
        .store
        .list_for_clinic(clinic_id, query.date, &actor)
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_upcoming_clinic_appointments(
    State(state): State<Arc<AppointmentCellState>>,
    Path(clinic_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointments = state.store.upcoming_for_clinic(clinic_id, &actor).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_appointments(
    State(state): State<Arc<AppointmentCellState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let appointments = state
        .store
        .list_for_doctor(doctor_id, query.date, &actor)
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}
