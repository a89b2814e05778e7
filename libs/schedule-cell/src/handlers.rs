use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::{current_actor, require_admin, require_staff};

use crate::models::{
    CreateClinicRequest, CreateDoctorRequest, SetSlotIntervalRequest, UpdateOperatingHoursRequest,
};
use crate::state::ScheduleCellState;

// ==============================================================================
// CLINIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_clinic(
    State(state): State<Arc<ScheduleCellState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateClinicRequest>,
) -> Result<Json<Value>, AppError> {
    require_admin(&current_actor(&user)?)?;

    let clinic = state.directory.create_clinic(request).await?;

    Ok(Json(json!({
        "success": true,
        "clinic": clinic,
        "message": "Clinic created successfully"
    })))
}

#[axum::debug_handler]
pub async fn list_clinics(
    State(state): State<Arc<ScheduleCellState>>,
) -> Result<Json<Value>, AppError> {
    let clinics = state.directory.list_clinics().await;

    Ok(Json(json!({
        "total": clinics.len(),
        "clinics": clinics
    })))
}

#[axum::debug_handler]
pub async fn get_clinic(
    State(state): State<Arc<ScheduleCellState>>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let clinic = state.directory.get_clinic(clinic_id).await?;
    Ok(Json(json!(clinic)))
}

#[axum::debug_handler]
pub async fn get_operating_hours(
    State(state): State<Arc<ScheduleCellState>>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let hours = state.directory.get_operating_hours(clinic_id).await?;
    Ok(Json(json!(hours)))
}

#[axum::debug_handler]
pub async fn set_operating_hours(
    State(state): State<Arc<ScheduleCellState>>,
    Path(clinic_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateOperatingHoursRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;

    let hours = state.directory.set_operating_hours(clinic_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "hours": hours,
        "message": "Operating hours updated"
    })))
}

// ==============================================================================
// DOCTOR HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_doctor(
    State(state): State<Arc<ScheduleCellState>>,
    Path(clinic_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    require_admin(&current_actor(&user)?)?;

    let doctor = state.directory.create_doctor(clinic_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "doctor": doctor,
        "message": "Doctor created successfully"
    })))
}

#[axum::debug_handler]
pub async fn list_doctors(
    State(state): State<Arc<ScheduleCellState>>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let doctors = state.directory.list_doctors(clinic_id).await?;

    Ok(Json(json!({
        "clinic_id": clinic_id,
        "total": doctors.len(),
        "doctors": doctors
    })))
}

#[axum::debug_handler]
pub async fn get_slot_interval(
    State(state): State<Arc<ScheduleCellState>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let schedule = state.directory.get_schedule(doctor_id).await?;
    Ok(Json(json!(schedule)))
}

#[axum::debug_handler]
pub async fn set_slot_interval(
    State(state): State<Arc<ScheduleCellState>>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<SetSlotIntervalRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;

    let schedule = state
        .directory
        .set_doctor_interval(doctor_id, request.slot_interval_minutes)
        .await?;

    Ok(Json(json!({
        "success": true,
        "schedule": schedule,
        "message": "Slot interval updated"
    })))
}

#[axum::debug_handler]
pub async fn remove_doctor(
    State(state): State<Arc<ScheduleCellState>>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_admin(&current_actor(&user)?)?;

    let doctor = state
        .directory
        .remove_doctor(doctor_id, state.bookings.as_ref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "doctor_id": doctor.id,
        "message": "Doctor removed"
    })))
}
