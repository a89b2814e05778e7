// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::fmt;

use schedule_cell::models::ScheduleError;
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub date_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub walk_in: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Whether the appointment holds its (doctor, time) slot.
    pub fn occupies_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "SCHEDULED"),
            AppointmentStatus::CheckedIn => write!(f, "CHECKED_IN"),
            AppointmentStatus::InProgress => write!(f, "IN_PROGRESS"),
            AppointmentStatus::Completed => write!(f, "COMPLETED"),
            AppointmentStatus::Cancelled => write!(f, "CANCELLED"),
            AppointmentStatus::NoShow => write!(f, "NO_SHOW"),
        }
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    /// Defaults to the caller when the caller is a patient.
    pub patient_id: Option<Uuid>,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub date_time: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkInRequest {
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    /// First free slot of the current clinic-day when omitted.
    pub date_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub clinic_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub date_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlots {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub interval_minutes: u32,
    pub slots: Vec<NaiveTime>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Doctor {doctor_id} is already booked at {date_time}")]
    SlotTaken { doctor_id: Uuid, date_time: DateTime<Utc> },

    #[error("No free slot left today for doctor {0}")]
    NoFreeSlot(Uuid),

    #[error("Invalid appointment time: {0}")]
    InvalidTime(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{0} is not one of the doctor's slot start times")]
    OffGrid(DateTime<Utc>),

    #[error("Appointments cannot be rescheduled less than {notice_hours} hours before they start")]
    RescheduleWindowClosed { notice_hours: i64 },

    #[error("Patient already has {limit} appointments on that day")]
    DailyLimitReached { limit: usize },

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Cannot change appointment status from {from} to {to}")]
    InvalidStatusTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Only scheduled appointments can be rescheduled (status is {0})")]
    NotReschedulable(AppointmentStatus),

    #[error("Appointment is already {0}")]
    AlreadyFinal(AppointmentStatus),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl AppointmentError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppointmentError::NotFound(_) => "not_found",
            AppointmentError::SlotTaken { .. } | AppointmentError::NoFreeSlot(_) => "conflict",
            AppointmentError::InvalidTime(_)
            | AppointmentError::ValidationError(_)
            | AppointmentError::OffGrid(_) => "validation_error",
            AppointmentError::RescheduleWindowClosed { .. }
            | AppointmentError::DailyLimitReached { .. }
            | AppointmentError::NotPermitted(_) => "policy_error",
            AppointmentError::InvalidStatusTransition { .. }
            | AppointmentError::NotReschedulable(_)
            | AppointmentError::AlreadyFinal(_) => "state_error",
            AppointmentError::Schedule(e) => e.kind(),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::Schedule(inner) => inner.into(),
            other => {
                let message = other.to_string();
                match other.kind() {
                    "not_found" => AppError::NotFound(message),
                    "conflict" => AppError::Conflict(message),
                    "policy_error" => AppError::Policy(message),
                    "state_error" => AppError::State(message),
                    _ => AppError::ValidationError(message),
                }
            }
        }
    }
}
