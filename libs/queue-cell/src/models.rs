// libs/queue-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, AppointmentStatus};
use schedule_cell::models::ScheduleError;
use shared_models::error::AppError;

// ==============================================================================
// QUEUE ENTRY
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueEntryStatus {
    Waiting,
    FastTracked,
    Called,
    Served,
    Skipped,
    Cancelled,
}

impl QueueEntryStatus {
    /// Not yet served, skipped or cancelled.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            QueueEntryStatus::Waiting | QueueEntryStatus::FastTracked | QueueEntryStatus::Called
        )
    }

    /// Still waiting to be called.
    pub fn is_waiting(&self) -> bool {
        matches!(self, QueueEntryStatus::Waiting | QueueEntryStatus::FastTracked)
    }

    /// Appointment status the entry's appointment follows when the entry enters this status.
    pub fn appointment_status(&self) -> Option<AppointmentStatus> {
        match self {
            QueueEntryStatus::Called => Some(AppointmentStatus::InProgress),
            QueueEntryStatus::Served => Some(AppointmentStatus::Completed),
            QueueEntryStatus::Skipped => Some(AppointmentStatus::NoShow),
            QueueEntryStatus::Cancelled => Some(AppointmentStatus::Cancelled),
            QueueEntryStatus::Waiting | QueueEntryStatus::FastTracked => None,
        }
    }

    /// Closed status an open entry takes when its appointment finished outside the queue.
    pub fn closing(appointment_status: AppointmentStatus) -> Option<QueueEntryStatus> {
        match appointment_status {
            AppointmentStatus::Completed => Some(QueueEntryStatus::Served),
            AppointmentStatus::NoShow => Some(QueueEntryStatus::Skipped),
            AppointmentStatus::Cancelled => Some(QueueEntryStatus::Cancelled),
            AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn | AppointmentStatus::InProgress => None,
        }
    }
}

impl fmt::Display for QueueEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueEntryStatus::Waiting => write!(f, "WAITING"),
            QueueEntryStatus::FastTracked => write!(f, "FAST_TRACKED"),
            QueueEntryStatus::Called => write!(f, "CALLED"),
            QueueEntryStatus::Served => write!(f, "SERVED"),
            QueueEntryStatus::Skipped => write!(f, "SKIPPED"),
            QueueEntryStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub queue_number: u32,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub status: QueueEntryStatus,
    pub checked_in_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// QUEUE SESSION
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Stopped => write!(f, "STOPPED"),
            QueueState::Running => write!(f, "RUNNING"),
            QueueState::Paused => write!(f, "PAUSED"),
        }
    }
}

// ==============================================================================
// READ MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicQueueStatus {
    pub clinic_id: Uuid,
    pub date: NaiveDate,
    pub state: QueueState,
    pub current_number: u32,
    pub waiting_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientQueueStatus {
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Uuid,
    pub queue_number: u32,
    pub status: QueueEntryStatus,
    pub current_number: u32,
    pub numbers_away: usize,
    pub estimated_wait_minutes: i64,
    pub state: QueueState,
}

/// Push payload describing one clinic-day queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub clinic_id: Uuid,
    pub date: NaiveDate,
    pub state: QueueState,
    pub total: usize,
    pub current_number: u32,
    pub next: Option<SnapshotEntry>,
    pub queue: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub queue_number: u32,
    pub status: QueueEntryStatus,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_id: Uuid,
}

impl From<&QueueEntry> for SnapshotEntry {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            queue_number: entry.queue_number,
            status: entry.status,
            patient_id: entry.patient_id,
            doctor_id: entry.doctor_id,
            appointment_id: entry.appointment_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyReport {
    pub clinic_id: Uuid,
    pub report_date: NaiveDate,
    pub total_appointments: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub no_show: usize,
    pub checked_in: usize,
    pub served: usize,
    pub waiting: usize,
    pub generated_at: DateTime<Utc>,
}

// ==============================================================================
// PATIENT NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// The patient's number was just called.
    QueueCalled,
    /// The patient is three numbers behind the one just called.
    Reminder,
}

impl NotificationKind {
    pub fn message(&self) -> &'static str {
        match self {
            NotificationKind::QueueCalled => "It's your turn. Please proceed to the consultation room.",
            NotificationKind::Reminder => {
                "You are 3 patients away. Please proceed closer to the consultation room."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueNotification {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub appointment_id: Uuid,
    pub kind: NotificationKind,
    pub queue_number: u32,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkStatusRequest {
    pub status: QueueEntryStatus,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is not running (state is {0})")]
    NotRunning(QueueState),

    #[error("Queue is stopped; start it before checking patients in")]
    Stopped,

    #[error("Cannot {action} a queue that is {state}")]
    InvalidSessionTransition { action: &'static str, state: QueueState },

    #[error("Appointment {0} already has an open queue entry")]
    DuplicateEntry(Uuid),

    #[error("Queue entry {0} not found")]
    EntryNotFound(u32),

    #[error("Cannot move queue entry from {from} to {to}")]
    InvalidTransition { from: QueueEntryStatus, to: QueueEntryStatus },

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Check-in is only allowed on the appointment date ({0})")]
    WrongDay(NaiveDate),

    #[error("Patient {0} has no open queue entry today")]
    NoOpenEntry(Uuid),

    #[error(transparent)]
    Appointment(#[from] AppointmentError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl QueueError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::NotRunning(_)
            | QueueError::Stopped
            | QueueError::InvalidSessionTransition { .. }
            | QueueError::InvalidTransition { .. } => "state_error",
            QueueError::DuplicateEntry(_) => "conflict",
            QueueError::EntryNotFound(_) | QueueError::NoOpenEntry(_) => "not_found",
            QueueError::NotPermitted(_) => "policy_error",
            QueueError::WrongDay(_) => "validation_error",
            QueueError::Appointment(e) => e.kind(),
            QueueError::Schedule(e) => e.kind(),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Appointment(inner) => inner.into(),
            QueueError::Schedule(inner) => inner.into(),
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
