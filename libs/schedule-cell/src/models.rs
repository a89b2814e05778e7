use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

pub const MIN_SLOT_INTERVAL_MINUTES: u32 = 1;
pub const MAX_SLOT_INTERVAL_MINUTES: u32 = 240;

const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

// ==============================================================================
// CORE SCHEDULE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    pub default_slot_interval_minutes: u32,
    /// Fixed offset of the clinic's local time from UTC.
    pub utc_offset_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clinic {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Calendar date of `instant` on the clinic's wall clock.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset()).date_naive()
    }

    pub fn local_time(&self, instant: DateTime<Utc>) -> NaiveTime {
        instant.with_timezone(&self.offset()).time()
    }

    /// UTC instant of a clinic-local date and time.
    pub fn instant_at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        Utc.from_utc_datetime(&(local - Duration::minutes(self.utc_offset_minutes as i64)))
    }

    pub fn operating_hours(&self) -> OperatingHours {
        OperatingHours {
            clinic_id: self.id,
            open_time: self.open_time,
            close_time: self.close_time,
            default_slot_interval_minutes: self.default_slot_interval_minutes,
            utc_offset_minutes: self.utc_offset_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Doctor {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub full_name: String,
    /// Overrides the clinic default when set.
    pub slot_interval_minutes: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doctor {
    pub fn effective_interval(&self, clinic: &Clinic) -> u32 {
        self.slot_interval_minutes
            .unwrap_or(clinic.default_slot_interval_minutes)
    }

    pub fn schedule(&self, clinic: &Clinic) -> DoctorSchedule {
        DoctorSchedule {
            doctor_id: self.id,
            clinic_id: self.clinic_id,
            slot_interval_minutes: self.slot_interval_minutes,
            effective_interval_minutes: self.effective_interval(clinic),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatingHours {
    pub clinic_id: Uuid,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    pub default_slot_interval_minutes: u32,
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorSchedule {
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub slot_interval_minutes: Option<u32>,
    pub effective_interval_minutes: u32,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClinicRequest {
    pub name: String,
    pub address: Option<String>,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    pub default_slot_interval_minutes: u32,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOperatingHoursRequest {
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    pub default_slot_interval_minutes: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDoctorRequest {
    pub full_name: String,
    pub slot_interval_minutes: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetSlotIntervalRequest {
    /// `None` clears the override and falls back to the clinic default.
    pub slot_interval_minutes: Option<u32>,
}

// ==============================================================================
// VALIDATION
// ==============================================================================

pub fn validate_interval(minutes: u32) -> Result<(), ScheduleError> {
    if (MIN_SLOT_INTERVAL_MINUTES..=MAX_SLOT_INTERVAL_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(ScheduleError::InvalidInterval(minutes))
    }
}

pub fn validate_hours(open_time: NaiveTime, close_time: NaiveTime) -> Result<(), ScheduleError> {
    if open_time < close_time {
        Ok(())
    } else {
        Err(ScheduleError::InvalidHours { open_time, close_time })
    }
}

pub fn validate_utc_offset(minutes: i32) -> Result<(), ScheduleError> {
    if minutes.abs() <= MAX_UTC_OFFSET_MINUTES {
        Ok(())
    } else {
        Err(ScheduleError::ValidationError(format!(
            "UTC offset {} minutes is out of range",
            minutes
        )))
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Clinic not found: {0}")]
    ClinicNotFound(Uuid),

    #[error("Doctor not found: {0}")]
    DoctorNotFound(Uuid),

    #[error("Slot interval must be between 1 and 240 minutes, got {0}")]
    InvalidInterval(u32),

    #[error("Opening time {open_time} must be before closing time {close_time}")]
    InvalidHours { open_time: NaiveTime, close_time: NaiveTime },

    #[error("Doctor {doctor_id} does not belong to clinic {clinic_id}")]
    DoctorNotInClinic { doctor_id: Uuid, clinic_id: Uuid },

    #[error("Doctor {0} still has upcoming appointments")]
    DoctorHasUpcomingAppointments(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ScheduleError {
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleError::ClinicNotFound(_) | ScheduleError::DoctorNotFound(_) => "not_found",
            ScheduleError::InvalidInterval(_)
            | ScheduleError::InvalidHours { .. }
            | ScheduleError::DoctorNotInClinic { .. }
            | ScheduleError::ValidationError(_) => "validation_error",
            ScheduleError::DoctorHasUpcomingAppointments(_) => "state_error",
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::ClinicNotFound(_) | ScheduleError::DoctorNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            ScheduleError::DoctorHasUpcomingAppointments(_) => AppError::State(e.to_string()),
            _ => AppError::ValidationError(e.to_string()),
        }
    }
}
