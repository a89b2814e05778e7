use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    validate_hours, validate_interval, validate_utc_offset, Clinic, CreateClinicRequest,
    CreateDoctorRequest, Doctor, DoctorSchedule, OperatingHours, ScheduleError,
    UpdateOperatingHoursRequest,
};

/// Answers whether a doctor still has bookings that block removal.
#[async_trait]
pub trait DoctorBookings: Send + Sync {
    async fn has_upcoming_appointments(&self, doctor_id: Uuid) -> bool;
}

#[derive(Default)]
struct DirectoryState {
    clinics: HashMap<Uuid, Clinic>,
    doctors: HashMap<Uuid, Doctor>,
}

/// Clinics, their doctors and the schedule configuration of both.
pub struct ClinicDirectory {
    state: RwLock<DirectoryState>,
    default_utc_offset_minutes: i32,
}

impl ClinicDirectory {
    pub fn new(default_utc_offset_minutes: i32) -> Self {
        Self {
            state: RwLock::new(DirectoryState::default()),
            default_utc_offset_minutes,
        }
    }

    // ==========================================================================
    // CLINICS
    // ==========================================================================

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_clinic(&self, request: CreateClinicRequest) -> Result<Clinic, ScheduleError> {
        if request.name.trim().is_empty() {
            return Err(ScheduleError::ValidationError("Clinic name is required".to_string()));
        }
        validate_hours(request.open_time, request.close_time)?;
        validate_interval(request.default_slot_interval_minutes)?;
        let utc_offset_minutes = request
            .utc_offset_minutes
            .unwrap_or(self.default_utc_offset_minutes);
        validate_utc_offset(utc_offset_minutes)?;

        let now = Utc::now();
        let clinic = Clinic {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            address: request.address,
            open_time: request.open_time,
            close_time: request.close_time,
            default_slot_interval_minutes: request.default_slot_interval_minutes,
            utc_offset_minutes,
            created_at: now,
            updated_at: now,
        };

        self.state.write().await.clinics.insert(clinic.id, clinic.clone());
        info!("Created clinic {} ({})", clinic.id, clinic.name);

        Ok(clinic)
    }

    pub async fn get_clinic(&self, clinic_id: Uuid) -> Result<Clinic, ScheduleError> {
        self.state
            .read()
            .await
            .clinics
            .get(&clinic_id)
            .cloned()
            .ok_or(ScheduleError::ClinicNotFound(clinic_id))
    }

    pub async fn list_clinics(&self) -> Vec<Clinic> {
        let state = self.state.read().await;
        let mut clinics: Vec<Clinic> = state.clinics.values().cloned().collect();
        clinics.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        clinics
    }

    pub async fn get_operating_hours(&self, clinic_id: Uuid) -> Result<OperatingHours, ScheduleError> {
        Ok(self.get_clinic(clinic_id).await?.operating_hours())
    }

    /// Update any of open/close/default interval; the resulting hours must stay valid.
    #[instrument(skip(self, request))]
    pub async fn set_operating_hours(
        &self,
        clinic_id: Uuid,
        request: UpdateOperatingHoursRequest,
    ) -> Result<OperatingHours, ScheduleError> {
        let mut state = self.state.write().await;
        let clinic = state
            .clinics
            .get_mut(&clinic_id)
            .ok_or(ScheduleError::ClinicNotFound(clinic_id))?;

        let open_time = request.open_time.unwrap_or(clinic.open_time);
        let close_time = request.close_time.unwrap_or(clinic.close_time);
        validate_hours(open_time, close_time)?;

        let interval = request
            .default_slot_interval_minutes
            .unwrap_or(clinic.default_slot_interval_minutes);
        validate_interval(interval)?;

        clinic.open_time = open_time;
        clinic.close_time = close_time;
        clinic.default_slot_interval_minutes = interval;
        clinic.updated_at = Utc::now();

        info!(
            "Clinic {} hours set to {}-{} every {} min",
            clinic_id, open_time, close_time, interval
        );

        Ok(clinic.operating_hours())
    }

    pub async fn set_default_interval(&self, clinic_id: Uuid, minutes: u32) -> Result<OperatingHours, ScheduleError> {
        self.set_operating_hours(
            clinic_id,
            UpdateOperatingHoursRequest {
                default_slot_interval_minutes: Some(minutes),
                ..Default::default()
            },
        )
        .await
    }

    // ==========================================================================
    // DOCTORS
    // ==========================================================================

    #[instrument(skip(self, request), fields(full_name = %request.full_name))]
    pub async fn create_doctor(
        &self,
        clinic_id: Uuid,
        request: CreateDoctorRequest,
    ) -> Result<Doctor, ScheduleError> {
        if request.full_name.trim().is_empty() {
            return Err(ScheduleError::ValidationError("Doctor name is required".to_string()));
        }
        if let Some(minutes) = request.slot_interval_minutes {
            validate_interval(minutes)?;
        }

        let mut state = self.state.write().await;
        if !state.clinics.contains_key(&clinic_id) {
            return Err(ScheduleError::ClinicNotFound(clinic_id));
        }

        let now = Utc::now();
        let doctor = Doctor {
            id: Uuid::new_v4(),
            clinic_id,
            full_name: request.full_name.trim().to_string(),
            slot_interval_minutes: request.slot_interval_minutes,
            created_at: now,
            updated_at: now,
        };
        state.doctors.insert(doctor.id, doctor.clone());
        info!("Created doctor {} in clinic {}", doctor.id, clinic_id);

        Ok(doctor)
    }

    pub async fn get_doctor(&self, doctor_id: Uuid) -> Result<Doctor, ScheduleError> {
        self.state
            .read()
            .await
            .doctors
            .get(&doctor_id)
            .cloned()
            .ok_or(ScheduleError::DoctorNotFound(doctor_id))
    }

    pub async fn list_doctors(&self, clinic_id: Uuid) -> Result<Vec<Doctor>, ScheduleError> {
        let state = self.state.read().await;
        if !state.clinics.contains_key(&clinic_id) {
            return Err(ScheduleError::ClinicNotFound(clinic_id));
        }

        let mut doctors: Vec<Doctor> = state
            .doctors
            .values()
            .filter(|doctor| doctor.clinic_id == clinic_id)
            .cloned()
            .collect();
        doctors.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
        Ok(doctors)
    }

    /// Clinic and doctor as one consistent read. The doctor is returned even
    /// when it belongs to another clinic; callers decide what that means.
    pub async fn resolve(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<(Clinic, Doctor), ScheduleError> {
        let state = self.state.read().await;
        let clinic = state
            .clinics
            .get(&clinic_id)
            .cloned()
            .ok_or(ScheduleError::ClinicNotFound(clinic_id))?;
        let doctor = state
            .doctors
            .get(&doctor_id)
            .cloned()
            .ok_or(ScheduleError::DoctorNotFound(doctor_id))?;
        Ok((clinic, doctor))
    }

    pub async fn get_schedule(&self, doctor_id: Uuid) -> Result<DoctorSchedule, ScheduleError> {
        let state = self.state.read().await;
        let doctor = state
            .doctors
            .get(&doctor_id)
            .ok_or(ScheduleError::DoctorNotFound(doctor_id))?;
        let clinic = state
            .clinics
            .get(&doctor.clinic_id)
            .ok_or(ScheduleError::ClinicNotFound(doctor.clinic_id))?;
        Ok(doctor.schedule(clinic))
    }

    #[instrument(skip(self))]
    pub async fn set_doctor_interval(
        &self,
        doctor_id: Uuid,
        minutes: Option<u32>,
    ) -> Result<DoctorSchedule, ScheduleError> {
        if let Some(minutes) = minutes {
            validate_interval(minutes)?;
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let doctor = state
            .doctors
            .get_mut(&doctor_id)
            .ok_or(ScheduleError::DoctorNotFound(doctor_id))?;
        let clinic = state
            .clinics
            .get(&doctor.clinic_id)
            .ok_or(ScheduleError::ClinicNotFound(doctor.clinic_id))?;

        doctor.slot_interval_minutes = minutes;
        doctor.updated_at = Utc::now();
        debug!("Doctor {} slot interval set to {:?}", doctor_id, minutes);

        Ok(doctor.schedule(clinic))
    }

    /// Remove a doctor that has no upcoming non-cancelled appointments.
    #[instrument(skip(self, bookings))]
    pub async fn remove_doctor(
        &self,
        doctor_id: Uuid,
        bookings: &dyn DoctorBookings,
    ) -> Result<Doctor, ScheduleError> {
        // Existence first so unknown ids are NotFound rather than a state error
        self.get_doctor(doctor_id).await?;

        if bookings.has_upcoming_appointments(doctor_id).await {
            warn!("Refusing to remove doctor {} with upcoming appointments", doctor_id);
            return Err(ScheduleError::DoctorHasUpcomingAppointments(doctor_id));
        }

        let removed = self
            .state
            .write()
            .await
            .doctors
            .remove(&doctor_id)
            .ok_or(ScheduleError::DoctorNotFound(doctor_id))?;
        info!("Removed doctor {} from clinic {}", doctor_id, removed.clinic_id);

        Ok(removed)
    }
}

impl Default for ClinicDirectory {
    fn default() -> Self {
        Self::new(0)
    }
}
