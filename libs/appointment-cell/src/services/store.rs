use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use schedule_cell::models::{Clinic, Doctor, ScheduleError};
use schedule_cell::services::calendar;
use schedule_cell::services::{ClinicDirectory, DoctorBookings};
use shared_config::AppConfig;
use shared_models::auth::{Actor, Role};
use shared_utils::clock::Clock;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, AvailableSlots, BookAppointmentRequest,
    RescheduleAppointmentRequest, WalkInRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::policy::ReschedulePolicy;

type SlotKey = (Uuid, DateTime<Utc>);

/// Notified after the store has committed a change other cells care about.
#[async_trait]
pub trait AppointmentHooks: Send + Sync {
    /// Called once the appointment has reached CANCELLED, COMPLETED or NO_SHOW
    /// outside the queue.
    async fn appointment_finished(&self, appointment: &Appointment);
}

/// Records plus the unique (doctor, instant) index of slot holders.
#[derive(Default)]
struct AppointmentBook {
    appointments: HashMap<Uuid, Appointment>,
    slots: HashMap<SlotKey, Uuid>,
}

impl AppointmentBook {
    fn holder(&self, doctor_id: Uuid, date_time: DateTime<Utc>) -> Option<Uuid> {
        self.slots.get(&(doctor_id, date_time)).copied()
    }

    fn occupied_by(&self, doctor_id: Uuid) -> Vec<DateTime<Utc>> {
        self.slots
            .keys()
            .filter(|(doctor, _)| *doctor == doctor_id)
            .map(|(_, instant)| *instant)
            .collect()
    }

    fn insert(&mut self, appointment: Appointment) {
        if appointment.occupies_slot() {
            self.slots
                .insert((appointment.doctor_id, appointment.date_time), appointment.id);
        }
        self.appointments.insert(appointment.id, appointment);
    }

    fn release(&mut self, appointment: &Appointment) {
        let key = (appointment.doctor_id, appointment.date_time);
        if self.slots.get(&key) == Some(&appointment.id) {
            self.slots.remove(&key);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub strict_slot_check: bool,
    pub max_daily_bookings_per_patient: usize,
    pub reschedule: ReschedulePolicy,
}

impl StoreSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            strict_slot_check: config.strict_slot_check,
            max_daily_bookings_per_patient: config.max_daily_bookings_per_patient,
            reschedule: ReschedulePolicy::from_config(config),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Owns appointment records and every mutation of them.
pub struct AppointmentStore {
    book: Mutex<AppointmentBook>,
    directory: Arc<ClinicDirectory>,
    clock: Arc<dyn Clock>,
    settings: StoreSettings,
    lifecycle: AppointmentLifecycleService,
    hooks: OnceLock<Weak<dyn AppointmentHooks>>,
}

impl AppointmentStore {
    pub fn new(directory: Arc<ClinicDirectory>, clock: Arc<dyn Clock>, settings: StoreSettings) -> Self {
        Self {
            book: Mutex::new(AppointmentBook::default()),
            directory,
            clock,
            settings,
            lifecycle: AppointmentLifecycleService::new(),
            hooks: OnceLock::new(),
        }
    }

    /// Register the listener for committed cancellations. Only the first registration sticks.
    pub fn set_hooks(&self, hooks: &Arc<dyn AppointmentHooks>) {
        if self.hooks.set(Arc::downgrade(hooks)).is_err() {
            warn!("Appointment hooks already registered; ignoring");
        }
    }

    pub fn directory(&self) -> &Arc<ClinicDirectory> {
        &self.directory
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ==========================================================================
    // SLOT CALENDAR
    // ==========================================================================

    /// Free slots for a doctor at a clinic on a clinic-local date.
    pub async fn available_slots(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<AvailableSlots, AppointmentError> {
        let (clinic, doctor) = self.directory.resolve(clinic_id, doctor_id).await?;

        let occupied = self.book.lock().await.occupied_by(doctor_id);
        let slots = calendar::available_slots(&clinic, &doctor, date, &occupied);

        Ok(AvailableSlots {
            clinic_id,
            doctor_id,
            date,
            interval_minutes: doctor.effective_interval(&clinic),
            slots,
        })
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    #[instrument(skip(self, request), fields(clinic_id = %request.clinic_id, doctor_id = %request.doctor_id))]
    pub async fn book(
        &self,
        request: BookAppointmentRequest,
        actor: &Actor,
    ) -> Result<Appointment, AppointmentError> {
        let patient_id = match (actor.role, request.patient_id) {
            (Role::Patient, Some(id)) if id != actor.id => {
                return Err(AppointmentError::NotPermitted(
                    "Patients can only book appointments for themselves".to_string(),
                ));
            }
            (Role::Patient, _) => actor.id,
            (_, Some(id)) => id,
            (_, None) => {
                return Err(AppointmentError::ValidationError(
                    "patient_id is required when booking on behalf of a patient".to_string(),
                ));
            }
        };

        let (clinic, doctor) = self.directory.resolve(request.clinic_id, request.doctor_id).await?;
        let now = self.clock.now();

        if request.date_time < now {
            return Err(AppointmentError::InvalidTime(format!(
                "{} is in the past",
                request.date_time
            )));
        }
        self.validate_slot(&clinic, &doctor, request.date_time)?;

        let mut book = self.book.lock().await;

        let limit = self.settings.max_daily_bookings_per_patient;
        let day = clinic.local_date(request.date_time);
        let booked_that_day = book
            .appointments
            .values()
            .filter(|a| a.patient_id == patient_id && a.occupies_slot())
            .filter(|a| clinic.local_date(a.date_time) == day)
            .count();
        if booked_that_day >= limit {
            warn!("Patient {} hit the daily booking limit of {}", patient_id, limit);
            return Err(AppointmentError::DailyLimitReached { limit });
        }

        if book.holder(doctor.id, request.date_time).is_some() {
            return Err(AppointmentError::SlotTaken {
                doctor_id: doctor.id,
                date_time: request.date_time,
            });
        }

        let appointment = new_appointment(
            patient_id,
            &clinic,
            &doctor,
            request.date_time,
            false,
            request.notes,
            now,
        );
        book.insert(appointment.clone());

        info!(
            "Booked appointment {} for patient {} with doctor {} at {}",
            appointment.id, patient_id, doctor.id, appointment.date_time
        );
        Ok(appointment)
    }

    /// Staff-registered appointment for a patient who is already at the desk.
    #[instrument(skip(self, request), fields(clinic_id = %request.clinic_id, doctor_id = %request.doctor_id))]
    pub async fn register_walk_in(
        &self,
        request: WalkInRequest,
        actor: &Actor,
    ) -> Result<Appointment, AppointmentError> {
        if !actor.is_staff() {
            return Err(AppointmentError::NotPermitted(
                "Only clinic staff can register walk-ins".to_string(),
            ));
        }

        let (clinic, doctor) = self.directory.resolve(request.clinic_id, request.doctor_id).await?;
        ensure_doctor_in_clinic(&clinic, &doctor)?;

        let now = self.clock.now();
        let today = clinic.local_date(now);

        let mut book = self.book.lock().await;

        let date_time = match request.date_time {
            Some(date_time) => {
                if date_time < now && clinic.local_date(date_time) != today {
                    return Err(AppointmentError::InvalidTime(format!(
                        "{} is before the current clinic day",
                        date_time
                    )));
                }
                self.validate_slot(&clinic, &doctor, date_time)?;
                if book.holder(doctor.id, date_time).is_some() {
                    return Err(AppointmentError::SlotTaken {
                        doctor_id: doctor.id,
                        date_time,
                    });
                }
                date_time
            }
            None => first_free_slot_today(&book, &clinic, &doctor, now)
                .ok_or(AppointmentError::NoFreeSlot(doctor.id))?,
        };

        let appointment = new_appointment(
            request.patient_id,
            &clinic,
            &doctor,
            date_time,
            true,
            request.notes,
            now,
        );
        book.insert(appointment.clone());

        info!(
            "Registered walk-in {} for patient {} with doctor {} at {}",
            appointment.id, request.patient_id, doctor.id, date_time
        );
        Ok(appointment)
    }

    // ==========================================================================
    // RESCHEDULE / CANCEL / STATUS
    // ==========================================================================

    /// Move an appointment to another slot. Releasing the old slot and claiming
    /// the new one happen under one lock, so two reschedulers can never both win.
    #[instrument(skip(self, request))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        actor: &Actor,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get(appointment_id).await?;
        ensure_can_modify(&current, actor)?;

        let clinic_id = request.clinic_id.unwrap_or(current.clinic_id);
        let doctor_id = request.doctor_id.unwrap_or(current.doctor_id);
        let (clinic, doctor) = self.directory.resolve(clinic_id, doctor_id).await?;

        let now = self.clock.now();
        if request.date_time < now {
            return Err(AppointmentError::InvalidTime(format!(
                "{} is in the past",
                request.date_time
            )));
        }
        self.validate_slot(&clinic, &doctor, request.date_time)?;

        let mut book = self.book.lock().await;
        let existing = book
            .appointments
            .get(&appointment_id)
            .cloned()
            .ok_or(AppointmentError::NotFound(appointment_id))?;

        if existing.status != AppointmentStatus::Scheduled {
            return Err(AppointmentError::NotReschedulable(existing.status));
        }
        self.settings.reschedule.check(actor, existing.date_time, now)?;

        match book.holder(doctor.id, request.date_time) {
            Some(holder) if holder != appointment_id => {
                return Err(AppointmentError::SlotTaken {
                    doctor_id: doctor.id,
                    date_time: request.date_time,
                });
            }
            _ => {}
        }

        book.release(&existing);
        let mut updated = existing;
        updated.clinic_id = clinic.id;
        updated.doctor_id = doctor.id;
        updated.date_time = request.date_time;
        updated.updated_at = now;
        book.insert(updated.clone());

        info!(
            "Rescheduled appointment {} to doctor {} at {}",
            appointment_id, doctor.id, updated.date_time
        );
        Ok(updated)
    }

    /// Cancel an appointment. Cancelling twice returns the cancelled record unchanged.
    #[instrument(skip(self))]
    pub async fn cancel(&self, appointment_id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        let cancelled = {
            let mut book = self.book.lock().await;
            let existing = book
                .appointments
                .get(&appointment_id)
                .cloned()
                .ok_or(AppointmentError::NotFound(appointment_id))?;
            ensure_can_modify(&existing, actor)?;

            match existing.status {
                AppointmentStatus::Cancelled => {
                    debug!("Appointment {} already cancelled", appointment_id);
                    return Ok(existing);
                }
                AppointmentStatus::Completed | AppointmentStatus::NoShow => {
                    return Err(AppointmentError::AlreadyFinal(existing.status));
                }
                _ => {}
            }

            book.release(&existing);
            let mut cancelled = existing;
            cancelled.status = AppointmentStatus::Cancelled;
            cancelled.updated_at = self.clock.now();
            book.insert(cancelled.clone());
            cancelled
        };

        info!("Cancelled appointment {}", appointment_id);
        self.notify_finished(&cancelled).await;
        Ok(cancelled)
    }

    /// Manual lifecycle update by staff or the appointment's doctor.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        actor: &Actor,
    ) -> Result<Appointment, AppointmentError> {
        let updated = {
            let mut book = self.book.lock().await;
            let existing = book
                .appointments
                .get(&appointment_id)
                .cloned()
                .ok_or(AppointmentError::NotFound(appointment_id))?;

            let is_own_doctor = actor.role == Role::Doctor && actor.id == existing.doctor_id;
            if !actor.is_staff() && !is_own_doctor {
                return Err(AppointmentError::NotPermitted(
                    "Only clinic staff or the treating doctor can change appointment status".to_string(),
                ));
            }

            self.lifecycle
                .validate_status_transition(existing.status, new_status)?;

            if new_status == AppointmentStatus::Cancelled {
                book.release(&existing);
            }
            let mut updated = existing;
            updated.status = new_status;
            updated.updated_at = self.clock.now();
            book.insert(updated.clone());
            updated
        };

        info!("Appointment {} moved to {}", appointment_id, new_status);
        if new_status.is_terminal() {
            self.notify_finished(&updated).await;
        }
        Ok(updated)
    }

    // ==========================================================================
    // QUEUE-FACING OPERATIONS
    // ==========================================================================

    /// SCHEDULED -> CHECKED_IN, failing with a state error from any other status.
    pub async fn mark_checked_in(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let mut book = self.book.lock().await;
        let appointment = book
            .appointments
            .get_mut(&appointment_id)
            .ok_or(AppointmentError::NotFound(appointment_id))?;

        if appointment.status != AppointmentStatus::Scheduled {
            return Err(AppointmentError::InvalidStatusTransition {
                from: appointment.status,
                to: AppointmentStatus::CheckedIn,
            });
        }

        appointment.status = AppointmentStatus::CheckedIn;
        appointment.updated_at = self.clock.now();
        Ok(appointment.clone())
    }

    /// Mirror a queue entry's progress onto its appointment. Never fires hooks.
    pub async fn apply_queue_progress(
        &self,
        appointment_id: Uuid,
        target: AppointmentStatus,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut book = self.book.lock().await;
        let existing = book
            .appointments
            .get(&appointment_id)
            .cloned()
            .ok_or(AppointmentError::NotFound(appointment_id))?;

        let Some(next) = self.lifecycle.queue_driven_transition(existing.status, target) else {
            return Ok(None);
        };

        if next == AppointmentStatus::Cancelled {
            book.release(&existing);
        }
        let mut updated = existing;
        updated.status = next;
        updated.updated_at = self.clock.now();
        book.insert(updated.clone());

        debug!("Appointment {} follows queue to {}", appointment_id, next);
        Ok(Some(updated))
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.book
            .lock()
            .await
            .appointments
            .get(&appointment_id)
            .cloned()
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    pub async fn get_for(&self, appointment_id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        let appointment = self.get(appointment_id).await?;
        ensure_can_view(&appointment, actor)?;
        Ok(appointment)
    }

    pub async fn list_for_patient(
        &self,
        patient_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        actor: &Actor,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        if actor.role == Role::Patient && actor.id != patient_id {
            return Err(AppointmentError::NotPermitted(
                "Patients can only view their own appointments".to_string(),
            ));
        }

        let clinics = self.clinic_index().await;
        let appointments = self
            .filtered(|a| a.patient_id == patient_id)
            .await
            .into_iter()
            .filter(|a| {
                let day = local_date_of(&clinics, a);
                from.map_or(true, |from| day >= from) && to.map_or(true, |to| day <= to)
            })
            .collect();

        Ok(appointments)
    }

    pub async fn list_for_clinic(
        &self,
        clinic_id: Uuid,
        date: Option<NaiveDate>,
        actor: &Actor,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        ensure_clinic_reader(actor)?;
        let clinic = self.directory.get_clinic(clinic_id).await?;

        Ok(self
            .filtered(|a| {
                a.clinic_id == clinic_id && date.map_or(true, |d| clinic.local_date(a.date_time) == d)
            })
            .await)
    }

    /// Not-yet-started appointments of a clinic from now on.
    pub async fn upcoming_for_clinic(
        &self,
        clinic_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        ensure_clinic_reader(actor)?;
        self.directory.get_clinic(clinic_id).await?;
        let now = self.clock.now();

        Ok(self
            .filtered(|a| {
                a.clinic_id == clinic_id
                    && a.date_time >= now
                    && matches!(a.status, AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn)
            })
            .await)
    }

    pub async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        date: Option<NaiveDate>,
        actor: &Actor,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let is_self = actor.role == Role::Doctor && actor.id == doctor_id;
        if !actor.is_staff() && !is_self {
            return Err(AppointmentError::NotPermitted(
                "Only clinic staff or the doctor can list a doctor's appointments".to_string(),
            ));
        }

        let clinics = self.clinic_index().await;
        Ok(self
            .filtered(|a| a.doctor_id == doctor_id)
            .await
            .into_iter()
            .filter(|a| date.map_or(true, |d| local_date_of(&clinics, a) == d))
            .collect())
    }

    /// Every appointment of a clinic on a clinic-local date, for reporting.
    pub async fn appointments_on(&self, clinic: &Clinic, date: NaiveDate) -> Vec<Appointment> {
        self.filtered(|a| a.clinic_id == clinic.id && clinic.local_date(a.date_time) == date)
            .await
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    fn validate_slot(&self, clinic: &Clinic, doctor: &Doctor, date_time: DateTime<Utc>) -> Result<(), AppointmentError> {
        ensure_doctor_in_clinic(clinic, doctor)?;
        if self.settings.strict_slot_check && !calendar::is_on_grid(clinic, doctor, date_time) {
            return Err(AppointmentError::OffGrid(date_time));
        }
        Ok(())
    }

    async fn filtered<F>(&self, predicate: F) -> Vec<Appointment>
    where
        F: Fn(&Appointment) -> bool,
    {
        let book = self.book.lock().await;
        let mut appointments: Vec<Appointment> = book
            .appointments
            .values()
            .filter(|a| predicate(a))
            .cloned()
            .collect();
        appointments.sort_by(|a, b| a.date_time.cmp(&b.date_time).then(a.id.cmp(&b.id)));
        appointments
    }

    async fn clinic_index(&self) -> HashMap<Uuid, Clinic> {
        self.directory
            .list_clinics()
            .await
            .into_iter()
            .map(|clinic| (clinic.id, clinic))
            .collect()
    }

    async fn notify_finished(&self, appointment: &Appointment) {
        if let Some(hooks) = self.hooks.get().and_then(Weak::upgrade) {
            hooks.appointment_finished(appointment).await;
        }
    }
}

#[async_trait]
impl DoctorBookings for AppointmentStore {
    async fn has_upcoming_appointments(&self, doctor_id: Uuid) -> bool {
        let now = self.clock.now();
        self.book
            .lock()
            .await
            .appointments
            .values()
            .any(|a| a.doctor_id == doctor_id && a.occupies_slot() && a.date_time >= now)
    }
}

fn new_appointment(
    patient_id: Uuid,
    clinic: &Clinic,
    doctor: &Doctor,
    date_time: DateTime<Utc>,
    walk_in: bool,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        patient_id,
        doctor_id: doctor.id,
        clinic_id: clinic.id,
        date_time,
        status: AppointmentStatus::Scheduled,
        walk_in,
        notes,
        created_at: now,
        updated_at: now,
    }
}

fn first_free_slot_today(
    book: &AppointmentBook,
    clinic: &Clinic,
    doctor: &Doctor,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let today = clinic.local_date(now);
    let grid = calendar::doctor_grid(clinic, doctor);
    let from = calendar::current_slot_start(&grid, clinic.local_time(now));

    grid.into_iter()
        .filter(|slot| from.map_or(true, |from| *slot >= from))
        .map(|slot| clinic.instant_at(today, slot))
        .find(|instant| book.holder(doctor.id, *instant).is_none())
}

fn ensure_doctor_in_clinic(clinic: &Clinic, doctor: &Doctor) -> Result<(), AppointmentError> {
    if doctor.clinic_id != clinic.id {
        return Err(ScheduleError::DoctorNotInClinic {
            doctor_id: doctor.id,
            clinic_id: clinic.id,
        }
        .into());
    }
    Ok(())
}

fn ensure_can_modify(appointment: &Appointment, actor: &Actor) -> Result<(), AppointmentError> {
    let allowed = match actor.role {
        Role::Staff | Role::Admin => true,
        Role::Patient => actor.id == appointment.patient_id,
        Role::Doctor => actor.id == appointment.doctor_id,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppointmentError::NotPermitted(
            "Not authorized to modify this appointment".to_string(),
        ))
    }
}

fn ensure_can_view(appointment: &Appointment, actor: &Actor) -> Result<(), AppointmentError> {
    ensure_can_modify(appointment, actor).map_err(|_| {
        AppointmentError::NotPermitted("Not authorized to view this appointment".to_string())
    })
}

fn ensure_clinic_reader(actor: &Actor) -> Result<(), AppointmentError> {
    if actor.role == Role::Patient {
        return Err(AppointmentError::NotPermitted(
            "Patients cannot list clinic appointments".to_string(),
        ));
    }
    Ok(())
}

fn local_date_of(clinics: &HashMap<Uuid, Clinic>, appointment: &Appointment) -> NaiveDate {
    clinics
        .get(&appointment.clinic_id)
        .map(|clinic| clinic.local_date(appointment.date_time))
        .unwrap_or_else(|| appointment.date_time.date_naive())
}
