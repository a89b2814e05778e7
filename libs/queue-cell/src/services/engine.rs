use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use appointment_cell::models::Appointment;
use appointment_cell::services::{AppointmentHooks, AppointmentStore};
use schedule_cell::models::Clinic;
use schedule_cell::services::ClinicDirectory;
use shared_models::auth::{Actor, Role};
use shared_utils::clock::Clock;

use crate::models::{
    ClinicQueueStatus, DailyReport, NotificationKind, PatientQueueStatus, QueueEntry, QueueEntryStatus,
    QueueError, QueueNotification, QueueSnapshot, QueueState, SnapshotEntry,
};
use crate::services::broadcaster::QueueBroadcaster;
use crate::services::notifications::NotificationInbox;
use crate::services::report::build_daily_report;

type DayKey = (Uuid, NaiveDate);

/// The waiting patient this many numbers behind the one called gets a reminder.
const REMINDER_DISTANCE: u32 = 3;

/// Past clinic-day queues older than this are dropped when a new day opens.
pub const DAY_RETENTION_DAYS: i64 = 30;

/// Queue of one clinic on one clinic-local date.
#[derive(Debug, Default)]
struct ClinicDayQueue {
    state: QueueState,
    last_number: u32,
    current_number: u32,
    entries: BTreeMap<u32, QueueEntry>,
}

impl ClinicDayQueue {
    /// Waiting entries in the order `call_next` would pick them.
    fn call_order(&self) -> Vec<&QueueEntry> {
        let fast_tracked = self
            .entries
            .values()
            .filter(|e| e.status == QueueEntryStatus::FastTracked);
        let waiting = self
            .entries
            .values()
            .filter(|e| e.status == QueueEntryStatus::Waiting);
        fast_tracked.chain(waiting).collect()
    }

    fn open_entry_for(&self, appointment_id: Uuid) -> Option<u32> {
        self.entries
            .values()
            .find(|e| e.appointment_id == appointment_id && e.status.is_open())
            .map(|e| e.queue_number)
    }

    fn waiting_count(&self) -> usize {
        self.entries.values().filter(|e| e.status.is_waiting()).count()
    }

    fn entry_mut(&mut self, queue_number: u32) -> Result<&mut QueueEntry, QueueError> {
        self.entries
            .get_mut(&queue_number)
            .ok_or(QueueError::EntryNotFound(queue_number))
    }

    fn snapshot(&self, clinic_id: Uuid, date: NaiveDate) -> QueueSnapshot {
        let queue: Vec<SnapshotEntry> = self.call_order().into_iter().map(SnapshotEntry::from).collect();
        QueueSnapshot {
            kind: "queue_update".to_string(),
            clinic_id,
            date,
            state: self.state,
            total: queue.len(),
            current_number: self.current_number,
            next: queue.first().cloned(),
            queue,
        }
    }

    fn status(&self, clinic_id: Uuid, date: NaiveDate) -> ClinicQueueStatus {
        ClinicQueueStatus {
            clinic_id,
            date,
            state: self.state,
            current_number: self.current_number,
            waiting_count: self.waiting_count(),
        }
    }
}

/// Owns every clinic-day queue. Each clinic-day is its own critical section;
/// appointment status changes are pushed to the store while that section is held.
pub struct QueueEngine {
    days: RwLock<HashMap<DayKey, Arc<Mutex<ClinicDayQueue>>>>,
    store: Arc<AppointmentStore>,
    directory: Arc<ClinicDirectory>,
    clock: Arc<dyn Clock>,
    broadcaster: QueueBroadcaster,
    notifications: NotificationInbox,
    minutes_per_patient: i64,
}

impl QueueEngine {
    pub fn new(
        store: Arc<AppointmentStore>,
        clock: Arc<dyn Clock>,
        broadcaster: QueueBroadcaster,
        minutes_per_patient: i64,
    ) -> Self {
        Self {
            days: RwLock::new(HashMap::new()),
            directory: store.directory().clone(),
            store,
            clock,
            broadcaster,
            notifications: NotificationInbox::new(),
            minutes_per_patient,
        }
    }

    pub fn broadcaster(&self) -> &QueueBroadcaster {
        &self.broadcaster
    }

    // ==========================================================================
    // CHECK-IN
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn check_in(&self, appointment_id: Uuid, actor: &Actor) -> Result<QueueEntry, QueueError> {
        let appointment = self.store.get(appointment_id).await?;
        if !actor.is_staff() && !(actor.role == Role::Patient && actor.id == appointment.patient_id) {
            return Err(QueueError::NotPermitted(
                "Only the patient or clinic staff can check in an appointment".to_string(),
            ));
        }

        let (clinic, today) = self.today(appointment.clinic_id).await?;
        let appointment_day = clinic.local_date(appointment.date_time);
        if appointment_day != today {
            return Err(QueueError::WrongDay(appointment_day));
        }

        let day = self.day(clinic.id, today).await;
        let mut queue = day.lock().await;

        if queue.state == QueueState::Stopped {
            return Err(QueueError::Stopped);
        }
        if queue.open_entry_for(appointment_id).is_some() {
            return Err(QueueError::DuplicateEntry(appointment_id));
        }

        let checked_in = self.store.mark_checked_in(appointment_id).await?;

        let now = self.clock.now();
        let queue_number = queue.last_number + 1;
        queue.last_number = queue_number;
        let entry = QueueEntry {
            queue_number,
            appointment_id,
            patient_id: checked_in.patient_id,
            doctor_id: checked_in.doctor_id,
            status: QueueEntryStatus::Waiting,
            checked_in_at: now,
            called_at: None,
            updated_at: now,
        };
        queue.entries.insert(queue_number, entry.clone());

        info!(
            "Checked in appointment {} at clinic {} as number {}",
            appointment_id, clinic.id, queue_number
        );
        self.broadcaster.publish(&queue.snapshot(clinic.id, today)).await;
        Ok(entry)
    }

    // ==========================================================================
    // SESSION CONTROL
    // ==========================================================================

    /// STOPPED or PAUSED -> RUNNING. Starting a running queue changes nothing.
    #[instrument(skip(self))]
    pub async fn start(&self, clinic_id: Uuid) -> Result<ClinicQueueStatus, QueueError> {
        self.transition_session(clinic_id, "start", |state| match state {
            QueueState::Stopped | QueueState::Paused | QueueState::Running => Some(QueueState::Running),
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, clinic_id: Uuid) -> Result<ClinicQueueStatus, QueueError> {
        self.transition_session(clinic_id, "pause", |state| match state {
            QueueState::Running => Some(QueueState::Paused),
            QueueState::Stopped | QueueState::Paused => None,
        })
        .await
    }

    /// Entries are kept; numbering continues if the queue restarts the same day.
    #[instrument(skip(self))]
    pub async fn stop(&self, clinic_id: Uuid) -> Result<ClinicQueueStatus, QueueError> {
        self.transition_session(clinic_id, "stop", |_| Some(QueueState::Stopped))
            .await
    }

    async fn transition_session<F>(
        &self,
        clinic_id: Uuid,
        action: &'static str,
        next_state: F,
    ) -> Result<ClinicQueueStatus, QueueError>
    where
        F: Fn(QueueState) -> Option<QueueState>,
    {
        let (clinic, today) = self.today(clinic_id).await?;
        let day = self.day(clinic.id, today).await;
        let mut queue = day.lock().await;

        let state = queue.state;
        let next = next_state(state).ok_or(QueueError::InvalidSessionTransition { action, state })?;
        if next != state {
            info!("Queue for clinic {} on {}: {} -> {}", clinic.id, today, state, next);
            queue.state = next;
        } else {
            debug!("Queue for clinic {} already {}", clinic.id, state);
        }

        self.broadcaster.publish(&queue.snapshot(clinic.id, today)).await;
        Ok(queue.status(clinic.id, today))
    }

    // ==========================================================================
    // QUEUE PROGRESS
    // ==========================================================================

    /// Call the highest-priority waiting entry: fast-tracked before waiting,
    /// lowest number first within each class. `None` when nobody is waiting.
    #[instrument(skip(self))]
    pub async fn call_next(&self, clinic_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let (clinic, today) = self.today(clinic_id).await?;
        let day = self.day(clinic.id, today).await;
        let mut queue = day.lock().await;

        if queue.state != QueueState::Running {
            return Err(QueueError::NotRunning(queue.state));
        }

        let candidates: Vec<(u32, Uuid)> = queue
            .call_order()
            .into_iter()
            .map(|e| (e.queue_number, e.appointment_id))
            .collect();

        let now = self.clock.now();
        for (queue_number, appointment_id) in candidates {
            let appointment = self.store.get(appointment_id).await?;
            if appointment.status.is_terminal() {
                warn!(
                    "Queue entry {} refers to finished appointment {}, dropping it",
                    queue_number, appointment_id
                );
                let entry = queue.entry_mut(queue_number)?;
                entry.status = QueueEntryStatus::Cancelled;
                entry.updated_at = now;
                continue;
            }

            if let Some(target) = QueueEntryStatus::Called.appointment_status() {
                self.store.apply_queue_progress(appointment_id, target).await?;
            }

            let entry = queue.entry_mut(queue_number)?;
            entry.status = QueueEntryStatus::Called;
            entry.called_at = Some(now);
            entry.updated_at = now;
            let called = entry.clone();
            queue.current_number = queue_number;

            info!("Clinic {} called number {}", clinic.id, queue_number);
            self.notifications
                .notify(clinic.id, &called, NotificationKind::QueueCalled, now)
                .await;
            let upcoming = queue
                .entries
                .get(&(queue_number + REMINDER_DISTANCE))
                .filter(|e| e.status.is_waiting())
                .cloned();
            if let Some(upcoming) = upcoming {
                self.notifications
                    .notify(clinic.id, &upcoming, NotificationKind::Reminder, now)
                    .await;
            }

            self.broadcaster.publish(&queue.snapshot(clinic.id, today)).await;
            return Ok(Some(called));
        }

        debug!("No waiting entries for clinic {}", clinic.id);
        self.broadcaster.publish(&queue.snapshot(clinic.id, today)).await;
        Ok(None)
    }

    /// WAITING -> FAST_TRACKED, keeping the entry's number.
    #[instrument(skip(self))]
    pub async fn fast_track(&self, clinic_id: Uuid, queue_number: u32) -> Result<QueueEntry, QueueError> {
        let (clinic, today) = self.today(clinic_id).await?;
        let day = self.day(clinic.id, today).await;
        let mut queue = day.lock().await;

        let now = self.clock.now();
        let entry = queue.entry_mut(queue_number)?;
        if entry.status != QueueEntryStatus::Waiting {
            return Err(QueueError::InvalidTransition {
                from: entry.status,
                to: QueueEntryStatus::FastTracked,
            });
        }
        entry.status = QueueEntryStatus::FastTracked;
        entry.updated_at = now;
        let updated = entry.clone();

        info!("Clinic {} fast-tracked number {}", clinic.id, queue_number);
        self.broadcaster.publish(&queue.snapshot(clinic.id, today)).await;
        Ok(updated)
    }

    /// CALLED -> SERVED | SKIPPED, or any open status -> CANCELLED.
    #[instrument(skip(self))]
    pub async fn mark_status(
        &self,
        clinic_id: Uuid,
        queue_number: u32,
        new_status: QueueEntryStatus,
    ) -> Result<QueueEntry, QueueError> {
        let (clinic, today) = self.today(clinic_id).await?;
        let day = self.day(clinic.id, today).await;
        let mut queue = day.lock().await;

        let (current, appointment_id) = {
            let entry = queue.entry_mut(queue_number)?;
            (entry.status, entry.appointment_id)
        };
        if !is_permitted_mark(current, new_status) {
            return Err(QueueError::InvalidTransition {
                from: current,
                to: new_status,
            });
        }

        if let Some(target) = new_status.appointment_status() {
            self.store.apply_queue_progress(appointment_id, target).await?;
        }

        let now = self.clock.now();
        let entry = queue.entry_mut(queue_number)?;
        entry.status = new_status;
        entry.updated_at = now;
        let updated = entry.clone();

        info!(
            "Clinic {} number {}: {} -> {}",
            clinic.id, queue_number, current, new_status
        );
        self.broadcaster.publish(&queue.snapshot(clinic.id, today)).await;
        Ok(updated)
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn clinic_status(&self, clinic_id: Uuid) -> Result<ClinicQueueStatus, QueueError> {
        let (clinic, today) = self.today(clinic_id).await?;
        match self.existing_day(clinic.id, today).await {
            Some(day) => Ok(day.lock().await.status(clinic.id, today)),
            None => Ok(ClinicDayQueue::default().status(clinic.id, today)),
        }
    }

    /// Entries of a clinic-day in number order; today when no date is given.
    pub async fn entries(&self, clinic_id: Uuid, date: Option<NaiveDate>) -> Result<Vec<QueueEntry>, QueueError> {
        let (clinic, today) = self.today(clinic_id).await?;
        let date = date.unwrap_or(today);
        Ok(match self.existing_day(clinic.id, date).await {
            Some(day) => day.lock().await.entries.values().cloned().collect(),
            None => Vec::new(),
        })
    }

    pub async fn snapshot(&self, clinic_id: Uuid) -> Result<QueueSnapshot, QueueError> {
        let (clinic, today) = self.today(clinic_id).await?;
        match self.existing_day(clinic.id, today).await {
            Some(day) => Ok(day.lock().await.snapshot(clinic.id, today)),
            None => Ok(ClinicDayQueue::default().snapshot(clinic.id, today)),
        }
    }

    /// Where a patient stands in today's queue of whichever clinic they checked in at.
    pub async fn patient_status(&self, patient_id: Uuid, actor: &Actor) -> Result<PatientQueueStatus, QueueError> {
        if actor.role == Role::Patient && actor.id != patient_id {
            return Err(QueueError::NotPermitted(
                "Patients can only view their own queue status".to_string(),
            ));
        }

        let now = self.clock.now();
        let days: Vec<(DayKey, Arc<Mutex<ClinicDayQueue>>)> = {
            let days = self.days.read().await;
            days.iter().map(|(key, day)| (*key, day.clone())).collect()
        };

        let mut best: Option<PatientQueueStatus> = None;
        for ((clinic_id, date), day) in days {
            let Ok(clinic) = self.directory.get_clinic(clinic_id).await else {
                continue;
            };
            if clinic.local_date(now) != date {
                continue;
            }

            let queue = day.lock().await;
            let Some(entry) = queue
                .entries
                .values()
                .find(|e| e.patient_id == patient_id && e.status.is_open())
            else {
                continue;
            };

            let numbers_away = queue
                .entries
                .values()
                .filter(|e| e.status.is_open() && e.queue_number < entry.queue_number)
                .count();
            let status = PatientQueueStatus {
                clinic_id,
                patient_id,
                appointment_id: entry.appointment_id,
                queue_number: entry.queue_number,
                status: entry.status,
                current_number: queue.current_number,
                numbers_away,
                estimated_wait_minutes: numbers_away as i64 * self.minutes_per_patient,
                state: queue.state,
            };

            if best.as_ref().map_or(true, |b| status.queue_number < b.queue_number) {
                best = Some(status);
            }
        }

        best.ok_or(QueueError::NoOpenEntry(patient_id))
    }

    /// Queue notifications sent to a patient, most recent first.
    pub async fn notifications(&self, patient_id: Uuid, actor: &Actor) -> Result<Vec<QueueNotification>, QueueError> {
        if actor.role == Role::Patient && actor.id != patient_id {
            return Err(QueueError::NotPermitted(
                "Patients can only read their own notifications".to_string(),
            ));
        }
        Ok(self.notifications.for_patient(patient_id).await)
    }

    pub async fn daily_report(&self, clinic_id: Uuid, date: Option<NaiveDate>) -> Result<DailyReport, QueueError> {
        let (clinic, today) = self.today(clinic_id).await?;
        let date = date.unwrap_or(today);

        let appointments = self.store.appointments_on(&clinic, date).await;
        let entries = self.entries(clinic.id, Some(date)).await?;
        Ok(build_daily_report(clinic.id, date, &appointments, &entries, self.clock.now()))
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn today(&self, clinic_id: Uuid) -> Result<(Clinic, NaiveDate), QueueError> {
        let clinic = self.directory.get_clinic(clinic_id).await?;
        let today = clinic.local_date(self.clock.now());
        Ok((clinic, today))
    }

    async fn existing_day(&self, clinic_id: Uuid, date: NaiveDate) -> Option<Arc<Mutex<ClinicDayQueue>>> {
        self.days.read().await.get(&(clinic_id, date)).cloned()
    }

    async fn day(&self, clinic_id: Uuid, date: NaiveDate) -> Arc<Mutex<ClinicDayQueue>> {
        if let Some(day) = self.existing_day(clinic_id, date).await {
            return day;
        }
        let mut days = self.days.write().await;
        if !days.contains_key(&(clinic_id, date)) {
            let cutoff = date - Duration::days(DAY_RETENTION_DAYS);
            let before = days.len();
            days.retain(|(_, day), _| *day >= cutoff);
            if days.len() < before {
                info!("Dropped {} queue days before {}", before - days.len(), cutoff);
            }
        }
        days.entry((clinic_id, date))
            .or_insert_with(|| {
                debug!("Opened queue for clinic {} on {}", clinic_id, date);
                Arc::new(Mutex::new(ClinicDayQueue::default()))
            })
            .clone()
    }

    /// Close the appointment's open entry after it finished outside the queue.
    async fn close_entry_for(&self, appointment: &Appointment, at: DateTime<Utc>) {
        let Some(closed) = QueueEntryStatus::closing(appointment.status) else {
            return;
        };
        let Ok(clinic) = self.directory.get_clinic(appointment.clinic_id).await else {
            return;
        };
        let date = clinic.local_date(appointment.date_time);
        let Some(day) = self.existing_day(clinic.id, date).await else {
            return;
        };

        let mut queue = day.lock().await;
        let Some(queue_number) = queue.open_entry_for(appointment.id) else {
            return;
        };
        if let Ok(entry) = queue.entry_mut(queue_number) {
            entry.status = closed;
            entry.updated_at = at;
        }

        info!(
            "Closed queue number {} as {} after appointment {} became {}",
            queue_number, closed, appointment.id, appointment.status
        );
        self.broadcaster.publish(&queue.snapshot(clinic.id, date)).await;
    }
}

#[async_trait]
impl AppointmentHooks for QueueEngine {
    async fn appointment_finished(&self, appointment: &Appointment) {
        self.close_entry_for(appointment, self.clock.now()).await;
    }
}

fn is_permitted_mark(from: QueueEntryStatus, to: QueueEntryStatus) -> bool {
    match to {
        QueueEntryStatus::Served | QueueEntryStatus::Skipped => from == QueueEntryStatus::Called,
        QueueEntryStatus::Cancelled => from.is_open(),
        QueueEntryStatus::Waiting | QueueEntryStatus::FastTracked | QueueEntryStatus::Called => false,
    }
}
