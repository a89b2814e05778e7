use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use appointment_cell::models::{Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest};
use appointment_cell::services::{AppointmentHooks, AppointmentStore, StoreSettings};
use queue_cell::models::{NotificationKind, QueueEntryStatus, QueueError, QueueState};
use queue_cell::services::engine::DAY_RETENTION_DAYS;
use queue_cell::services::{QueueBroadcaster, QueueEngine};
use schedule_cell::models::{CreateClinicRequest, CreateDoctorRequest};
use schedule_cell::services::ClinicDirectory;
use shared_models::auth::{Actor, Role};
use shared_utils::clock::ManualClock;

struct Fixture {
    engine: Arc<QueueEngine>,
    store: Arc<AppointmentStore>,
    clock: ManualClock,
    clinic_id: Uuid,
    doctor_id: Uuid,
    staff: Actor,
}

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, d, h, m, 0).unwrap()
}

impl Fixture {
    async fn new() -> Self {
        let directory = Arc::new(ClinicDirectory::new(0));
        let clinic = directory
            .create_clinic(CreateClinicRequest {
                name: "Harbour Clinic".to_string(),
                address: None,
                open_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                close_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                default_slot_interval_minutes: 15,
                utc_offset_minutes: Some(0),
            })
            .await
            .unwrap();
        let doctor = directory
            .create_doctor(
                clinic.id,
                CreateDoctorRequest {
                    full_name: "Dr. Mensah".to_string(),
                    slot_interval_minutes: None,
                },
            )
            .await
            .unwrap();

        let clock = ManualClock::new(at(10, 8, 0));
        let store = Arc::new(AppointmentStore::new(
            directory,
            Arc::new(clock.clone()),
            StoreSettings::default(),
        ));
        let engine = Arc::new(QueueEngine::new(
            store.clone(),
            Arc::new(clock.clone()),
            QueueBroadcaster::new(16),
            5,
        ));
        let hooks: Arc<dyn AppointmentHooks> = engine.clone();
        store.set_hooks(&hooks);

        Self {
            engine,
            store,
            clock,
            clinic_id: clinic.id,
            doctor_id: doctor.id,
            staff: Actor::new(Uuid::new_v4(), Role::Staff),
        }
    }

    /// Books a fresh patient into the given slot.
    async fn book_at(&self, date_time: DateTime<Utc>) -> Appointment {
        self.store
            .book(
                BookAppointmentRequest {
                    patient_id: Some(Uuid::new_v4()),
                    clinic_id: self.clinic_id,
                    doctor_id: self.doctor_id,
                    date_time,
                    notes: None,
                },
                &self.staff,
            )
            .await
            .unwrap()
    }

    async fn book(&self, h: u32, m: u32) -> Appointment {
        self.book_at(at(10, h, m)).await
    }

    async fn checked_in(&self, h: u32, m: u32) -> (Appointment, u32) {
        let appointment = self.book(h, m).await;
        let entry = self.engine.check_in(appointment.id, &self.staff).await.unwrap();
        (appointment, entry.queue_number)
    }
}

#[tokio::test]
async fn test_check_in_requires_started_queue() {
    let fx = Fixture::new().await;
    let appointment = fx.book(9, 0).await;

    let result = fx.engine.check_in(appointment.id, &fx.staff).await;
    assert_matches!(result, Err(QueueError::Stopped));
    assert_eq!(
        fx.store.get(appointment.id).await.unwrap().status,
        AppointmentStatus::Scheduled
    );
}

#[tokio::test]
async fn test_check_in_assigns_sequential_numbers() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();

    let (a, first) = fx.checked_in(9, 0).await;
    let (_, second) = fx.checked_in(9, 15).await;

    assert_eq!((first, second), (1, 2));
    assert_eq!(fx.store.get(a.id).await.unwrap().status, AppointmentStatus::CheckedIn);

    let status = fx.engine.clinic_status(fx.clinic_id).await.unwrap();
    assert_eq!(status.state, QueueState::Running);
    assert_eq!(status.waiting_count, 2);
    assert_eq!(status.current_number, 0);
}

#[tokio::test]
async fn test_duplicate_check_in_is_rejected() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let (appointment, _) = fx.checked_in(9, 0).await;

    let result = fx.engine.check_in(appointment.id, &fx.staff).await;
    assert_matches!(result, Err(QueueError::DuplicateEntry(id)) if id == appointment.id);
    assert_eq!(fx.engine.entries(fx.clinic_id, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_check_in_only_on_appointment_day() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let tomorrow = fx.book_at(at(11, 9, 0)).await;

    let result = fx.engine.check_in(tomorrow.id, &fx.staff).await;
    assert_matches!(result, Err(QueueError::WrongDay(_)));
}

#[tokio::test]
async fn test_patient_checks_in_only_own_appointment() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let appointment = fx.book(9, 0).await;

    let stranger = Actor::new(Uuid::new_v4(), Role::Patient);
    let result = fx.engine.check_in(appointment.id, &stranger).await;
    assert_matches!(result, Err(QueueError::NotPermitted(_)));

    let owner = Actor::new(appointment.patient_id, Role::Patient);
    let entry = fx.engine.check_in(appointment.id, &owner).await.unwrap();
    assert_eq!(entry.patient_id, appointment.patient_id);
}

#[tokio::test]
async fn test_cancelled_appointment_cannot_check_in() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let appointment = fx.book(9, 0).await;
    fx.store.cancel(appointment.id, &fx.staff).await.unwrap();

    let result = fx.engine.check_in(appointment.id, &fx.staff).await;
    assert_matches!(
        result,
        Err(QueueError::Appointment(AppointmentError::InvalidStatusTransition { .. }))
    );
    assert!(fx.engine.entries(fx.clinic_id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fast_tracked_entry_is_called_first() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let (_, a) = fx.checked_in(9, 0).await;
    let (b_appointment, b) = fx.checked_in(9, 15).await;
    assert_eq!((a, b), (1, 2));

    let tracked = fx.engine.fast_track(fx.clinic_id, 2).await.unwrap();
    assert_eq!(tracked.status, QueueEntryStatus::FastTracked);
    assert_eq!(tracked.queue_number, 2);

    let called = fx.engine.call_next(fx.clinic_id).await.unwrap().unwrap();
    assert_eq!(called.queue_number, 2);
    assert_eq!(called.status, QueueEntryStatus::Called);
    assert_eq!(
        fx.store.get(b_appointment.id).await.unwrap().status,
        AppointmentStatus::InProgress
    );

    let called = fx.engine.call_next(fx.clinic_id).await.unwrap().unwrap();
    assert_eq!(called.queue_number, 1);
    assert_eq!(fx.engine.clinic_status(fx.clinic_id).await.unwrap().current_number, 1);

    assert_matches!(fx.engine.call_next(fx.clinic_id).await, Ok(None));
}

#[tokio::test]
async fn test_fast_track_only_from_waiting() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    fx.checked_in(9, 0).await;
    fx.engine.call_next(fx.clinic_id).await.unwrap();

    let result = fx.engine.fast_track(fx.clinic_id, 1).await;
    assert_matches!(
        result,
        Err(QueueError::InvalidTransition { from: QueueEntryStatus::Called, .. })
    );
    assert_matches!(
        fx.engine.fast_track(fx.clinic_id, 42).await,
        Err(QueueError::EntryNotFound(42))
    );
}

#[tokio::test]
async fn test_mark_status_follows_entry_rules() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let (served, _) = fx.checked_in(9, 0).await;
    let (skipped, _) = fx.checked_in(9, 15).await;
    let (cancelled, _) = fx.checked_in(9, 30).await;

    // Waiting entries cannot be served
    assert_matches!(
        fx.engine.mark_status(fx.clinic_id, 1, QueueEntryStatus::Served).await,
        Err(QueueError::InvalidTransition { from: QueueEntryStatus::Waiting, to: QueueEntryStatus::Served })
    );

    fx.engine.call_next(fx.clinic_id).await.unwrap();
    let entry = fx.engine.mark_status(fx.clinic_id, 1, QueueEntryStatus::Served).await.unwrap();
    assert_eq!(entry.status, QueueEntryStatus::Served);
    assert_eq!(fx.store.get(served.id).await.unwrap().status, AppointmentStatus::Completed);

    fx.engine.call_next(fx.clinic_id).await.unwrap();
    fx.engine.mark_status(fx.clinic_id, 2, QueueEntryStatus::Skipped).await.unwrap();
    assert_eq!(fx.store.get(skipped.id).await.unwrap().status, AppointmentStatus::NoShow);

    fx.engine.mark_status(fx.clinic_id, 3, QueueEntryStatus::Cancelled).await.unwrap();
    let appointment = fx.store.get(cancelled.id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);

    // Terminal entries stay terminal
    assert_matches!(
        fx.engine.mark_status(fx.clinic_id, 1, QueueEntryStatus::Cancelled).await,
        Err(QueueError::InvalidTransition { from: QueueEntryStatus::Served, .. })
    );

    // The cancelled slot is bookable again
    let slots = fx
        .store
        .available_slots(fx.clinic_id, fx.doctor_id, at(10, 0, 0).date_naive())
        .await
        .unwrap();
    assert!(slots.slots.contains(&NaiveTime::from_hms_opt(9, 30, 0).unwrap()));
}

#[tokio::test]
async fn test_session_transitions() {
    let fx = Fixture::new().await;

    assert_matches!(
        fx.engine.pause(fx.clinic_id).await,
        Err(QueueError::InvalidSessionTransition { state: QueueState::Stopped, .. })
    );

    assert_ok!(fx.engine.start(fx.clinic_id).await);
    let again = assert_ok!(fx.engine.start(fx.clinic_id).await);
    assert_eq!(again.state, QueueState::Running);

    let paused = assert_ok!(fx.engine.pause(fx.clinic_id).await);
    assert_eq!(paused.state, QueueState::Paused);
    assert_matches!(
        fx.engine.pause(fx.clinic_id).await,
        Err(QueueError::InvalidSessionTransition { state: QueueState::Paused, .. })
    );

    // Patients may still queue while the doctor is paused, but nobody is called
    let (_, first) = fx.checked_in(9, 0).await;
    assert_eq!(first, 1);
    assert_matches!(
        fx.engine.call_next(fx.clinic_id).await,
        Err(QueueError::NotRunning(QueueState::Paused))
    );

    assert_ok!(fx.engine.stop(fx.clinic_id).await);
    let late = fx.book(9, 15).await;
    let err = assert_err!(fx.engine.check_in(late.id, &fx.staff).await);
    assert_eq!(err.kind(), "state_error");

    // Restarting the same day keeps numbering going
    fx.engine.start(fx.clinic_id).await.unwrap();
    let entry = fx.engine.check_in(late.id, &fx.staff).await.unwrap();
    assert_eq!(entry.queue_number, 2);
}

#[tokio::test]
async fn test_new_day_starts_fresh() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    fx.checked_in(9, 0).await;

    let tomorrow = fx.book_at(at(11, 9, 0)).await;
    fx.clock.set(at(11, 8, 0));

    let status = fx.engine.clinic_status(fx.clinic_id).await.unwrap();
    assert_eq!(status.state, QueueState::Stopped);
    assert_eq!(status.waiting_count, 0);

    fx.engine.start(fx.clinic_id).await.unwrap();
    let entry = fx.engine.check_in(tomorrow.id, &fx.staff).await.unwrap();
    assert_eq!(entry.queue_number, 1);

    let yesterday = fx.engine.entries(fx.clinic_id, Some(at(10, 0, 0).date_naive())).await.unwrap();
    assert_eq!(yesterday.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_check_ins_get_unique_numbers() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();

    let mut appointments = Vec::new();
    for slot in 0..12u32 {
        appointments.push(fx.book(9 + slot / 4, (slot % 4) * 15).await);
    }

    let handles: Vec<_> = appointments
        .iter()
        .map(|appointment| {
            let engine = fx.engine.clone();
            let staff = fx.staff;
            let appointment_id = appointment.id;
            tokio::spawn(async move { engine.check_in(appointment_id, &staff).await })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().queue_number);
    }
    numbers.sort_unstable();

    assert_eq!(numbers, (1..=12).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_cancelling_appointment_drops_queue_entry() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let (appointment, number) = fx.checked_in(9, 0).await;

    let patient = Actor::new(appointment.patient_id, Role::Patient);
    fx.store.cancel(appointment.id, &patient).await.unwrap();

    let entries = fx.engine.entries(fx.clinic_id, None).await.unwrap();
    assert_eq!(entries[0].queue_number, number);
    assert_eq!(entries[0].status, QueueEntryStatus::Cancelled);
    assert_eq!(fx.engine.clinic_status(fx.clinic_id).await.unwrap().waiting_count, 0);
    assert_matches!(fx.engine.call_next(fx.clinic_id).await, Ok(None));
}

#[tokio::test]
async fn test_manual_check_in_is_refused_and_queue_check_in_still_works() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let appointment = fx.book(9, 0).await;

    assert_matches!(
        fx.store
            .update_status(appointment.id, AppointmentStatus::CheckedIn, &fx.staff)
            .await,
        Err(AppointmentError::InvalidStatusTransition {
            from: AppointmentStatus::Scheduled,
            to: AppointmentStatus::CheckedIn,
        })
    );

    let entry = fx.engine.check_in(appointment.id, &fx.staff).await.unwrap();
    assert_eq!(entry.queue_number, 1);
    assert_eq!(
        fx.store.get(appointment.id).await.unwrap().status,
        AppointmentStatus::CheckedIn
    );
}

#[tokio::test]
async fn test_manual_terminal_status_closes_queue_entry() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let (absent, _) = fx.checked_in(9, 0).await;
    let (seen, _) = fx.checked_in(9, 15).await;
    let mut updates = fx.engine.broadcaster().subscribe(fx.clinic_id).await;

    fx.store
        .update_status(absent.id, AppointmentStatus::NoShow, &fx.staff)
        .await
        .unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&updates.recv().await.unwrap()).unwrap();
    assert_eq!(snapshot["total"], 1);
    assert_eq!(snapshot["next"]["queueNumber"], 2);

    fx.store
        .update_status(seen.id, AppointmentStatus::InProgress, &fx.staff)
        .await
        .unwrap();
    fx.store
        .update_status(seen.id, AppointmentStatus::Completed, &fx.staff)
        .await
        .unwrap();

    let entries = fx.engine.entries(fx.clinic_id, None).await.unwrap();
    assert_eq!(entries[0].status, QueueEntryStatus::Skipped);
    assert_eq!(entries[1].status, QueueEntryStatus::Served);

    assert_eq!(fx.engine.clinic_status(fx.clinic_id).await.unwrap().waiting_count, 0);
    let snapshot = fx.engine.snapshot(fx.clinic_id).await.unwrap();
    assert_eq!(snapshot.total, 0);
    assert!(snapshot.next.is_none());
    assert_matches!(fx.engine.call_next(fx.clinic_id).await, Ok(None));
}

#[tokio::test]
async fn test_call_next_notifies_called_and_upcoming_patients() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    let mut patients = Vec::new();
    for m in [0, 15, 30, 45] {
        patients.push(fx.checked_in(9, m).await.0);
    }
    let (fifth, _) = fx.checked_in(10, 0).await;

    fx.engine.call_next(fx.clinic_id).await.unwrap();

    let first = fx.engine.notifications(patients[0].patient_id, &fx.staff).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].kind, NotificationKind::QueueCalled);
    assert_eq!(first[0].queue_number, 1);
    assert_eq!(first[0].appointment_id, patients[0].id);

    let fourth = fx.engine.notifications(patients[3].patient_id, &fx.staff).await.unwrap();
    assert_eq!(fourth.len(), 1);
    assert_eq!(fourth[0].kind, NotificationKind::Reminder);
    assert_eq!(fourth[0].queue_number, 4);
    assert!(fourth[0].message.contains("3 patients away"));

    for quiet in [&patients[1], &patients[2], &fifth] {
        assert!(fx.engine.notifications(quiet.patient_id, &fx.staff).await.unwrap().is_empty());
    }

    // Number 5 is no longer waiting when 2 is called, so nobody is reminded
    fx.store.cancel(fifth.id, &fx.staff).await.unwrap();
    fx.engine.call_next(fx.clinic_id).await.unwrap();
    assert!(fx.engine.notifications(fifth.patient_id, &fx.staff).await.unwrap().is_empty());
    let second = fx.engine.notifications(patients[1].patient_id, &fx.staff).await.unwrap();
    assert_eq!(second[0].kind, NotificationKind::QueueCalled);

    let me = Actor::new(patients[3].patient_id, Role::Patient);
    assert_eq!(fx.engine.notifications(me.id, &me).await.unwrap().len(), 1);
    assert_matches!(
        fx.engine.notifications(patients[0].patient_id, &me).await,
        Err(QueueError::NotPermitted(_))
    );
}

#[tokio::test]
async fn test_patient_status_counts_people_ahead() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    fx.checked_in(9, 0).await;
    fx.checked_in(9, 15).await;
    let (mine, _) = fx.checked_in(9, 30).await;

    let me = Actor::new(mine.patient_id, Role::Patient);
    let status = fx.engine.patient_status(mine.patient_id, &me).await.unwrap();
    assert_eq!(status.queue_number, 3);
    assert_eq!(status.numbers_away, 2);
    assert_eq!(status.estimated_wait_minutes, 10);
    assert_eq!(status.state, QueueState::Running);

    fx.engine.call_next(fx.clinic_id).await.unwrap();
    fx.engine.mark_status(fx.clinic_id, 1, QueueEntryStatus::Served).await.unwrap();
    let status = fx.engine.patient_status(mine.patient_id, &me).await.unwrap();
    assert_eq!(status.numbers_away, 1);
    assert_eq!(status.current_number, 1);

    let other = Actor::new(Uuid::new_v4(), Role::Patient);
    assert_matches!(
        fx.engine.patient_status(mine.patient_id, &other).await,
        Err(QueueError::NotPermitted(_))
    );
    assert_matches!(
        fx.engine.patient_status(other.id, &other).await,
        Err(QueueError::NoOpenEntry(_))
    );
}

#[tokio::test]
async fn test_every_mutation_publishes_snapshot() {
    let fx = Fixture::new().await;
    let mut updates = fx.engine.broadcaster().subscribe(fx.clinic_id).await;

    fx.engine.start(fx.clinic_id).await.unwrap();
    let started: serde_json::Value = serde_json::from_str(&updates.recv().await.unwrap()).unwrap();
    assert_eq!(started["type"], "queue_update");
    assert_eq!(started["state"], "RUNNING");
    assert_eq!(started["total"], 0);

    let (appointment, _) = fx.checked_in(9, 0).await;
    let checked_in: serde_json::Value = serde_json::from_str(&updates.recv().await.unwrap()).unwrap();
    assert_eq!(checked_in["total"], 1);
    assert_eq!(checked_in["next"]["queueNumber"], 1);
    assert_eq!(checked_in["next"]["appointmentId"], appointment.id.to_string());

    fx.engine.call_next(fx.clinic_id).await.unwrap();
    let called: serde_json::Value = serde_json::from_str(&updates.recv().await.unwrap()).unwrap();
    assert_eq!(called["total"], 0);
    assert_eq!(called["currentNumber"], 1);
    assert!(called["next"].is_null());
}

#[tokio::test]
async fn test_daily_report_tallies_the_day() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    fx.checked_in(9, 0).await;
    fx.checked_in(9, 15).await;
    fx.checked_in(9, 30).await;
    let cancelled = fx.book(9, 45).await;
    fx.store.cancel(cancelled.id, &fx.staff).await.unwrap();
    fx.book(10, 0).await;

    fx.engine.call_next(fx.clinic_id).await.unwrap();
    fx.engine.mark_status(fx.clinic_id, 1, QueueEntryStatus::Served).await.unwrap();
    fx.engine.call_next(fx.clinic_id).await.unwrap();
    fx.engine.mark_status(fx.clinic_id, 2, QueueEntryStatus::Skipped).await.unwrap();

    let report = fx.engine.daily_report(fx.clinic_id, None).await.unwrap();
    assert_eq!(report.report_date, at(10, 0, 0).date_naive());
    assert_eq!(report.total_appointments, 5);
    assert_eq!(report.completed, 1);
    assert_eq!(report.no_show, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.checked_in, 1);
    assert_eq!(report.served, 1);
    assert_eq!(report.waiting, 1);
}

#[tokio::test]
async fn test_old_queue_days_are_dropped_after_retention() {
    let fx = Fixture::new().await;
    fx.engine.start(fx.clinic_id).await.unwrap();
    fx.checked_in(9, 0).await;
    let first_day = at(10, 0, 0).date_naive();

    // Still inside the window on its last day
    fx.clock.set(at(10, 8, 0) + chrono::Duration::days(DAY_RETENTION_DAYS));
    fx.engine.start(fx.clinic_id).await.unwrap();
    assert_eq!(fx.engine.entries(fx.clinic_id, Some(first_day)).await.unwrap().len(), 1);

    fx.clock.advance(chrono::Duration::days(1));
    fx.engine.start(fx.clinic_id).await.unwrap();
    assert!(fx.engine.entries(fx.clinic_id, Some(first_day)).await.unwrap().is_empty());

    // Appointments outlive the queue history
    let report = fx.engine.daily_report(fx.clinic_id, Some(first_day)).await.unwrap();
    assert_eq!(report.total_appointments, 1);
    assert_eq!(report.served, 0);
}
