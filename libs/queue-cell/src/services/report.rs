use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use appointment_cell::models::{Appointment, AppointmentStatus};

use crate::models::{DailyReport, QueueEntry, QueueEntryStatus};

/// Tally a clinic-day from its appointments and queue entries.
pub fn build_daily_report(
    clinic_id: Uuid,
    report_date: NaiveDate,
    appointments: &[Appointment],
    entries: &[QueueEntry],
    generated_at: DateTime<Utc>,
) -> DailyReport {
    let with_status = |status: AppointmentStatus| {
        appointments.iter().filter(|a| a.status == status).count()
    };

    DailyReport {
        clinic_id,
        report_date,
        total_appointments: appointments.len(),
        completed: with_status(AppointmentStatus::Completed),
        cancelled: with_status(AppointmentStatus::Cancelled),
        no_show: with_status(AppointmentStatus::NoShow),
        checked_in: with_status(AppointmentStatus::CheckedIn),
        served: entries
            .iter()
            .filter(|e| e.status == QueueEntryStatus::Served)
            .count(),
        waiting: entries.iter().filter(|e| e.status.is_waiting()).count(),
        generated_at,
    }
}
