use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};

use crate::models::{Clinic, Doctor};

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Slot start times in `[open, close)` stepping by `interval_minutes`.
pub fn slot_grid(open_time: NaiveTime, close_time: NaiveTime, interval_minutes: u32) -> Vec<NaiveTime> {
    if interval_minutes == 0 || open_time >= close_time {
        return Vec::new();
    }

    let step = interval_minutes * 60;
    let close = close_time.num_seconds_from_midnight();
    let mut cursor = open_time.num_seconds_from_midnight();
    let mut slots = Vec::new();

    while cursor < close && cursor < SECONDS_PER_DAY {
        if let Some(time) = NaiveTime::from_num_seconds_from_midnight_opt(cursor, 0) {
            slots.push(time);
        }
        cursor += step;
    }

    slots
}

/// Grid for a doctor's day, in clinic-local time.
pub fn doctor_grid(clinic: &Clinic, doctor: &Doctor) -> Vec<NaiveTime> {
    slot_grid(clinic.open_time, clinic.close_time, doctor.effective_interval(clinic))
}

/// Free slots for `doctor` at `clinic` on `date`.
///
/// `occupied` holds the instants of the doctor's non-cancelled appointments;
/// instants on other days are ignored. A doctor who does not belong to the
/// clinic has no slots there.
pub fn available_slots(
    clinic: &Clinic,
    doctor: &Doctor,
    date: NaiveDate,
    occupied: &[DateTime<Utc>],
) -> Vec<NaiveTime> {
    if doctor.clinic_id != clinic.id {
        return Vec::new();
    }

    let taken: HashSet<NaiveTime> = occupied
        .iter()
        .filter(|instant| clinic.local_date(**instant) == date)
        .map(|instant| clinic.local_time(*instant))
        .collect();

    doctor_grid(clinic, doctor)
        .into_iter()
        .filter(|slot| !taken.contains(slot))
        .collect()
}

/// Whether `instant` falls exactly on one of the doctor's slot starts.
pub fn is_on_grid(clinic: &Clinic, doctor: &Doctor, instant: DateTime<Utc>) -> bool {
    let time = clinic.local_time(instant);
    doctor_grid(clinic, doctor).contains(&time)
}

/// Start of the slot containing `time`, if any slot has started by then.
pub fn current_slot_start(grid: &[NaiveTime], time: NaiveTime) -> Option<NaiveTime> {
    grid.iter().copied().take_while(|slot| *slot <= time).last()
}
