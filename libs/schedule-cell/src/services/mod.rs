pub mod calendar;
pub mod directory;

pub use directory::{ClinicDirectory, DoctorBookings};
