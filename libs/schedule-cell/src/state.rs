use std::sync::Arc;

use shared_config::AppConfig;

use crate::services::{ClinicDirectory, DoctorBookings};

#[derive(Clone)]
pub struct ScheduleCellState {
    pub config: Arc<AppConfig>,
    pub directory: Arc<ClinicDirectory>,
    pub bookings: Arc<dyn DoctorBookings>,
}
