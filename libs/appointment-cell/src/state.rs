use std::sync::Arc;

use shared_config::AppConfig;

use crate::services::AppointmentStore;

#[derive(Clone)]
pub struct AppointmentCellState {
    pub config: Arc<AppConfig>,
    pub store: Arc<AppointmentStore>,
}
