use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::router::appointment_routes;
use appointment_cell::services::AppointmentStore;
use appointment_cell::AppointmentCellState;
use queue_cell::router::queue_routes;
use queue_cell::services::QueueEngine;
use queue_cell::QueueCellState;
use schedule_cell::router::schedule_routes;
use schedule_cell::services::ClinicDirectory;
use schedule_cell::ScheduleCellState;
use shared_config::AppConfig;

pub struct Services {
    pub config: Arc<AppConfig>,
    pub directory: Arc<ClinicDirectory>,
    pub store: Arc<AppointmentStore>,
    pub engine: Arc<QueueEngine>,
}

pub fn create_router(services: Services) -> Router {
    let schedule_state = Arc::new(ScheduleCellState {
        config: services.config.clone(),
        directory: services.directory,
        bookings: services.store.clone(),
    });
    let appointment_state = Arc::new(AppointmentCellState {
        config: services.config.clone(),
        store: services.store,
    });
    let queue_state = Arc::new(QueueCellState {
        config: services.config,
        engine: services.engine,
    });

    Router::new()
        .route("/", get(|| async { "Clinic queue API is running!" }))
        .nest("/schedule", schedule_routes(schedule_state))
        .nest("/appointments", appointment_routes(appointment_state))
        .nest("/queue", queue_routes(queue_state))
}
