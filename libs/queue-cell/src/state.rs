use std::sync::Arc;

use shared_config::AppConfig;

use crate::services::QueueEngine;

#[derive(Clone)]
pub struct QueueCellState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<QueueEngine>,
}
