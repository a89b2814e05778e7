use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{NotificationKind, QueueEntry, QueueNotification};

/// Per-patient inbox of queue notifications, newest last.
#[derive(Clone, Default)]
pub struct NotificationInbox {
    inboxes: Arc<RwLock<HashMap<Uuid, Vec<QueueNotification>>>>,
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notify(
        &self,
        clinic_id: Uuid,
        entry: &QueueEntry,
        kind: NotificationKind,
        at: DateTime<Utc>,
    ) -> QueueNotification {
        let notification = QueueNotification {
            id: Uuid::new_v4(),
            patient_id: entry.patient_id,
            clinic_id,
            appointment_id: entry.appointment_id,
            kind,
            queue_number: entry.queue_number,
            message: kind.message().to_string(),
            created_at: at,
        };

        info!(
            "Notification {:?} for patient {} (number {})",
            kind, entry.patient_id, entry.queue_number
        );
        self.inboxes
            .write()
            .await
            .entry(entry.patient_id)
            .or_default()
            .push(notification.clone());
        notification
    }

    /// Notifications for one patient, most recent first.
    pub async fn for_patient(&self, patient_id: Uuid) -> Vec<QueueNotification> {
        let inboxes = self.inboxes.read().await;
        inboxes
            .get(&patient_id)
            .map(|notifications| notifications.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}
