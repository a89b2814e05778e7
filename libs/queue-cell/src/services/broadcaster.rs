use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::QueueSnapshot;

pub type QueueSender = broadcast::Sender<String>;
pub type QueueReceiver = broadcast::Receiver<String>;

pub const WELCOME_MESSAGE: &str = r#"{"type":"connected","message":"welcome"}"#;

/// Fans queue snapshots out to every display subscribed to a clinic.
///
/// Delivery is best effort: publishing to a clinic nobody listens to is a
/// no-op, and slow receivers lose intermediate snapshots.
#[derive(Clone)]
pub struct QueueBroadcaster {
    channels: Arc<RwLock<HashMap<Uuid, QueueSender>>>,
    capacity: usize,
}

impl QueueBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, clinic_id: Uuid) -> QueueReceiver {
        let mut channels = self.channels.write().await;
        let sender = channels.entry(clinic_id).or_insert_with(|| {
            debug!("Created queue channel for clinic {}", clinic_id);
            broadcast::channel(self.capacity).0
        });
        sender.subscribe()
    }

    pub async fn publish(&self, snapshot: &QueueSnapshot) {
        let payload = match serde_json::to_string(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize queue snapshot for clinic {}: {}", snapshot.clinic_id, e);
                return;
            }
        };

        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(&snapshot.clinic_id) {
            match sender.send(payload) {
                Ok(receivers) => debug!(
                    "Sent queue update for clinic {} to {} receivers",
                    snapshot.clinic_id, receivers
                ),
                Err(_) => debug!("No active receivers for clinic {}", snapshot.clinic_id),
            }
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub async fn prune(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|clinic_id, sender| {
            let keep = sender.receiver_count() > 0;
            if !keep {
                debug!("Removed idle queue channel for clinic {}", clinic_id);
            }
            keep
        });
    }

    /// Give back a display's receiver and drop the clinic's channel if it was the last one.
    pub async fn unsubscribe(&self, clinic_id: Uuid, receiver: QueueReceiver) {
        drop(receiver);
        debug!("Display left queue channel for clinic {}", clinic_id);
        self.prune().await;
    }

    pub async fn active_channels(&self) -> Vec<Uuid> {
        let channels = self.channels.read().await;
        channels.keys().cloned().collect()
    }
}

impl Default for QueueBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
