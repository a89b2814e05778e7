pub mod broadcaster;
pub mod engine;
pub mod notifications;
pub mod report;

pub use broadcaster::QueueBroadcaster;
pub use engine::QueueEngine;
pub use notifications::NotificationInbox;
