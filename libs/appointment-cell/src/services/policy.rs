use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::{Actor, Role};

use crate::models::AppointmentError;

/// Minimum notice required before an appointment may be moved.
#[derive(Debug, Clone, Copy)]
pub struct ReschedulePolicy {
    pub notice: Duration,
    /// When false, staff and admins may reschedule at any time.
    pub staff_bound_by_notice: bool,
}

impl ReschedulePolicy {
    pub fn new(notice_hours: i64, staff_bound_by_notice: bool) -> Self {
        Self {
            notice: Duration::hours(notice_hours),
            staff_bound_by_notice,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.reschedule_notice_hours, config.staff_bound_by_notice)
    }

    fn binds(&self, actor: &Actor) -> bool {
        match actor.role {
            Role::Patient | Role::Doctor => true,
            Role::Staff | Role::Admin => self.staff_bound_by_notice,
        }
    }

    /// Fails once `now` is past `scheduled_at - notice` for a bound actor.
    pub fn check(
        &self,
        actor: &Actor,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if !self.binds(actor) {
            return Ok(());
        }

        let deadline = scheduled_at - self.notice;
        if now > deadline {
            debug!(
                "Reschedule by {} refused: deadline {} passed (now {})",
                actor.role, deadline, now
            );
            return Err(AppointmentError::RescheduleWindowClosed {
                notice_hours: self.notice.num_hours(),
            });
        }

        Ok(())
    }
}

impl Default for ReschedulePolicy {
    fn default() -> Self {
        Self::new(24, false)
    }
}
